use comms::specs::machine_learning::{ActFnSpec, LayerSpec, ModelSpec, OptimizerSpec};
use ndarray::{Array2, ArrayView2, array};

use crate::{
    arch::{
        Model, ModelBuilder, Sequential,
        loss::{LossFn, Mse, SparseCategoricalCrossEntropy, correct_predictions},
    },
    optimization,
};

fn dense(dim: (usize, usize), act_fn: Option<ActFnSpec>) -> LayerSpec {
    LayerSpec::Dense { dim, act_fn }
}

fn train<L: LossFn>(
    model: &mut Sequential,
    params: &mut [f32],
    optimizer: OptimizerSpec,
    loss_fn: &L,
    x: ArrayView2<f32>,
    y: ArrayView2<f32>,
    steps: usize,
) -> (f32, f32) {
    let mut optimizer = optimization::from_spec(&optimizer, params.len());
    let mut grad = vec![0.; params.len()];
    let mut first = None;
    let mut last = 0.;

    for _ in 0..steps {
        let out = model.backprop(params, &mut grad, loss_fn, x, y).unwrap();
        optimizer.update_params(&grad, params).unwrap();
        first.get_or_insert(out.loss);
        last = out.loss;
    }

    (first.unwrap_or_default(), last)
}

#[test]
fn and_gate_converges() {
    let builder = ModelBuilder::new();
    let spec = ModelSpec::Sequential {
        layers: vec![
            dense((2, 3), Some(ActFnSpec::Sigmoid { amp: 1. })),
            dense((3, 1), Some(ActFnSpec::Sigmoid { amp: 1. })),
        ],
    };

    let mut model = builder.build(&spec).unwrap();
    let mut params = builder.init_params(&model, Some(42)).unwrap();

    let x = array![[0., 0.], [0., 1.], [1., 0.], [1., 1.]];
    let y = array![[0.], [0.], [0.], [1.]];

    let sgd = OptimizerSpec::GradientDescent { learning_rate: 10. };
    let (first, last) = train(&mut model, &mut params, sgd, &Mse, x.view(), y.view(), 5000);
    assert!(last < first);

    let y_pred = model.forward(&params, x.view()).unwrap();
    for (pred, expected) in y_pred.iter().zip(y.iter()) {
        assert!((pred - expected).abs() < 0.5, "{y_pred:?}");
    }
}

#[test]
fn separable_classes_are_learned_with_every_optimizer() {
    let builder = ModelBuilder::new();
    let spec = ModelSpec::Sequential {
        layers: vec![dense((2, 2), None)],
    };

    let x = array![[-1., 0.], [-2., 1.], [1., 0.], [2., -1.]];
    let y: Array2<f32> = array![[0.], [0.], [1.], [1.]];

    let optimizers = [
        OptimizerSpec::GradientDescent { learning_rate: 0.5 },
        OptimizerSpec::GradientDescentWithMomentum {
            learning_rate: 0.1,
            momentum: 0.9,
        },
        OptimizerSpec::Adam {
            learning_rate: 0.05,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
        },
    ];

    for optimizer in optimizers {
        let mut model = builder.build(&spec).unwrap();
        let mut params = builder.init_params(&model, Some(1)).unwrap();
        let loss_fn = SparseCategoricalCrossEntropy::new();

        let (first, last) =
            train(&mut model, &mut params, optimizer, &loss_fn, x.view(), y.view(), 300);
        assert!(last < first, "{optimizer:?}: {first} -> {last}");

        let y_pred = model.forward(&params, x.view()).unwrap();
        assert_eq!(correct_predictions(y_pred.view(), y.view()), 4, "{optimizer:?}");
    }
}
