use comms::specs::machine_learning::{ActFnSpec, LayerSpec, LossFnSpec, ModelSpec, OptimizerSpec};
use machine_learning::arch::{ModelBuilder, Sequential};

use crate::{
    data::{IMAGE_SIDE, NUM_CLASSES},
    error::Result,
};

const FILTERS: usize = 32;
const KERNEL: usize = 3;
const POOL: usize = 2;
const HIDDEN: usize = 64;

/// A model together with how it is trained.
#[derive(Debug)]
pub struct CompiledModel {
    pub model: Sequential,
    pub optimizer: OptimizerSpec,
    pub loss: LossFnSpec,
}

/// The architecture of the mnist classifier.
///
/// ```text
/// Conv2d(32, 3x3, relu)  28x28x1 -> 26x26x32
/// MaxPool2d(2)                   -> 13x13x32
/// Flatten                        -> 5408
/// Dense(64, relu)
/// Dense(10)                      -> logits
/// ```
pub fn cnn_spec() -> ModelSpec {
    let conv_side = IMAGE_SIDE - KERNEL + 1;
    let pool_side = conv_side / POOL;
    let flat = pool_side * pool_side * FILTERS;

    ModelSpec::Sequential {
        layers: vec![
            LayerSpec::Conv2d {
                input: (IMAGE_SIDE, IMAGE_SIDE, 1),
                filters: FILTERS,
                kernel: KERNEL,
                act_fn: Some(ActFnSpec::Relu),
            },
            LayerSpec::MaxPool2d {
                input: (conv_side, conv_side, FILTERS),
                pool: POOL,
            },
            LayerSpec::Flatten {
                input: (pool_side, pool_side, FILTERS),
            },
            LayerSpec::Dense {
                dim: (flat, HIDDEN),
                act_fn: Some(ActFnSpec::Relu),
            },
            LayerSpec::Dense {
                dim: (HIDDEN, NUM_CLASSES),
                act_fn: None,
            },
        ],
    }
}

/// Builds the mnist classifier, trained with sparse categorical cross entropy and plain SGD.
pub fn build_and_compile_cnn_model(learning_rate: f32) -> Result<CompiledModel> {
    let model = ModelBuilder::new().build(&cnn_spec())?;

    Ok(CompiledModel {
        model,
        optimizer: OptimizerSpec::GradientDescent { learning_rate },
        loss: LossFnSpec::SparseCategoricalCrossEntropy,
    })
}

#[cfg(test)]
mod tests {
    use machine_learning::arch::Model;

    use super::*;
    use crate::data::IMAGE_LEN;

    #[test]
    fn cnn_has_the_expected_shape() {
        let compiled = build_and_compile_cnn_model(0.001).unwrap();
        let model = &compiled.model;

        assert_eq!(model.input_len(), IMAGE_LEN);
        assert_eq!(model.output_len(), NUM_CLASSES);
        assert_eq!(
            model.size(),
            (3 * 3 + 1) * 32 + (13 * 13 * 32 + 1) * 64 + (64 + 1) * 10
        );
    }
}
