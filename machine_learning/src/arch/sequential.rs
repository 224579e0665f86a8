use comms::specs::machine_learning::ModelSpec;
use ndarray::{Array2, ArrayView2};

use super::{BatchOutput, Model, layers::Layer, loss::LossFn};
use crate::{Result, error::check_len};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
///
/// The parameters of every layer live in a single flat buffer, one layer after the other.
#[derive(Clone, Debug)]
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// The amount of features each input sample must have.
    pub fn input_len(&self) -> usize {
        self.layers.first().map(Layer::input_len).unwrap_or_default()
    }

    /// The amount of features each output sample has.
    pub fn output_len(&self) -> usize {
        self.layers.last().map(Layer::output_len).unwrap_or_default()
    }

    /// Returns the wire-level specification of this model.
    pub fn spec(&self) -> ModelSpec {
        ModelSpec::Sequential {
            layers: self.layers.iter().map(Layer::spec).collect(),
        }
    }
}

impl Model for Sequential {
    fn size(&self) -> usize {
        self.layers.iter().map(Layer::size).sum()
    }

    fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_len("model parameters", params.len(), self.size())?;

        let mut rest = params;
        let mut x = x.to_owned();

        for layer in self.layers.iter_mut() {
            let (head, tail) = rest.split_at(layer.size());
            x = layer.forward(head, x.view())?;
            rest = tail;
        }

        Ok(x)
    }

    fn backprop<L: LossFn>(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        loss_fn: &L,
        x: ArrayView2<f32>,
        y: ArrayView2<f32>,
    ) -> Result<BatchOutput> {
        check_len("model gradient", grad.len(), params.len())?;
        check_len("batch labels", y.nrows(), x.nrows())?;

        let y_pred = self.forward(params, x)?;
        let loss = loss_fn.loss(y_pred.view(), y);
        let mut d = loss_fn.loss_prime(y_pred.view(), y);

        let mut end = params.len();
        for layer in self.layers.iter_mut().rev() {
            let start = end - layer.size();
            d = layer.backward(&params[start..end], &mut grad[start..end], d)?;
            end = start;
        }

        Ok(BatchOutput { loss, y_pred })
    }
}
