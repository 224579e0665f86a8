use ndarray::{Array2, ArrayView2};

use super::loss::LossFn;
use crate::Result;

/// The outcome of a single forward and backward pass over a batch.
#[derive(Debug)]
pub struct BatchOutput {
    /// The mean loss over the batch.
    pub loss: f32,
    /// The raw output of the model for the batch.
    pub y_pred: Array2<f32>,
}

pub trait Model {
    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize;

    /// Computes the model's output for `x`.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `x` - The input, one sample per row.
    fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Computes the gradient of the mean loss over the batch with respect to the parameters of
    /// the model. The parameters are left untouched, applying the gradient is up to the caller.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `grad` - A buffer with the same layout as `params`, it gets overwritten.
    /// * `loss_fn` - The loss function.
    /// * `x` - The input, one sample per row.
    /// * `y` - The expected output, one sample per row.
    ///
    /// # Returns
    /// The batch loss and predictions.
    fn backprop<L: LossFn>(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        loss_fn: &L,
        x: ArrayView2<f32>,
        y: ArrayView2<f32>,
    ) -> Result<BatchOutput>;
}
