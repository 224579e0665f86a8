use comms::specs::machine_learning::OptimizerSpec;

use super::{Adam, GradientDescent, GradientDescentWithMomentum};
use crate::Result;

/// An optimizer applies a gradient to the parameters of a model.
pub trait Optimizer {
    /// Takes a single optimization step.
    ///
    /// # Arguments
    /// * `grad` - The gradient of the loss with respect to `params`.
    /// * `params` - The parameters to update in place.
    ///
    /// # Returns
    /// An error if `grad` and `params` differ in length.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;
}

/// Builds the optimizer described by `spec` for a model of `len` parameters.
pub fn from_spec(spec: &OptimizerSpec, len: usize) -> Box<dyn Optimizer + Send> {
    match *spec {
        OptimizerSpec::GradientDescent { learning_rate } => {
            Box::new(GradientDescent::new(learning_rate))
        }
        OptimizerSpec::GradientDescentWithMomentum {
            learning_rate,
            momentum,
        } => Box::new(GradientDescentWithMomentum::new(len, learning_rate, momentum)),
        OptimizerSpec::Adam {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } => Box::new(Adam::new(len, learning_rate, beta1, beta2, epsilon)),
    }
}
