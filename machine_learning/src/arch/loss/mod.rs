mod cross_entropy;
mod loss_fn;
mod mse;

pub use cross_entropy::SparseCategoricalCrossEntropy;
pub use loss_fn::{LossFn, correct_predictions};
pub use mse::Mse;
