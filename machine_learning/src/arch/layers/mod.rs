mod conv2d;
mod dense;
mod flatten;
mod layer;
mod max_pool;

pub use conv2d::Conv2d;
pub use dense::Dense;
pub use flatten::Flatten;
pub use layer::{Init, Layer, ParamBlock};
pub use max_pool::MaxPool2d;

/// The `(height, width, channels)` shape of an image-like activation.
pub type ImageShape = (usize, usize, usize);
