use ndarray::{Array2, ArrayView2};

use super::ImageShape;
use crate::{Result, error::check_len};

/// Collapses an image into a feature vector.
///
/// Activations already travel flattened, so this only validates the amount of features.
#[derive(Clone, Debug)]
pub struct Flatten {
    input: ImageShape,
}

impl Flatten {
    pub fn new(input: ImageShape) -> Self {
        Self { input }
    }

    pub fn input_shape(&self) -> ImageShape {
        self.input
    }

    pub fn output_len(&self) -> usize {
        let (h, w, c) = self.input;
        h * w * c
    }

    pub fn forward(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_len("flatten input features", x.ncols(), self.output_len())?;
        Ok(x.to_owned())
    }

    pub fn backward(&self, d: Array2<f32>) -> Result<Array2<f32>> {
        check_len("flatten delta features", d.ncols(), self.output_len())?;
        Ok(d)
    }
}
