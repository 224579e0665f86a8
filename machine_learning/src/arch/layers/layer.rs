use comms::specs::machine_learning::LayerSpec;
use ndarray::{Array2, ArrayView2};

use super::{Conv2d, Dense, Flatten, MaxPool2d};
use crate::Result;

/// How a block of parameters is initialized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    Zeros,
    Kaiming { fan_in: usize },
    Xavier { fan_in: usize, fan_out: usize },
}

/// A named, shaped chunk of a layer's parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamBlock {
    pub name: &'static str,
    pub shape: Vec<usize>,
    pub init: Init,
}

impl ParamBlock {
    pub fn new(name: &'static str, shape: Vec<usize>, init: Init) -> Self {
        Self { name, shape, init }
    }

    /// The amount of parameters in the block.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A layer of a `Sequential` model.
#[derive(Clone, Debug)]
pub enum Layer {
    Conv2d(Conv2d),
    MaxPool2d(MaxPool2d),
    Flatten(Flatten),
    Dense(Dense),
}

impl Layer {
    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        match self {
            Layer::Conv2d(l) => l.size(),
            Layer::Dense(l) => l.size(),
            Layer::MaxPool2d(_) | Layer::Flatten(_) => 0,
        }
    }

    /// Returns the amount of features each input sample must have.
    pub fn input_len(&self) -> usize {
        let (h, w, c) = match self {
            Layer::Conv2d(l) => l.input_shape(),
            Layer::MaxPool2d(l) => l.input_shape(),
            Layer::Flatten(l) => l.input_shape(),
            Layer::Dense(l) => return l.dim().0,
        };

        h * w * c
    }

    /// Returns the amount of features each output sample has.
    pub fn output_len(&self) -> usize {
        let (h, w, c) = match self {
            Layer::Conv2d(l) => l.output_shape(),
            Layer::MaxPool2d(l) => l.output_shape(),
            Layer::Flatten(l) => return l.output_len(),
            Layer::Dense(l) => return l.dim().1,
        };

        h * w * c
    }

    /// The named parameter blocks of this layer, in the order they're laid out.
    pub fn param_blocks(&self) -> Vec<ParamBlock> {
        match self {
            Layer::Conv2d(l) => l.param_blocks(),
            Layer::Dense(l) => l.param_blocks(),
            Layer::MaxPool2d(_) | Layer::Flatten(_) => Vec::new(),
        }
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        match self {
            Layer::Conv2d(l) => l.forward(params, x),
            Layer::MaxPool2d(l) => l.forward(x),
            Layer::Flatten(l) => l.forward(x),
            Layer::Dense(l) => l.forward(params, x),
        }
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        match self {
            Layer::Conv2d(l) => l.backward(params, grad, d),
            Layer::MaxPool2d(l) => l.backward(d),
            Layer::Flatten(l) => l.backward(d),
            Layer::Dense(l) => l.backward(params, grad, d),
        }
    }

    /// Returns the wire-level specification of this layer.
    pub fn spec(&self) -> LayerSpec {
        match self {
            Layer::Conv2d(l) => LayerSpec::Conv2d {
                input: l.input_shape(),
                filters: l.filters(),
                kernel: l.kernel(),
                act_fn: l.act_fn().map(|a| a.spec()),
            },
            Layer::MaxPool2d(l) => LayerSpec::MaxPool2d {
                input: l.input_shape(),
                pool: l.pool(),
            },
            Layer::Flatten(l) => LayerSpec::Flatten {
                input: l.input_shape(),
            },
            Layer::Dense(l) => LayerSpec::Dense {
                dim: l.dim(),
                act_fn: l.act_fn().map(|a| a.spec()),
            },
        }
    }
}
