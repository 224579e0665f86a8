use comms::specs::machine_learning::ActFnSpec;

use super::{Relu, Sigmoid};

/// An element-wise activation function.
#[derive(Clone, Debug)]
pub enum ActFn {
    Relu(Relu),
    Sigmoid(Sigmoid),
}

impl ActFn {
    pub fn relu() -> Self {
        Self::Relu(Relu)
    }

    pub fn sigmoid(amp: f32) -> Self {
        Self::Sigmoid(Sigmoid::new(amp))
    }

    pub fn f(&self, z: f32) -> f32 {
        match self {
            Self::Relu(a) => a.f(z),
            Self::Sigmoid(a) => a.f(z),
        }
    }

    pub fn df(&self, z: f32) -> f32 {
        match self {
            Self::Relu(a) => a.df(z),
            Self::Sigmoid(a) => a.df(z),
        }
    }

    /// Whether the activation is rectifier-like, used to pick the weight initialization.
    pub fn is_rectifier(&self) -> bool {
        matches!(self, Self::Relu(_))
    }

    /// Returns the wire-level specification of this activation.
    pub fn spec(&self) -> ActFnSpec {
        match self {
            Self::Relu(_) => ActFnSpec::Relu,
            Self::Sigmoid(a) => ActFnSpec::Sigmoid { amp: a.amp() },
        }
    }
}

impl From<ActFnSpec> for ActFn {
    fn from(spec: ActFnSpec) -> Self {
        match spec {
            ActFnSpec::Relu => Self::relu(),
            ActFnSpec::Sigmoid { amp } => Self::sigmoid(amp),
        }
    }
}
