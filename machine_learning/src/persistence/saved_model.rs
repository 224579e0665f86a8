use std::{fs, path::Path};

use comms::specs::machine_learning::{LossFnSpec, ModelSpec};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use super::{load_weights, save_weights};
use crate::{
    Result,
    arch::{Model, ModelBuilder, Sequential, activations::softmax_rows},
};

/// The architecture file of an exported model.
pub const MODEL_FILE: &str = "model.json";
/// The weights file of an exported model.
pub const WEIGHTS_FILE: &str = "weights.safetensors";

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    model: ModelSpec,
    loss: LossFnSpec,
}

/// A trained model ready for inference.
#[derive(Debug)]
pub struct SavedModel {
    model: Sequential,
    params: Vec<f32>,
    loss: LossFnSpec,
}

impl SavedModel {
    pub fn new(model: Sequential, params: Vec<f32>, loss: LossFnSpec) -> Self {
        Self {
            model,
            params,
            loss,
        }
    }

    /// Writes the model into `dir`, creating it if needed.
    pub fn export(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;

        let manifest = Manifest {
            model: self.model.spec(),
            loss: self.loss,
        };

        fs::write(dir.join(MODEL_FILE), serde_json::to_vec_pretty(&manifest)?)?;
        save_weights(&dir.join(WEIGHTS_FILE), &self.model, &self.params)
    }

    /// Loads a model previously written by `export`.
    pub fn load(dir: &Path) -> Result<Self> {
        let manifest: Manifest = serde_json::from_slice(&fs::read(dir.join(MODEL_FILE))?)?;
        let model = ModelBuilder::new().build(&manifest.model)?;
        let params = load_weights(&dir.join(WEIGHTS_FILE), &model)?;

        Ok(Self::new(model, params, manifest.loss))
    }

    /// Runs inference over `x`, one sample per row.
    ///
    /// Models trained with a cross-entropy loss output logits, so their output is turned into
    /// class probabilities.
    pub fn predict(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let y = self.model.forward(&self.params, x)?;

        match self.loss {
            LossFnSpec::SparseCategoricalCrossEntropy => Ok(softmax_rows(y.view())),
            LossFnSpec::Mse => Ok(y),
        }
    }

    pub fn model(&self) -> &Sequential {
        &self.model
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn loss(&self) -> LossFnSpec {
        self.loss
    }
}
