use std::{cell::RefCell, rc::Rc};

use comms::specs::machine_learning::{LayerSpec, ModelSpec};
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{
    Model, Sequential,
    activations::ActFn,
    layers::{Conv2d, Dense, Flatten, Init, Layer, MaxPool2d},
};
use crate::{
    MlErr, Result,
    initialization::{ChainedParamGen, ConstParamGen, ParamGen, RandParamGen},
};

/// Builds models and their initial parameters given a specification.
pub struct ModelBuilder;

impl ModelBuilder {
    /// Creates a new `ModelBuilder`.
    pub fn new() -> Self {
        Self
    }

    /// Builds a new model following a spec.
    ///
    /// # Arguments
    /// * `spec` - The specification of the model.
    ///
    /// # Returns
    /// The model or an error if a layer is malformed or doesn't take the output of the
    /// previous one as its input.
    pub fn build(&self, spec: &ModelSpec) -> Result<Sequential> {
        let ModelSpec::Sequential { layers } = spec;

        if layers.is_empty() {
            return Err(MlErr::InvalidSpec("a model needs at least one layer".into()));
        }

        let mut built: Vec<Layer> = Vec::with_capacity(layers.len());
        for (i, layer_spec) in layers.iter().enumerate() {
            let layer = self.resolve_layer(i, *layer_spec)?;

            if let Some(prev) = built.last() {
                if prev.output_len() != layer.input_len() {
                    return Err(MlErr::InvalidSpec(format!(
                        "layer {i} takes {} features but layer {} outputs {}",
                        layer.input_len(),
                        i - 1,
                        prev.output_len()
                    )));
                }
            }

            built.push(layer);
        }

        Ok(Sequential::new(built))
    }

    /// Generates the initial parameters of `model`, one parameter block after the other.
    ///
    /// # Arguments
    /// * `model` - The model to initialize.
    /// * `seed` - An optional seed for the rng.
    pub fn init_params(&self, model: &Sequential, seed: Option<u64>) -> Result<Vec<f32>> {
        let rng = self.generate_rng(seed);
        let mut param_gen = self.resolve_param_gen(rng, model)?;

        let size = model.size();
        let params = param_gen.sample(size).unwrap_or_default();
        if params.len() != size {
            return Err(MlErr::SizeMismatch {
                what: "initial parameters",
                got: params.len(),
                expected: size,
            });
        }

        Ok(params)
    }

    fn generate_rng(&self, seed: Option<u64>) -> Rc<RefCell<StdRng>> {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Rc::new(RefCell::new(rng))
    }

    fn resolve_layer(&self, i: usize, spec: LayerSpec) -> Result<Layer> {
        let invalid = |what: &str| MlErr::InvalidSpec(format!("layer {i}: {what}"));

        let layer = match spec {
            LayerSpec::Conv2d {
                input,
                filters,
                kernel,
                act_fn,
            } => {
                let conv = Conv2d::new(input, filters, kernel, act_fn.map(ActFn::from))
                    .ok_or_else(|| invalid("the kernel doesn't fit the input"))?;
                Layer::Conv2d(conv)
            }
            LayerSpec::MaxPool2d { input, pool } => {
                let max_pool = MaxPool2d::new(input, pool)
                    .ok_or_else(|| invalid("the pool doesn't fit the input"))?;
                Layer::MaxPool2d(max_pool)
            }
            LayerSpec::Flatten { input } => Layer::Flatten(Flatten::new(input)),
            LayerSpec::Dense { dim, act_fn } => {
                if dim.0 == 0 || dim.1 == 0 {
                    return Err(invalid("dense layers can't be empty"));
                }
                Layer::Dense(Dense::new(dim, act_fn.map(ActFn::from)))
            }
        };

        Ok(layer)
    }

    fn resolve_param_gen<R>(
        &self,
        rng: Rc<RefCell<R>>,
        model: &Sequential,
    ) -> Result<ChainedParamGen>
    where
        R: Rng + 'static,
    {
        let mut param_gens: Vec<Box<dyn ParamGen>> = Vec::new();

        for block in model.layers().iter().flat_map(Layer::param_blocks) {
            let limit = block.len();

            match block.init {
                Init::Zeros => param_gens.push(Box::new(ConstParamGen::new(0., limit))),
                Init::Kaiming { fan_in } => {
                    let param_gen = RandParamGen::kaiming(rng.clone(), limit, fan_in)?;
                    param_gens.push(Box::new(param_gen));
                }
                Init::Xavier { fan_in, fan_out } => {
                    let param_gen =
                        RandParamGen::xavier_uniform(rng.clone(), limit, fan_in, fan_out)?;
                    param_gens.push(Box::new(param_gen));
                }
            }
        }

        Ok(ChainedParamGen::new(param_gens))
    }
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}
