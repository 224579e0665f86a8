use super::ParamGen;

/// A parameter generator that delegates the generation to a chain of generators, moving on to
/// the next one whenever the current one is exhausted.
///
/// This is how every parameter block of a model gets its own initialization.
pub struct ChainedParamGen {
    param_gens: Vec<Box<dyn ParamGen>>,
    curr: usize,
}

impl ChainedParamGen {
    /// Creates a new `ChainedParamGen`.
    ///
    /// # Arguments
    /// * `param_gens` - The generators to take samples from, in order.
    pub fn new(param_gens: Vec<Box<dyn ParamGen>>) -> Self {
        Self {
            param_gens,
            curr: 0,
        }
    }
}

impl ParamGen for ChainedParamGen {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        let mut sample = Vec::with_capacity(n);

        while sample.len() < n {
            let param_gen = self.param_gens.get_mut(self.curr)?;

            match param_gen.sample(n - sample.len()) {
                Some(chunk) => sample.extend(chunk),
                None => self.curr += 1,
            }
        }

        Some(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::{super::ConstParamGen, *};

    #[test]
    fn empty() {
        let mut param_gen = ChainedParamGen::new(vec![]);
        assert!(param_gen.sample(1).is_none());
    }

    #[test]
    fn crosses_generator_boundaries() {
        let param_gens: Vec<Box<dyn ParamGen>> = vec![
            Box::new(ConstParamGen::new(0., 1)),
            Box::new(ConstParamGen::new(1., 3)),
        ];

        let mut param_gen = ChainedParamGen::new(param_gens);
        assert_eq!(param_gen.sample(2).unwrap(), [0., 1.]);
        assert_eq!(param_gen.sample(2).unwrap(), [1., 1.]);
        assert!(param_gen.sample(1).is_none());
    }
}
