use super::Optimizer;
use crate::{Result, error::check_len};

/// Plain stochastic gradient descent.
#[derive(Debug, Clone)]
pub struct GradientDescent {
    learning_rate: f32,
}

impl GradientDescent {
    /// Returns a new `GradientDescent`.
    ///
    /// # Arguments
    /// * `learning_rate` - The *length* of the steps taken on `update_params`.
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for GradientDescent {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_len("optimizer gradient", grad.len(), params.len())?;

        let lr = self.learning_rate;
        for (w, g) in params.iter_mut().zip(grad) {
            *w -= lr * g;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_against_the_gradient() {
        let mut sgd = GradientDescent::new(0.5);
        let mut params = [1.0, -1.0];
        sgd.update_params(&[2.0, -4.0], &mut params).unwrap();
        assert_eq!(params, [0.0, 1.0]);
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let mut sgd = GradientDescent::new(0.5);
        assert!(sgd.update_params(&[1.0], &mut [0.0, 0.0]).is_err());
    }
}
