use ndarray::{Array2, ArrayView2, Axis};

use super::LossFn;
use crate::arch::activations::softmax_rows;

/// Keeps `ln` away from zero probabilities.
const EPSILON: f32 = 1e-7;

/// Cross entropy between integer class labels and the softmax of the model's logits.
///
/// `y_pred` are raw logits with one column per class, `y` holds a single column with the class
/// id of each sample. The softmax is fused in so the derivative is `softmax(z) - onehot(y)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SparseCategoricalCrossEntropy;

impl SparseCategoricalCrossEntropy {
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for SparseCategoricalCrossEntropy {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        let n = y_pred.nrows();
        if n == 0 {
            return 0.;
        }

        let probs = softmax_rows(y_pred);
        let total: f32 = probs
            .axis_iter(Axis(0))
            .zip(y.axis_iter(Axis(0)))
            .map(|(p, label)| {
                let class = label.get(0).copied().unwrap_or_default() as usize;
                let p = p.get(class).copied().unwrap_or_default();
                -(p.max(EPSILON)).ln()
            })
            .sum();

        total / n as f32
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let n = y_pred.nrows().max(1) as f32;
        let mut d = softmax_rows(y_pred);

        for (mut row, label) in d.axis_iter_mut(Axis(0)).zip(y.axis_iter(Axis(0))) {
            let class = label.get(0).copied().unwrap_or_default() as usize;
            if let Some(p) = row.get_mut(class) {
                *p -= 1.;
            }
        }

        d /= n;
        d
    }
}
