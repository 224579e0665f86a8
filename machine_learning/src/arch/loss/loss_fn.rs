use ndarray::{Array2, ArrayView2, Axis};

/// A loss function measuring how far the model's output is from the expected one.
pub trait LossFn {
    /// Returns the mean loss over the batch.
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32;

    /// Returns the derivative of the mean loss with respect to `y_pred`.
    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32>;
}

/// Counts the rows where the arg max of `y_pred` equals the class id stored in `y`.
///
/// # Arguments
/// * `y_pred` - The model's output, one row of scores per sample.
/// * `y` - The expected class ids, a single column.
///
/// # Returns
/// The amount of correct predictions.
pub fn correct_predictions(y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> usize {
    y_pred
        .axis_iter(Axis(0))
        .zip(y.axis_iter(Axis(0)))
        .filter(|(scores, label)| {
            let predicted = scores
                .iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &s)| {
                    if s > best.1 { (i, s) } else { best }
                })
                .0;

            label.get(0).is_some_and(|&l| l as usize == predicted)
        })
        .count()
}
