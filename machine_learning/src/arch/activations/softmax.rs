use ndarray::{Array2, ArrayView2, Axis};

/// Applies a numerically stable softmax over every row of `z`.
///
/// # Arguments
/// * `z` - The logits, one sample per row.
///
/// # Returns
/// The row-wise probabilities.
pub fn softmax_rows(z: ArrayView2<f32>) -> Array2<f32> {
    let mut out = z.to_owned();

    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }

    out
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn rows_sum_to_one_and_keep_the_argmax() {
        let z = array![[1.0, 2.0, 3.0], [1000.0, 0.0, -1000.0]];
        let p = softmax_rows(z.view());

        for row in p.axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }

        assert!(p[[0, 2]] > p[[0, 1]] && p[[0, 1]] > p[[0, 0]]);
        assert!((p[[1, 0]] - 1.0).abs() < 1e-6);
    }
}
