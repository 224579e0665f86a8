use ndarray::{linalg, prelude::*};
use rayon::prelude::*;

use super::{ImageShape, Init, ParamBlock};
use crate::{Result, arch::activations::ActFn, error::check_len};

/// The spatial arrangement of a convolution, copied into the parallel closures.
#[derive(Clone, Copy, Debug)]
struct Geometry {
    input: ImageShape,
    kernel: usize,
    out_h: usize,
    out_w: usize,
}

impl Geometry {
    fn patches(&self) -> usize {
        self.out_h * self.out_w
    }

    fn patch_len(&self) -> usize {
        self.kernel * self.kernel * self.input.2
    }

    fn input_len(&self) -> usize {
        let (h, w, c) = self.input;
        h * w * c
    }

    /// Index of the input pixel seen at kernel offset `(ki, kj)` of patch `(oi, oj)`.
    fn input_index(&self, oi: usize, oj: usize, ki: usize, kj: usize, ch: usize) -> usize {
        let (_, w, c) = self.input;
        ((oi + ki) * w + (oj + kj)) * c + ch
    }

    fn patch_index(&self, ki: usize, kj: usize, ch: usize) -> usize {
        (ki * self.kernel + kj) * self.input.2 + ch
    }

    /// Unrolls every patch of a single sample into the rows of `cols`.
    fn im2col(&self, x: ArrayView1<f32>, cols: &mut [f32]) {
        let patch_len = self.patch_len();
        let k = self.kernel;

        for oi in 0..self.out_h {
            for oj in 0..self.out_w {
                let row = &mut cols[(oi * self.out_w + oj) * patch_len..][..patch_len];

                for ki in 0..k {
                    for kj in 0..k {
                        for ch in 0..self.input.2 {
                            row[self.patch_index(ki, kj, ch)] =
                                x[self.input_index(oi, oj, ki, kj, ch)];
                        }
                    }
                }
            }
        }
    }

    /// Folds the patch deltas of a single sample back onto its input pixels.
    fn col2im(&self, dcols: ArrayView2<f32>, dx: &mut [f32]) {
        let k = self.kernel;

        for oi in 0..self.out_h {
            for oj in 0..self.out_w {
                let p = oi * self.out_w + oj;

                for ki in 0..k {
                    for kj in 0..k {
                        for ch in 0..self.input.2 {
                            dx[self.input_index(oi, oj, ki, kj, ch)] +=
                                dcols[[p, self.patch_index(ki, kj, ch)]];
                        }
                    }
                }
            }
        }
    }
}

/// A 2D convolution with `valid` padding and unit stride.
///
/// Samples travel as rows holding the channels-last flattening of a `(height, width, channels)`
/// image. The kernel is stored as a row-major `(kernel, kernel, channels, filters)` tensor
/// followed by one bias per filter. The convolution is computed as an `im2col` followed by a
/// matrix product.
#[derive(Clone, Debug)]
pub struct Conv2d {
    geometry: Geometry,
    filters: usize,
    act_fn: Option<ActFn>,
    size: usize,

    // Forward metadata
    cols: Array2<f32>,
    z: Array2<f32>,
}

impl Conv2d {
    /// Creates a new `Conv2d` layer.
    ///
    /// # Arguments
    /// * `input` - The `(height, width, channels)` shape of the input images.
    /// * `filters` - The amount of output channels.
    /// * `kernel` - The side of the square kernel.
    /// * `act_fn` - An optional activation applied to the output.
    ///
    /// # Returns
    /// `None` if the kernel doesn't fit inside the input.
    pub fn new(
        input: ImageShape,
        filters: usize,
        kernel: usize,
        act_fn: Option<ActFn>,
    ) -> Option<Self> {
        let (h, w, c) = input;
        if kernel == 0 || kernel > h || kernel > w || c == 0 || filters == 0 {
            return None;
        }

        let geometry = Geometry {
            input,
            kernel,
            out_h: h - kernel + 1,
            out_w: w - kernel + 1,
        };

        let zeros = Array2::zeros((0, 0));

        Some(Self {
            size: (geometry.patch_len() + 1) * filters,
            geometry,
            filters,
            act_fn,
            cols: zeros.clone(),
            z: zeros,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn input_shape(&self) -> ImageShape {
        self.geometry.input
    }

    pub fn output_shape(&self) -> ImageShape {
        (self.geometry.out_h, self.geometry.out_w, self.filters)
    }

    pub fn filters(&self) -> usize {
        self.filters
    }

    pub fn kernel(&self) -> usize {
        self.geometry.kernel
    }

    pub fn act_fn(&self) -> Option<&ActFn> {
        self.act_fn.as_ref()
    }

    pub fn param_blocks(&self) -> Vec<ParamBlock> {
        let k = self.geometry.kernel;
        let c = self.geometry.input.2;
        let fan_in = k * k * c;
        let fan_out = k * k * self.filters;

        let init = match &self.act_fn {
            Some(act_fn) if act_fn.is_rectifier() => Init::Kaiming { fan_in },
            _ => Init::Xavier { fan_in, fan_out },
        };

        vec![
            ParamBlock::new("weights", vec![k, k, c, self.filters], init),
            ParamBlock::new("bias", vec![self.filters], Init::Zeros),
        ]
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let geometry = self.geometry;
        check_len("conv2d input features", x.ncols(), geometry.input_len())?;

        let n = x.nrows();
        let patches = geometry.patches();
        let patch_len = geometry.patch_len();

        let rows: Vec<ArrayView1<f32>> = x.outer_iter().collect();
        let mut cols = vec![0.; n * patches * patch_len];
        if !cols.is_empty() {
            cols.par_chunks_mut(patches * patch_len)
                .zip(rows.par_iter())
                .for_each(|(chunk, row)| geometry.im2col(row.view(), chunk));
        }

        let cols = Array2::from_shape_vec((n * patches, patch_len), cols)?;
        let (w, b) = self.view_params(params)?;

        let mut z = cols.dot(&w);
        z += &b;

        let a = match &self.act_fn {
            Some(act_fn) => z.mapv(|z| act_fn.f(z)),
            None => z.clone(),
        };

        self.cols = cols;
        self.z = z;

        Ok(a.into_shape_with_order((n, patches * self.filters))?)
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        let geometry = self.geometry;
        let patches = geometry.patches();
        let n = d.nrows();
        check_len("conv2d deltas", n * patches, self.z.nrows())?;

        let mut d = d
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((n * patches, self.filters))?;

        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&self.z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &self.cols.t(), &d, 0.0, &mut dw);
        db.assign(&d.sum_axis(Axis(0)));

        let (w, _) = self.view_params(params)?;
        let dcols = d.dot(&w.t());

        let input_len = geometry.input_len();
        let mut dx = vec![0.; n * input_len];
        if !dx.is_empty() {
            let chunks: Vec<ArrayView2<f32>> =
                dcols.axis_chunks_iter(Axis(0), patches).collect();

            dx.par_chunks_mut(input_len)
                .zip(chunks.par_iter())
                .for_each(|(dx_row, dc)| geometry.col2im(dc.view(), dx_row));
        }

        Ok(Array2::from_shape_vec((n, input_len), dx)?)
    }

    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        check_len("conv2d gradient", grad.len(), self.size)?;

        let w_size = self.size - self.filters;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape((self.geometry.patch_len(), self.filters), dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.filters, db_raw)?;
        Ok((dw, db))
    }

    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        check_len("conv2d parameters", params.len(), self.size)?;

        let w_size = self.size - self.filters;
        let weights =
            ArrayView2::from_shape((self.geometry.patch_len(), self.filters), &params[..w_size])?;
        let biases = ArrayView1::from_shape(self.filters, &params[w_size..])?;
        Ok((weights, biases))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(h: usize, w: usize) -> Array2<f32> {
        Array2::from_shape_fn((1, h * w), |(_, i)| i as f32)
    }

    #[test]
    fn output_shape_shrinks_by_the_kernel() {
        let conv = Conv2d::new((28, 28, 1), 32, 3, None).unwrap();
        assert_eq!(conv.output_shape(), (26, 26, 32));
        assert_eq!(conv.size(), 3 * 3 * 32 + 32);
    }

    #[test]
    fn kernel_bigger_than_the_input_is_rejected() {
        assert!(Conv2d::new((2, 2, 1), 1, 3, None).is_none());
    }

    #[test]
    fn summing_kernel_adds_up_each_window() {
        let mut conv = Conv2d::new((3, 3, 1), 1, 2, None).unwrap();
        let params = [1.0, 1.0, 1.0, 1.0, 0.5];

        // 0 1 2
        // 3 4 5
        // 6 7 8
        let y = conv.forward(&params, image(3, 3).view()).unwrap();
        assert_eq!(y.as_slice().unwrap(), &[8.5, 12.5, 20.5, 24.5]);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut conv = Conv2d::new((4, 4, 2), 2, 3, None).unwrap();
        let params: Vec<f32> = (0..conv.size()).map(|i| (i as f32 * 0.37).sin()).collect();
        let x = Array2::from_shape_fn((2, 32), |(s, i)| ((s * 32 + i) as f32 * 0.11).cos());

        // loss = sum(y), so every delta is one.
        let y = conv.forward(&params, x.view()).unwrap();
        let mut grad = vec![0.; conv.size()];
        conv.backward(&params, &mut grad, Array2::ones(y.dim()))
            .unwrap();

        let eps = 1e-2;
        for i in [0, 5, 17, conv.size() - 1] {
            let mut plus = params.clone();
            plus[i] += eps;
            let mut minus = params.clone();
            minus[i] -= eps;

            let f_plus = conv.forward(&plus, x.view()).unwrap().sum();
            let f_minus = conv.forward(&minus, x.view()).unwrap().sum();
            let numeric = (f_plus - f_minus) / (2. * eps);

            assert!(
                (numeric - grad[i]).abs() < 1e-2,
                "param {i}: numeric {numeric} analytic {}",
                grad[i]
            );
        }
    }
}
