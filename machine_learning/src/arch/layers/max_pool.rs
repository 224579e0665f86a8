use ndarray::prelude::*;
use rayon::prelude::*;

use super::ImageShape;
use crate::{Result, error::check_len};

/// Non-overlapping max pooling over square windows of side `pool`.
///
/// Trailing rows and columns that don't fill a whole window are dropped.
#[derive(Clone, Debug)]
pub struct MaxPool2d {
    input: ImageShape,
    pool: usize,

    // Forward metadata, the input index that won each output cell.
    argmax: Vec<usize>,
}

impl MaxPool2d {
    /// Creates a new `MaxPool2d` layer.
    ///
    /// # Returns
    /// `None` if the window doesn't fit inside the input.
    pub fn new(input: ImageShape, pool: usize) -> Option<Self> {
        let (h, w, c) = input;
        if pool == 0 || pool > h || pool > w || c == 0 {
            return None;
        }

        Some(Self {
            input,
            pool,
            argmax: Vec::new(),
        })
    }

    pub fn input_shape(&self) -> ImageShape {
        self.input
    }

    pub fn output_shape(&self) -> ImageShape {
        let (h, w, c) = self.input;
        (h / self.pool, w / self.pool, c)
    }

    pub fn pool(&self) -> usize {
        self.pool
    }

    fn input_len(&self) -> usize {
        let (h, w, c) = self.input;
        h * w * c
    }

    fn output_len(&self) -> usize {
        let (h, w, c) = self.output_shape();
        h * w * c
    }

    pub fn forward(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_len("max pool input features", x.ncols(), self.input_len())?;

        let n = x.nrows();
        let out_len = self.output_len();
        let (_, w, c) = self.input;
        let (out_h, out_w, _) = self.output_shape();
        let pool = self.pool;

        let rows: Vec<ArrayView1<f32>> = x.outer_iter().collect();
        let mut out = vec![0.; n * out_len];
        let mut argmax = vec![0; n * out_len];

        if !out.is_empty() {
            out.par_chunks_mut(out_len)
                .zip(argmax.par_chunks_mut(out_len))
                .zip(rows.par_iter())
                .for_each(|((out, argmax), row)| {
                    for oi in 0..out_h {
                        for oj in 0..out_w {
                            for ch in 0..c {
                                let mut best = (0, f32::NEG_INFINITY);

                                for pi in 0..pool {
                                    for pj in 0..pool {
                                        let idx = ((oi * pool + pi) * w + oj * pool + pj) * c + ch;
                                        if row[idx] > best.1 {
                                            best = (idx, row[idx]);
                                        }
                                    }
                                }

                                let o = (oi * out_w + oj) * c + ch;
                                argmax[o] = best.0;
                                out[o] = best.1;
                            }
                        }
                    }
                });
        }

        self.argmax = argmax;
        Ok(Array2::from_shape_vec((n, out_len), out)?)
    }

    pub fn backward(&mut self, d: Array2<f32>) -> Result<Array2<f32>> {
        let n = d.nrows();
        let out_len = self.output_len();
        let in_len = self.input_len();
        check_len("max pool deltas", n * out_len, self.argmax.len())?;
        check_len("max pool delta features", d.ncols(), out_len)?;

        let rows: Vec<ArrayView1<f32>> = d.outer_iter().collect();
        let mut dx = vec![0.; n * in_len];

        if !dx.is_empty() {
            dx.par_chunks_mut(in_len)
                .zip(self.argmax.par_chunks(out_len))
                .zip(rows.par_iter())
                .for_each(|((dx, argmax), d)| {
                    for (o, &idx) in argmax.iter().enumerate() {
                        dx[idx] += d[o];
                    }
                });
        }

        Ok(Array2::from_shape_vec((n, in_len), dx)?)
    }
}
