//! Max Pooling Layer
//!
//! Slides a `[rows, cols]` window over an input matrix without overlap and
//! keeps the largest value of each window. Windows at the right and bottom
//! edges may be smaller than the pool size.
//!
//! ```text
//! input 4x4, pool 2x2:
//!
//!  0.4  0.1 | -0.9 -0.5
//! -0.4  0.3 |  0.7 -0.3          0.4  0.7
//! ----------+-----------   ->
//!  0.8  0.2 |  0.6  0.7          0.8  0.7
//!  0.2 -0.1 |  0.6 -0.2
//! ```
//!
//! Backward routes each output error to the input element that won its window.

use super::parameters::LayerParameters;
use super::structure::{BackwardContext, LayerHelper, LayerIo};
use super::window::RecurrentWindow;
use crate::error::{LayerError, Result};
use crate::tensor::Tensor;

#[derive(Debug)]
pub struct MaxPoolingState {
    pool_size: [usize; 2],
    /// Input coordinates of the maximum of each output element (row-major)
    argmax: Vec<(usize, usize)>,
    input_shape: [usize; 2],
}

impl MaxPoolingState {
    pub fn new(pool_size: [usize; 2]) -> Self {
        Self {
            pool_size,
            argmax: Vec::new(),
            input_shape: [0, 0],
        }
    }

    pub fn pool_size(&self) -> [usize; 2] {
        self.pool_size
    }
}

impl LayerHelper for MaxPoolingState {
    fn forward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        _window: &RecurrentWindow,
    ) -> Result<()> {
        params.expect_empty()?;
        let x = io.input()?.as_dense()?;
        let [pr, pc] = self.pool_size;
        let out_rows = x.rows().div_ceil(pr);
        let out_cols = x.cols().div_ceil(pc);

        let mut y = Tensor::zeros(out_rows, out_cols);
        self.argmax.clear();
        for i in 0..out_rows {
            for j in 0..out_cols {
                let mut best = (i * pr, j * pc);
                for r in i * pr..((i + 1) * pr).min(x.rows()) {
                    for c in j * pc..((j + 1) * pc).min(x.cols()) {
                        if x.get(r, c) > x.get(best.0, best.1) {
                            best = (r, c);
                        }
                    }
                }
                y.set(i, j, x.get(best.0, best.1));
                self.argmax.push(best);
            }
        }
        self.input_shape = x.shape;
        io.set_output(y)
    }

    fn backward(
        &mut self,
        io: &mut LayerIo,
        _params: &LayerParameters,
        _grads: &mut LayerParameters,
        _window: &RecurrentWindow,
        ctx: &BackwardContext,
    ) -> Result<()> {
        if !ctx.propagate_to_input {
            return Ok(());
        }
        let g = ctx.restrict(&io.output_gradient()?);
        if g.len() != self.argmax.len() {
            return Err(LayerError::uninitialized("argmax"));
        }
        let [rows, cols] = self.input_shape;
        let mut gx = Tensor::zeros(rows, cols);
        for (&(r, c), &e) in self.argmax.iter().zip(&g.data) {
            gx.set(r, c, gx.get(r, c) + e);
        }
        io.assign_input_errors(0, gx)
    }
}
