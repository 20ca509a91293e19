//! Affine Merge Layer
//!
//! ```text
//! y = f(W1 · x1 + W2 · x2 + ... + Wn · xn + b)
//! ```
//!
//! Each input has its own weights; the bias is shared. Backward gives every
//! input `gxi = Wiᵀ · g` with `g = gy ⊙ f'`.

use super::parameters::{LayerParameters, ParamsContainer};
use super::structure::{BackwardContext, LayerHelper, LayerIo};
use super::window::RecurrentWindow;
use crate::arrays::ParamsArray;
use crate::error::{LayerError, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AffineParameters {
    /// One weight matrix per input, `[out, in_i]`
    pub weights: Vec<ParamsArray>,
    pub biases: ParamsArray,
}

impl AffineParameters {
    pub fn new(input_sizes: &[usize], output_size: usize, sparse_input: bool) -> Self {
        Self {
            weights: input_sizes
                .iter()
                .map(|&n| ParamsArray::weights(output_size, n, sparse_input))
                .collect(),
            biases: ParamsArray::biases(output_size),
        }
    }
}

impl ParamsContainer for AffineParameters {
    fn params(&self) -> Vec<&ParamsArray> {
        let mut params: Vec<&ParamsArray> = self.weights.iter().collect();
        params.push(&self.biases);
        params
    }

    fn params_mut(&mut self) -> Vec<&mut ParamsArray> {
        let mut params: Vec<&mut ParamsArray> = self.weights.iter_mut().collect();
        params.push(&mut self.biases);
        params
    }
}

#[derive(Debug, Default)]
pub struct AffineState;

fn check_inputs(io: &LayerIo, p: &AffineParameters) -> Result<()> {
    if io.inputs.len() != p.weights.len() {
        return Err(LayerError::config(format!(
            "Affine layer with {} inputs and {} weight matrices",
            io.inputs.len(),
            p.weights.len()
        )));
    }
    Ok(())
}

impl LayerHelper for AffineState {
    fn forward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        _window: &RecurrentWindow,
    ) -> Result<()> {
        let p = params.affine()?;
        check_inputs(io, p)?;

        let mut z = p.biases.dense()?.clone();
        for (i, w) in p.weights.iter().enumerate() {
            z.assign_add(&io.input_at(i)?.left_dot(w.dense()?));
        }
        io.set_output(z)
    }

    fn backward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        grads: &mut LayerParameters,
        _window: &RecurrentWindow,
        ctx: &BackwardContext,
    ) -> Result<()> {
        let p = params.affine()?;
        check_inputs(io, p)?;
        let g = io.output_gradient()?;

        let gp = grads.affine_mut()?;
        for (i, gw) in gp.weights.iter_mut().enumerate() {
            gw.set_values(io.input_at(i)?.outer_from(&g))?;
        }
        gp.biases.set_values(g.clone())?;

        if ctx.propagate_to_input {
            let g = ctx.restrict(&g);
            for (i, w) in p.weights.iter().enumerate() {
                io.assign_input_errors(i, w.dense()?.t().dot(&g))?;
            }
        }
        Ok(())
    }
}
