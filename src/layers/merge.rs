//! Parameter-free Merge Layers
//!
//! ```text
//! Concat:   y = f([x1; x2; ...; xn])
//! Sum:      y = f(x1 + x2 + ... + xn)
//! Product:  y = f(x1 ⊙ x2 ⊙ ... ⊙ xn)
//! ```
//!
//! Backward, with `g = gy ⊙ f'`:
//!
//! ```text
//! Concat:   gxi = g[offset_i .. offset_i + len_i]
//! Sum:      gxi = g
//! Product:  gxi = g ⊙ Π_{j≠i} xj
//! ```

use super::parameters::LayerParameters;
use super::structure::{BackwardContext, LayerHelper, LayerIo};
use super::window::RecurrentWindow;
use crate::error::Result;
use crate::tensor::Tensor;

fn dense_inputs(io: &LayerIo) -> Result<Vec<Tensor>> {
    (0..io.inputs.len())
        .map(|i| Ok(io.input_at(i)?.as_dense()?.as_column()))
        .collect()
}

#[derive(Debug, Default)]
pub struct ConcatState;

impl LayerHelper for ConcatState {
    fn forward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        _window: &RecurrentWindow,
    ) -> Result<()> {
        params.expect_empty()?;
        let inputs = dense_inputs(io)?;
        let refs: Vec<&Tensor> = inputs.iter().collect();
        io.set_output(Tensor::concat_v(&refs))
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
        let sizes: Vec<usize> = dense_inputs(io)?.iter().map(Tensor::len).collect();
        let mut offset = 0;
        for (i, size) in sizes.into_iter().enumerate() {
            io.assign_input_errors(i, g.range(offset, offset + size))?;
            offset += size;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SumState;

impl LayerHelper for SumState {
    fn forward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        _window: &RecurrentWindow,
    ) -> Result<()> {
        params.expect_empty()?;
        let inputs = dense_inputs(io)?;
        let mut z = inputs[0].clone();
        for x in &inputs[1..] {
            z.assign_add(x);
        }
        io.set_output(z)
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
        for i in 0..io.inputs.len() {
            io.assign_input_errors(i, g.clone())?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ProductState;

impl LayerHelper for ProductState {
    fn forward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        _window: &RecurrentWindow,
    ) -> Result<()> {
        params.expect_empty()?;
        let inputs = dense_inputs(io)?;
        let mut z = inputs[0].clone();
        for x in &inputs[1..] {
            z.assign_prod(x);
        }
        io.set_output(z)
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
        let inputs = dense_inputs(io)?;
        for i in 0..inputs.len() {
            let mut gx = g.clone();
            for (j, x) in inputs.iter().enumerate() {
                if j != i {
                    gx.assign_prod(x);
                }
            }
            io.assign_input_errors(i, gx)?;
        }
        Ok(())
    }
}
