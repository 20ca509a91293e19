//! Independently Recurrent Layer (IndRNN)
//!
//! Each output unit only sees its own previous value:
//!
//! ```text
//! y(t) = f(W · x(t) + b + wrec ⊙ y(t-1))
//! ```
//!
//! `wrec` is a vector, so the recurrent gradients are element-wise:
//!
//! ```text
//! g        = gy ⊙ f'(z)
//! gwrec    = g ⊙ y(t-1)
//! gy(t-1) += wrec ⊙ g
//! ```

use super::parameters::{GateParameters, LayerParameters};
use super::structure::{BackwardContext, LayerHelper, LayerIo};
use super::window::RecurrentWindow;
use crate::error::{LayerError, Result};
use crate::tensor::Tensor;

#[derive(Debug, Default)]
pub struct IndRnnState;

fn recurrent_vector(p: &GateParameters) -> Result<&Tensor> {
    p.recurrent_weights
        .as_ref()
        .ok_or_else(|| LayerError::config("IndRNN parameters without recurrent weights"))?
        .dense()
}

impl LayerHelper for IndRnnState {
    fn forward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        window: &RecurrentWindow,
    ) -> Result<()> {
        let p = params.ind_rnn()?;
        let mut z = p.forward(io.input()?, None)?;
        if let Some(y_prev) = window.prev_output()? {
            z.assign_add(&recurrent_vector(p)?.prod(y_prev));
        }
        io.set_output(z)
    }

    fn backward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        grads: &mut LayerParameters,
        window: &RecurrentWindow,
        ctx: &BackwardContext,
    ) -> Result<()> {
        let p = params.ind_rnn()?;
        let g = io.output_gradient()?;
        let y_prev = window.prev_output()?;

        let gp = grads.ind_rnn_mut()?;
        gp.assign_grads(&g, io.input()?, None)?;
        if let Some(grec) = gp.recurrent_weights.as_mut() {
            match y_prev {
                Some(y_prev) => grec.set_values(g.prod(y_prev))?,
                None => grec.zero(),
            }
        }

        if y_prev.is_some() {
            *io.prev_state_errors = Some(recurrent_vector(p)?.prod(&g));
        }

        if ctx.propagate_to_input {
            let gx = p.input_errors(&ctx.restrict(&g))?;
            io.assign_input_errors(0, gx)?;
        }
        Ok(())
    }
}
