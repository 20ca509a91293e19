//! Gated Recurrent Unit (GRU)
//!
//! ## Forward Pass
//!
//! ```text
//! r = σ(Wr · x + br + Wrr · yPrev)             reset gate
//! p = σ(Wp · x + bp + Wpr · yPrev)             partition gate
//! c = f(Wc · x + bc + Wcr · (r ⊙ yPrev))       candidate
//! y = p ⊙ c + (1 - p) ⊙ yPrev
//! ```
//!
//! At the first timestep `yPrev` is absent: the recurrent terms vanish and
//! `y = p ⊙ c`. The configured activation applies to the candidate.
//!
//! ## Backward Pass
//!
//! ```text
//! gc = gy ⊙ p ⊙ f'
//! gp = gy ⊙ (c - yPrev) ⊙ σ'
//! gr = (Wcrᵀ · gc) ⊙ yPrev ⊙ σ'
//! gyPrev = gy ⊙ (1 - p) + Wrrᵀ · gr + Wprᵀ · gp + (Wcrᵀ · gc) ⊙ r
//! ```

use super::parameters::{gates_input_errors, GateParameters, LayerParameters, ParamsContainer};
use super::structure::{BackwardContext, LayerHelper, LayerIo};
use super::window::RecurrentWindow;
use crate::activation::ActivationFunction;
use crate::arrays::{ParamsArray, StatefulArray};
use crate::error::Result;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GruParameters {
    pub candidate: GateParameters,
    pub reset_gate: GateParameters,
    pub partition_gate: GateParameters,
}

impl GruParameters {
    pub fn new(input_size: usize, output_size: usize, sparse_input: bool) -> Self {
        Self {
            candidate: GateParameters::recurrent(input_size, output_size, sparse_input),
            reset_gate: GateParameters::recurrent(input_size, output_size, sparse_input),
            partition_gate: GateParameters::recurrent(input_size, output_size, sparse_input),
        }
    }
}

impl ParamsContainer for GruParameters {
    fn params(&self) -> Vec<&ParamsArray> {
        let mut params = self.candidate.params();
        params.extend(self.reset_gate.params());
        params.extend(self.partition_gate.params());
        params
    }

    fn params_mut(&mut self) -> Vec<&mut ParamsArray> {
        let mut params = self.candidate.params_mut();
        params.extend(self.reset_gate.params_mut());
        params.extend(self.partition_gate.params_mut());
        params
    }
}

#[derive(Debug)]
pub struct GruState {
    pub candidate: StatefulArray,
    pub reset_gate: StatefulArray,
    pub partition_gate: StatefulArray,
}

impl GruState {
    pub fn new(size: usize, activation: Option<ActivationFunction>) -> Self {
        Self {
            candidate: StatefulArray::with_size(size, activation),
            reset_gate: StatefulArray::with_size(size, Some(ActivationFunction::Sigmoid)),
            partition_gate: StatefulArray::with_size(size, Some(ActivationFunction::Sigmoid)),
        }
    }
}

impl LayerHelper for GruState {
    fn forward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        window: &RecurrentWindow,
    ) -> Result<()> {
        let p = params.gru()?;
        let y_prev = window.prev_output()?;
        let x = io.input()?;

        self.reset_gate
            .assign_activated(p.reset_gate.forward(x, y_prev)?)?;
        self.partition_gate
            .assign_activated(p.partition_gate.forward(x, y_prev)?)?;

        let r = self.reset_gate.dense_values()?;
        let r_y_prev = y_prev.map(|y| r.prod(y));
        self.candidate
            .assign_activated(p.candidate.forward(x, r_y_prev.as_ref())?)?;

        let c = self.candidate.dense_values()?;
        let pg = self.partition_gate.dense_values()?;
        let mut y = pg.prod(c);
        if let Some(y_prev) = y_prev {
            y.assign_add(&pg.reverse().prod(y_prev));
        }
        io.set_output(y)
    }

    fn backward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        grads: &mut LayerParameters,
        window: &RecurrentWindow,
        ctx: &BackwardContext,
    ) -> Result<()> {
        let p = params.gru()?;
        let gy = io.output_gradient()?;
        let y_prev = window.prev_output()?;

        let c = self.candidate.dense_values()?;
        let r = self.reset_gate.dense_values()?;
        let pg = self.partition_gate.dense_values()?;

        let gc = gy.prod(pg).prod(&self.candidate.calculate_activation_deriv()?);
        let p_deriv = self.partition_gate.calculate_activation_deriv()?;
        let (gp, gr, wcr_gc) = match y_prev {
            Some(y_prev) => {
                let wcr_gc = p.candidate.recurrent_errors(&gc)?;
                let gp = gy.prod(&c.sub(y_prev)).prod(&p_deriv);
                let gr = wcr_gc
                    .prod(y_prev)
                    .prod(&self.reset_gate.calculate_activation_deriv()?);
                (gp, gr, Some(wcr_gc))
            }
            None => (gy.prod(c).prod(&p_deriv), Tensor::zeros(gc.rows(), 1), None),
        };

        let x = io.input()?;
        let g = grads.gru_mut()?;
        let r_y_prev = y_prev.map(|y| r.prod(y));
        g.candidate.assign_grads(&gc, x, r_y_prev.as_ref())?;
        g.reset_gate.assign_grads(&gr, x, y_prev)?;
        g.partition_gate.assign_grads(&gp, x, y_prev)?;

        if let Some(wcr_gc) = wcr_gc {
            let mut gy_prev = gy.prod(&pg.reverse());
            gy_prev.assign_add(&p.reset_gate.recurrent_errors(&gr)?);
            gy_prev.assign_add(&p.partition_gate.recurrent_errors(&gp)?);
            gy_prev.assign_add(&wcr_gc.prod(r));
            *io.prev_state_errors = Some(gy_prev);
        }

        if ctx.propagate_to_input {
            let gx = gates_input_errors(
                ctx,
                &[
                    (&p.candidate, &gc),
                    (&p.reset_gate, &gr),
                    (&p.partition_gate, &gp),
                ],
            )?;
            io.assign_input_errors(0, gx)?;
        }
        Ok(())
    }
}
