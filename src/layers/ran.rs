//! Recurrent Additive Network (RAN)
//!
//! The candidate is a plain linear projection of the input; only the gates
//! look at the previous output:
//!
//! ```text
//! i = σ(Wi · x + bi + Wir · yPrev)
//! f = σ(Wf · x + bf + Wfr · yPrev)
//! c = Wc · x + bc
//! y = f(i ⊙ c + f ⊙ yPrev)
//! ```
//!
//! The configured activation sits on the output. Backward, with
//! `gz = gy ⊙ f'(z)`:
//!
//! ```text
//! gc     = gz ⊙ i
//! gi     = gz ⊙ c ⊙ σ'
//! gf     = gz ⊙ yPrev ⊙ σ'
//! gyPrev = gz ⊙ f + Wirᵀ · gi + Wfrᵀ · gf
//! ```

use super::parameters::{
    gates_input_errors, gates_recurrent_errors, GateParameters, LayerParameters, ParamsContainer,
};
use super::structure::{BackwardContext, LayerHelper, LayerIo};
use super::window::RecurrentWindow;
use crate::activation::ActivationFunction;
use crate::arrays::{ParamsArray, StatefulArray};
use crate::error::Result;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RanParameters {
    pub input_gate: GateParameters,
    pub forget_gate: GateParameters,
    pub candidate: GateParameters,
}

impl RanParameters {
    pub fn new(input_size: usize, output_size: usize, sparse_input: bool) -> Self {
        Self {
            input_gate: GateParameters::recurrent(input_size, output_size, sparse_input),
            forget_gate: GateParameters::recurrent(input_size, output_size, sparse_input),
            candidate: GateParameters::new(input_size, output_size, sparse_input),
        }
    }
}

impl ParamsContainer for RanParameters {
    fn params(&self) -> Vec<&ParamsArray> {
        let mut params = self.input_gate.params();
        params.extend(self.forget_gate.params());
        params.extend(self.candidate.params());
        params
    }

    fn params_mut(&mut self) -> Vec<&mut ParamsArray> {
        let mut params = self.input_gate.params_mut();
        params.extend(self.forget_gate.params_mut());
        params.extend(self.candidate.params_mut());
        params
    }
}

#[derive(Debug)]
pub struct RanState {
    pub input_gate: StatefulArray,
    pub forget_gate: StatefulArray,
    pub candidate: StatefulArray,
}

impl RanState {
    pub fn new(size: usize) -> Self {
        Self {
            input_gate: StatefulArray::with_size(size, Some(ActivationFunction::Sigmoid)),
            forget_gate: StatefulArray::with_size(size, Some(ActivationFunction::Sigmoid)),
            candidate: StatefulArray::with_size(size, None),
        }
    }
}

impl LayerHelper for RanState {
    fn forward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        window: &RecurrentWindow,
    ) -> Result<()> {
        let p = params.ran()?;
        let y_prev = window.prev_output()?;
        let x = io.input()?;

        self.input_gate
            .assign_activated(p.input_gate.forward(x, y_prev)?)?;
        self.forget_gate
            .assign_activated(p.forget_gate.forward(x, y_prev)?)?;
        self.candidate.assign_values(p.candidate.forward(x, None)?)?;

        let mut z = self
            .input_gate
            .dense_values()?
            .prod(self.candidate.dense_values()?);
        if let Some(y_prev) = y_prev {
            z.assign_add(&self.forget_gate.dense_values()?.prod(y_prev));
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
        let p = params.ran()?;
        let gz = io.output_gradient()?;
        let y_prev = window.prev_output()?;

        let i = self.input_gate.dense_values()?;
        let f = self.forget_gate.dense_values()?;
        let c = self.candidate.dense_values()?;

        let gc = gz.prod(i);
        let gi = gz.prod(c).prod(&self.input_gate.calculate_activation_deriv()?);
        let gf = match y_prev {
            Some(y_prev) => gz
                .prod(y_prev)
                .prod(&self.forget_gate.calculate_activation_deriv()?),
            None => Tensor::zeros(gz.rows(), 1),
        };

        let x = io.input()?;
        let g = grads.ran_mut()?;
        g.input_gate.assign_grads(&gi, x, y_prev)?;
        g.forget_gate.assign_grads(&gf, x, y_prev)?;
        g.candidate.assign_grads(&gc, x, None)?;

        if y_prev.is_some() {
            let mut gy_prev = gz.prod(f);
            gy_prev.assign_add(&gates_recurrent_errors(&[
                (&p.input_gate, &gi),
                (&p.forget_gate, &gf),
            ])?);
            *io.prev_state_errors = Some(gy_prev);
        }

        if ctx.propagate_to_input {
            let gx = gates_input_errors(
                ctx,
                &[
                    (&p.input_gate, &gi),
                    (&p.forget_gate, &gf),
                    (&p.candidate, &gc),
                ],
            )?;
            io.assign_input_errors(0, gx)?;
        }
        Ok(())
    }
}
