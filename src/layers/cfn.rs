//! Chaos-Free Network (CFN)
//!
//! A recurrent unit whose dynamics are kept predictable by gating an
//! input-only candidate and the squashed previous output:
//!
//! ```text
//! i = σ(Wi · x + bi + Wir · yPrev)       input gate
//! f = σ(Wf · x + bf + Wfr · yPrev)       forget gate
//! c = act(Wc · x)                        candidate (no bias, no recurrence)
//! y = i ⊙ c + f ⊙ act(yPrev)
//! ```
//!
//! Backward:
//!
//! ```text
//! gc     = gy ⊙ i ⊙ act'
//! gi     = gy ⊙ c ⊙ σ'
//! gf     = gy ⊙ act(yPrev) ⊙ σ'
//! gyPrev = gy ⊙ f ⊙ act'(yPrev) + Wirᵀ · gi + Wfrᵀ · gf
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
pub struct CfnParameters {
    pub input_gate: GateParameters,
    pub forget_gate: GateParameters,
    pub candidate_weights: ParamsArray,
}

impl CfnParameters {
    pub fn new(input_size: usize, output_size: usize, sparse_input: bool) -> Self {
        Self {
            input_gate: GateParameters::recurrent(input_size, output_size, sparse_input),
            forget_gate: GateParameters::recurrent(input_size, output_size, sparse_input),
            candidate_weights: ParamsArray::weights(output_size, input_size, sparse_input),
        }
    }
}

impl ParamsContainer for CfnParameters {
    fn params(&self) -> Vec<&ParamsArray> {
        let mut params = self.input_gate.params();
        params.extend(self.forget_gate.params());
        params.push(&self.candidate_weights);
        params
    }

    fn params_mut(&mut self) -> Vec<&mut ParamsArray> {
        let mut params = self.input_gate.params_mut();
        params.extend(self.forget_gate.params_mut());
        params.push(&mut self.candidate_weights);
        params
    }
}

#[derive(Debug)]
pub struct CfnState {
    pub input_gate: StatefulArray,
    pub forget_gate: StatefulArray,
    pub candidate: StatefulArray,
    activation: Option<ActivationFunction>,
}

impl CfnState {
    pub fn new(size: usize, activation: Option<ActivationFunction>) -> Self {
        Self {
            input_gate: StatefulArray::with_size(size, Some(ActivationFunction::Sigmoid)),
            forget_gate: StatefulArray::with_size(size, Some(ActivationFunction::Sigmoid)),
            candidate: StatefulArray::with_size(size, activation),
            activation,
        }
    }

    /// `act(yPrev)`
    fn squash(&self, y_prev: &Tensor) -> Tensor {
        match self.activation {
            Some(f) => f.f(y_prev),
            None => y_prev.clone(),
        }
    }

    /// `act'(yPrev)`
    fn squash_deriv(&self, y_prev: &Tensor) -> Tensor {
        match self.activation {
            Some(f) => f.df(y_prev),
            None => Tensor::fill(y_prev.rows(), y_prev.cols(), 1.0),
        }
    }
}

impl LayerHelper for CfnState {
    fn forward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        window: &RecurrentWindow,
    ) -> Result<()> {
        let p = params.cfn()?;
        let y_prev = window.prev_output()?;
        let x = io.input()?;

        self.input_gate
            .assign_activated(p.input_gate.forward(x, y_prev)?)?;
        self.forget_gate
            .assign_activated(p.forget_gate.forward(x, y_prev)?)?;
        self.candidate
            .assign_activated(x.left_dot(p.candidate_weights.dense()?))?;

        let mut y = self
            .input_gate
            .dense_values()?
            .prod(self.candidate.dense_values()?);
        if let Some(y_prev) = y_prev {
            y.assign_add(&self.forget_gate.dense_values()?.prod(&self.squash(y_prev)));
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
        let p = params.cfn()?;
        let gy = io.output_gradient()?;
        let y_prev = window.prev_output()?;

        let i = self.input_gate.dense_values()?;
        let f = self.forget_gate.dense_values()?;
        let c = self.candidate.dense_values()?;

        let gc = gy.prod(i).prod(&self.candidate.calculate_activation_deriv()?);
        let gi = gy.prod(c).prod(&self.input_gate.calculate_activation_deriv()?);
        let gf = match y_prev {
            Some(y_prev) => gy
                .prod(&self.squash(y_prev))
                .prod(&self.forget_gate.calculate_activation_deriv()?),
            None => Tensor::zeros(gy.rows(), 1),
        };

        let x = io.input()?;
        let g = grads.cfn_mut()?;
        g.input_gate.assign_grads(&gi, x, y_prev)?;
        g.forget_gate.assign_grads(&gf, x, y_prev)?;
        g.candidate_weights.set_values(x.outer_from(&gc))?;

        if let Some(y_prev) = y_prev {
            let mut gy_prev = gy.prod(f).prod(&self.squash_deriv(y_prev));
            gy_prev.assign_add(&gates_recurrent_errors(&[
                (&p.input_gate, &gi),
                (&p.forget_gate, &gf),
            ])?);
            *io.prev_state_errors = Some(gy_prev);
        }

        if ctx.propagate_to_input {
            let mut gx = gates_input_errors(ctx, &[(&p.input_gate, &gi), (&p.forget_gate, &gf)])?;
            gx.assign_add(&p.candidate_weights.dense()?.t().dot(&ctx.restrict(&gc)));
            io.assign_input_errors(0, gx)?;
        }
        Ok(())
    }
}
