//! Delta-RNN
//!
//! The input and recurrent projections are shared between the candidate and
//! the partition gate, and mixed through learned element-wise coefficients:
//!
//! ```text
//! wx = W · x
//! wy = Wr · yPrev                              (zero at the first timestep)
//! c  = f(α ⊙ wx ⊙ wy + β1 ⊙ wy + β2 ⊙ wx + bc)
//! p  = σ(wx + bp)
//! y  = p ⊙ c + (1 - p) ⊙ yPrev
//! ```
//!
//! ## Backward Pass
//!
//! ```text
//! gc     = gy ⊙ p ⊙ f'
//! gp     = gy ⊙ (c - yPrev) ⊙ σ'
//! gwx    = gc ⊙ (α ⊙ wy + β2) + gp
//! gwy    = gc ⊙ (α ⊙ wx + β1)
//! gyPrev = Wrᵀ · gwy + gy ⊙ (1 - p)
//! gx     = Wᵀ · gwx
//! ```

use super::parameters::{LayerParameters, ParamsContainer};
use super::structure::{BackwardContext, LayerHelper, LayerIo};
use super::window::RecurrentWindow;
use crate::activation::ActivationFunction;
use crate::arrays::{ParamsArray, StatefulArray};
use crate::error::Result;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeltaRnnParameters {
    pub feedforward_weights: ParamsArray,
    pub recurrent_weights: ParamsArray,
    pub alpha: ParamsArray,
    pub beta1: ParamsArray,
    pub beta2: ParamsArray,
    pub candidate_biases: ParamsArray,
    pub partition_biases: ParamsArray,
}

impl DeltaRnnParameters {
    pub fn new(input_size: usize, output_size: usize, sparse_input: bool) -> Self {
        Self {
            feedforward_weights: ParamsArray::weights(output_size, input_size, sparse_input),
            recurrent_weights: ParamsArray::weights(output_size, output_size, false),
            alpha: ParamsArray::weights(output_size, 1, false),
            beta1: ParamsArray::weights(output_size, 1, false),
            beta2: ParamsArray::weights(output_size, 1, false),
            candidate_biases: ParamsArray::biases(output_size),
            partition_biases: ParamsArray::biases(output_size),
        }
    }
}

impl ParamsContainer for DeltaRnnParameters {
    fn params(&self) -> Vec<&ParamsArray> {
        vec![
            &self.feedforward_weights,
            &self.recurrent_weights,
            &self.alpha,
            &self.beta1,
            &self.beta2,
            &self.candidate_biases,
            &self.partition_biases,
        ]
    }

    fn params_mut(&mut self) -> Vec<&mut ParamsArray> {
        vec![
            &mut self.feedforward_weights,
            &mut self.recurrent_weights,
            &mut self.alpha,
            &mut self.beta1,
            &mut self.beta2,
            &mut self.candidate_biases,
            &mut self.partition_biases,
        ]
    }
}

#[derive(Debug)]
pub struct DeltaRnnState {
    pub candidate: StatefulArray,
    pub partition_gate: StatefulArray,
    /// `W · x`
    pub input_projection: StatefulArray,
    /// `Wr · yPrev`
    pub recurrent_projection: StatefulArray,
}

impl DeltaRnnState {
    pub fn new(size: usize, activation: Option<ActivationFunction>) -> Self {
        Self {
            candidate: StatefulArray::with_size(size, activation),
            partition_gate: StatefulArray::with_size(size, Some(ActivationFunction::Sigmoid)),
            input_projection: StatefulArray::with_size(size, None),
            recurrent_projection: StatefulArray::with_size(size, None),
        }
    }
}

impl LayerHelper for DeltaRnnState {
    fn forward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        window: &RecurrentWindow,
    ) -> Result<()> {
        let p = params.delta_rnn()?;
        let y_prev = window.prev_output()?;

        let wx = io.input()?.left_dot(p.feedforward_weights.dense()?);
        let wy = match y_prev {
            Some(y_prev) => p.recurrent_weights.dense()?.dot(y_prev),
            None => Tensor::zeros(wx.rows(), 1),
        };

        let alpha = p.alpha.dense()?;
        let mut c = alpha.prod(&wx).prod(&wy);
        c.assign_add(&p.beta1.dense()?.prod(&wy))
            .assign_add(&p.beta2.dense()?.prod(&wx))
            .assign_add(p.candidate_biases.dense()?);
        self.candidate.assign_activated(c)?;
        self.partition_gate
            .assign_activated(wx.add(p.partition_biases.dense()?))?;

        let pg = self.partition_gate.dense_values()?;
        let mut y = pg.prod(self.candidate.dense_values()?);
        if let Some(y_prev) = y_prev {
            y.assign_add(&pg.reverse().prod(y_prev));
        }

        self.input_projection.assign_values(wx)?;
        self.recurrent_projection.assign_values(wy)?;
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
        let p = params.delta_rnn()?;
        let gy = io.output_gradient()?;
        let y_prev = window.prev_output()?;

        let c = self.candidate.dense_values()?;
        let pg = self.partition_gate.dense_values()?;
        let wx = self.input_projection.dense_values()?;
        let wy = self.recurrent_projection.dense_values()?;
        let alpha = p.alpha.dense()?;

        let gc = gy.prod(pg).prod(&self.candidate.calculate_activation_deriv()?);
        let c_minus_prev = match y_prev {
            Some(y_prev) => c.sub(y_prev),
            None => c.clone(),
        };
        let gp = gy
            .prod(&c_minus_prev)
            .prod(&self.partition_gate.calculate_activation_deriv()?);

        let mut g_wx = gc.prod(&alpha.prod(wy).add(p.beta2.dense()?));
        g_wx.assign_add(&gp);
        let g_wy = gc.prod(&alpha.prod(wx).add(p.beta1.dense()?));

        let x = io.input()?;
        let g = grads.delta_rnn_mut()?;
        g.feedforward_weights.set_values(x.outer_from(&g_wx))?;
        match y_prev {
            Some(y_prev) => g.recurrent_weights.set_values(g_wy.outer(y_prev))?,
            None => g.recurrent_weights.zero(),
        }
        g.alpha.set_values(gc.prod(wx).prod(wy))?;
        g.beta1.set_values(gc.prod(wy))?;
        g.beta2.set_values(gc.prod(wx))?;
        g.candidate_biases.set_values(gc.clone())?;
        g.partition_biases.set_values(gp)?;

        if y_prev.is_some() {
            let mut gy_prev = p.recurrent_weights.dense()?.t().dot(&g_wy);
            gy_prev.assign_add(&gy.prod(&pg.reverse()));
            *io.prev_state_errors = Some(gy_prev);
        }

        if ctx.propagate_to_input {
            let gx = p
                .feedforward_weights
                .dense()?
                .t()
                .dot(&ctx.restrict(&g_wx));
            io.assign_input_errors(0, gx)?;
        }
        Ok(())
    }
}
