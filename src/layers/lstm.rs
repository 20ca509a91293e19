//! Long Short-Term Memory (LSTM)
//!
//! ## Forward Pass
//!
//! ```text
//! i    = σ(Wi · x + bi + Wir · yPrev)          input gate
//! o    = σ(Wo · x + bo + Wor · yPrev)          output gate
//! f    = σ(Wf · x + bf + Wfr · yPrev)          forget gate
//! g    = act(Wc · x + bc + Wcr · yPrev)        candidate
//! cell = i ⊙ g + f ⊙ cellPrev
//! y    = o ⊙ act(cell)
//! ```
//!
//! The cell keeps its raw value as the pre-activation of its array, so the
//! next timestep reads `cellPrev` from there.
//!
//! ## Backward Pass
//!
//! ```text
//! gCell     = gy ⊙ o ⊙ act'(cell) + gCellNext
//! go        = gy ⊙ act(cell) ⊙ σ'
//! gi        = gCell ⊙ g ⊙ σ'
//! gf        = gCell ⊙ cellPrev ⊙ σ'
//! gg        = gCell ⊙ i ⊙ act'
//! gCellPrev = gCell ⊙ f                         (read back by the previous step)
//! ```

use super::parameters::{
    gates_input_errors, gates_recurrent_errors, GateParameters, LayerParameters, ParamsContainer,
};
use super::structure::{BackwardContext, LayerHelper, LayerIo, LayerState, LayerStructure};
use super::window::RecurrentWindow;
use crate::activation::ActivationFunction;
use crate::arrays::{ParamsArray, StatefulArray};
use crate::error::{LayerError, Result};
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LstmParameters {
    pub input_gate: GateParameters,
    pub output_gate: GateParameters,
    pub forget_gate: GateParameters,
    pub candidate: GateParameters,
}

impl LstmParameters {
    pub fn new(input_size: usize, output_size: usize, sparse_input: bool) -> Self {
        let gate = || GateParameters::recurrent(input_size, output_size, sparse_input);
        Self {
            input_gate: gate(),
            output_gate: gate(),
            forget_gate: gate(),
            candidate: gate(),
        }
    }
}

impl ParamsContainer for LstmParameters {
    fn params(&self) -> Vec<&ParamsArray> {
        let mut params = self.input_gate.params();
        params.extend(self.output_gate.params());
        params.extend(self.forget_gate.params());
        params.extend(self.candidate.params());
        params
    }

    fn params_mut(&mut self) -> Vec<&mut ParamsArray> {
        let mut params = self.input_gate.params_mut();
        params.extend(self.output_gate.params_mut());
        params.extend(self.forget_gate.params_mut());
        params.extend(self.candidate.params_mut());
        params
    }
}

#[derive(Debug)]
pub struct LstmState {
    pub input_gate: StatefulArray,
    pub output_gate: StatefulArray,
    pub forget_gate: StatefulArray,
    pub candidate: StatefulArray,
    pub cell: StatefulArray,
    /// Cell errors sent to the previous timestep by the last backward
    prev_cell_errors: Option<Tensor>,
}

impl LstmState {
    pub fn new(size: usize, activation: Option<ActivationFunction>) -> Self {
        let gate = || StatefulArray::with_size(size, Some(ActivationFunction::Sigmoid));
        Self {
            input_gate: gate(),
            output_gate: gate(),
            forget_gate: gate(),
            candidate: StatefulArray::with_size(size, activation),
            cell: StatefulArray::with_size(size, activation),
            prev_cell_errors: None,
        }
    }
}

fn lstm_state(window_layer: Option<&LayerStructure>) -> Result<Option<&LstmState>> {
    match window_layer {
        None => Ok(None),
        Some(layer) => match &layer.state {
            LayerState::LSTM(state) => Ok(Some(state)),
            _ => Err(LayerError::config(
                "recurrent window of an LSTM layer holds another layer type",
            )),
        },
    }
}

impl LayerHelper for LstmState {
    fn forward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        window: &RecurrentWindow,
    ) -> Result<()> {
        let p = params.lstm()?;
        let y_prev = window.prev_output()?;
        let x = io.input()?;

        self.input_gate
            .assign_activated(p.input_gate.forward(x, y_prev)?)?;
        self.output_gate
            .assign_activated(p.output_gate.forward(x, y_prev)?)?;
        self.forget_gate
            .assign_activated(p.forget_gate.forward(x, y_prev)?)?;
        self.candidate
            .assign_activated(p.candidate.forward(x, y_prev)?)?;

        let mut cell = self
            .input_gate
            .dense_values()?
            .prod(self.candidate.dense_values()?);
        if let Some(prev) = lstm_state(window.prev_state_layer())? {
            let cell_prev = prev.cell.values_not_activated()?;
            cell.assign_add(&self.forget_gate.dense_values()?.prod(cell_prev));
        }
        self.cell.assign_activated(cell)?;

        let y = self.output_gate.dense_values()?.prod(self.cell.dense_values()?);
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
        let p = params.lstm()?;
        let gy = io.output_gradient()?;
        let y_prev = window.prev_output()?;
        let prev = lstm_state(window.prev_state_layer())?;
        let next = lstm_state(window.next_state_layer())?;

        let i = self.input_gate.dense_values()?;
        let o = self.output_gate.dense_values()?;
        let f = self.forget_gate.dense_values()?;
        let g = self.candidate.dense_values()?;
        let cell_act = self.cell.dense_values()?;

        let mut g_cell = gy.prod(o).prod(&self.cell.calculate_activation_deriv()?);
        if let Some(next_errors) = next.and_then(|n| n.prev_cell_errors.as_ref()) {
            g_cell.assign_add(next_errors);
        }

        let go = gy
            .prod(cell_act)
            .prod(&self.output_gate.calculate_activation_deriv()?);
        let gi = g_cell
            .prod(g)
            .prod(&self.input_gate.calculate_activation_deriv()?);
        let gg = g_cell
            .prod(i)
            .prod(&self.candidate.calculate_activation_deriv()?);
        let gf = match prev {
            Some(prev) => g_cell
                .prod(prev.cell.values_not_activated()?)
                .prod(&self.forget_gate.calculate_activation_deriv()?),
            None => Tensor::zeros(g_cell.rows(), 1),
        };

        let x = io.input()?;
        let grads = grads.lstm_mut()?;
        grads.input_gate.assign_grads(&gi, x, y_prev)?;
        grads.output_gate.assign_grads(&go, x, y_prev)?;
        grads.forget_gate.assign_grads(&gf, x, y_prev)?;
        grads.candidate.assign_grads(&gg, x, y_prev)?;

        if prev.is_some() {
            let prev_cell_errors = g_cell.prod(f);
            *io.prev_state_errors = Some(gates_recurrent_errors(&[
                (&p.input_gate, &gi),
                (&p.output_gate, &go),
                (&p.forget_gate, &gf),
                (&p.candidate, &gg),
            ])?);
            self.prev_cell_errors = Some(prev_cell_errors);
        } else {
            self.prev_cell_errors = None;
        }

        if ctx.propagate_to_input {
            let gx = gates_input_errors(
                ctx,
                &[
                    (&p.input_gate, &gi),
                    (&p.output_gate, &go),
                    (&p.forget_gate, &gf),
                    (&p.candidate, &gg),
                ],
            )?;
            io.assign_input_errors(0, gx)?;
        }
        Ok(())
    }
}
