//! Layer Structure
//!
//! A [`LayerStructure`] is the live instance of one layer: its input arrays,
//! its output array and the intermediate arrays its connection type needs
//! between forward and backward (gates, candidates, attention scores, ...).
//! Parameters are not owned by the structure. They are passed to every call,
//! so that the structures of all the timesteps of a sequence share one set.
//!
//! ## Cycle
//!
//! ```text
//! set_input(x)                       inputs[0].values = x
//! forward(params, dropout, window)   output.values    = f(x, params, yPrev)
//! set_errors(gy)                     output.errors    = gy
//! backward(params, grads, ...)       grads            = ∂loss/∂params
//!                                    inputs[i].errors = ∂loss/∂x_i
//! ```
//!
//! ## Variants
//!
//! Each connection type implements [`LayerHelper`] on its own state type;
//! [`LayerState`] tags them and hands out the helper for dispatch.

use super::affine::AffineState;
use super::attention::AttentionState;
use super::biaffine::BiaffineState;
use super::cfn::CfnState;
use super::delta_rnn::DeltaRnnState;
use super::dropout::{Dropout, DropoutMask};
use super::feedforward::FeedforwardState;
use super::gru::GruState;
use super::highway::HighwayState;
use super::ind_rnn::IndRnnState;
use super::lstm::LstmState;
use super::max_pooling::MaxPoolingState;
use super::merge::{ConcatState, ProductState, SumState};
use super::meprop;
use super::parameters::LayerParameters;
use super::ran::RanState;
use super::simple_recurrent::SimpleRecurrentState;
use super::squared_distance::SquaredDistanceState;
use super::window::RecurrentWindow;
use crate::arrays::StatefulArray;
use crate::config::{LayerConfiguration, LayerType};
use crate::error::{LayerError, Result};
use crate::tensor::{AnyTensor, Tensor};

/// Per-output-unit contributions recorded by a forward pass
///
/// `input[j][i]` is the share of the pre-activation of output unit `j` coming
/// from input element `i`; `recurrent[j][k]` the share coming from element `k`
/// of the previous output. Each row sums to the pre-activation of its unit.
#[derive(Clone, Debug)]
pub struct LayerContributions {
    pub input: Tensor,
    pub recurrent: Option<Tensor>,
}

/// Borrowed arrays of a structure, handed to the variant helpers
pub(crate) struct LayerIo<'a> {
    pub inputs: &'a mut [StatefulArray],
    pub output: &'a mut StatefulArray,
    /// Errors this timestep sends to the output of the previous timestep
    pub prev_state_errors: &'a mut Option<Tensor>,
}

impl LayerIo<'_> {
    pub fn input(&self) -> Result<&AnyTensor> {
        self.input_at(0)
    }

    pub fn input_at(&self, index: usize) -> Result<&AnyTensor> {
        self.inputs
            .get(index)
            .ok_or_else(|| LayerError::config(format!("missing input {}", index)))?
            .values()
    }

    /// Output errors times the activation derivative
    pub fn output_gradient(&self) -> Result<Tensor> {
        let errors = self.output.errors()?;
        Ok(errors.prod(&self.output.calculate_activation_deriv()?))
    }

    pub fn assign_input_errors(&mut self, index: usize, errors: Tensor) -> Result<()> {
        self.inputs
            .get_mut(index)
            .ok_or_else(|| LayerError::config(format!("missing input {}", index)))?
            .assign_errors(errors)
    }

    /// Assign the output pre-activation and activate it
    pub fn set_output(&mut self, z: Tensor) -> Result<()> {
        self.output.assign_activated(z)
    }
}

/// Options of one backward call
pub(crate) struct BackwardContext {
    pub propagate_to_input: bool,
    pub meprop_k: Option<f64>,
}

impl BackwardContext {
    /// A gradient restricted for input-error propagation
    pub fn restrict(&self, g: &Tensor) -> Tensor {
        meprop::restrict(g, self.meprop_k)
    }
}

/// Architecture-specific forward, backward and relevance
pub(crate) trait LayerHelper {
    fn forward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        window: &RecurrentWindow,
    ) -> Result<()>;

    fn backward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        grads: &mut LayerParameters,
        window: &RecurrentWindow,
        ctx: &BackwardContext,
    ) -> Result<()>;

    fn forward_with_contributions(
        &mut self,
        _io: &mut LayerIo,
        _params: &LayerParameters,
        _window: &RecurrentWindow,
    ) -> Result<LayerContributions> {
        Err(LayerError::unsupported(
            "forward with contributions is not available for this layer",
        ))
    }

    fn propagate_relevance(
        &mut self,
        _io: &mut LayerIo,
        _contributions: &LayerContributions,
        _add: bool,
    ) -> Result<()> {
        Err(LayerError::unsupported(
            "relevance propagation is not available for this layer",
        ))
    }
}

/// Intermediate arrays of each connection type
#[derive(Debug)]
pub enum LayerState {
    Feedforward(FeedforwardState),
    Highway(HighwayState),
    SimpleRecurrent(SimpleRecurrentState),
    CFN(CfnState),
    GRU(GruState),
    LSTM(LstmState),
    RAN(RanState),
    DeltaRNN(DeltaRnnState),
    IndRNN(IndRnnState),
    ScaledDotAttention(AttentionState),
    Affine(AffineState),
    Biaffine(BiaffineState),
    Concat(ConcatState),
    Sum(SumState),
    Product(ProductState),
    MaxPooling(MaxPoolingState),
    SquaredDistance(SquaredDistanceState),
}

impl LayerState {
    fn helper(&mut self) -> &mut dyn LayerHelper {
        match self {
            LayerState::Feedforward(s) => s,
            LayerState::Highway(s) => s,
            LayerState::SimpleRecurrent(s) => s,
            LayerState::CFN(s) => s,
            LayerState::GRU(s) => s,
            LayerState::LSTM(s) => s,
            LayerState::RAN(s) => s,
            LayerState::DeltaRNN(s) => s,
            LayerState::IndRNN(s) => s,
            LayerState::ScaledDotAttention(s) => s,
            LayerState::Affine(s) => s,
            LayerState::Biaffine(s) => s,
            LayerState::Concat(s) => s,
            LayerState::Sum(s) => s,
            LayerState::Product(s) => s,
            LayerState::MaxPooling(s) => s,
            LayerState::SquaredDistance(s) => s,
        }
    }
}

/// The live instance of one layer
#[derive(Debug)]
pub struct LayerStructure {
    pub connection: LayerType,
    pub inputs: Vec<StatefulArray>,
    pub output: StatefulArray,
    pub state: LayerState,
    dropout: Dropout,
    dropout_masks: Vec<DropoutMask>,
    prev_state_errors: Option<Tensor>,
}

impl LayerStructure {
    /// Build a structure from its configuration
    ///
    /// `config.sizes` holds the size of each input.
    pub fn new(config: &LayerConfiguration) -> Result<Self> {
        let connection = config
            .connection
            .ok_or_else(|| LayerError::config("missing connection type"))?;
        if config.sizes.is_empty() {
            return Err(LayerError::config("missing input size"));
        }
        if connection.is_merge() && config.sizes.len() < 2 {
            return Err(LayerError::config(format!(
                "{:?} layers need at least two inputs",
                connection
            )));
        }
        let size = config.size;
        let activation = config.activation;

        let inputs: Vec<StatefulArray> = config
            .sizes
            .iter()
            .map(|&s| {
                if connection.takes_matrix_input() {
                    StatefulArray::new(None)
                } else {
                    StatefulArray::with_size(s, None)
                }
            })
            .collect();

        let (state, output) = match connection {
            LayerType::Feedforward => (
                LayerState::Feedforward(FeedforwardState),
                StatefulArray::with_size(size, activation),
            ),
            LayerType::Highway => (
                LayerState::Highway(HighwayState::new(size, activation)),
                StatefulArray::with_size(size, None),
            ),
            LayerType::SimpleRecurrent => (
                LayerState::SimpleRecurrent(SimpleRecurrentState),
                StatefulArray::with_size(size, activation),
            ),
            LayerType::IndRNN => (
                LayerState::IndRNN(IndRnnState),
                StatefulArray::with_size(size, activation),
            ),
            LayerType::CFN => (
                LayerState::CFN(CfnState::new(size, activation)),
                StatefulArray::with_size(size, None),
            ),
            LayerType::GRU => (
                LayerState::GRU(GruState::new(size, activation)),
                StatefulArray::with_size(size, None),
            ),
            LayerType::LSTM => (
                LayerState::LSTM(LstmState::new(size, activation)),
                StatefulArray::with_size(size, None),
            ),
            LayerType::RAN => (
                LayerState::RAN(RanState::new(size)),
                StatefulArray::with_size(size, activation),
            ),
            LayerType::DeltaRNN => (
                LayerState::DeltaRNN(DeltaRnnState::new(size, activation)),
                StatefulArray::with_size(size, None),
            ),
            LayerType::ScaledDotAttention => (
                LayerState::ScaledDotAttention(AttentionState::default()),
                StatefulArray::new(activation),
            ),
            LayerType::Affine => (
                LayerState::Affine(AffineState),
                StatefulArray::with_size(size, activation),
            ),
            LayerType::Biaffine => (
                LayerState::Biaffine(BiaffineState),
                StatefulArray::with_size(size, activation),
            ),
            LayerType::Concat => {
                let total = config.sizes.iter().sum();
                (
                    LayerState::Concat(ConcatState),
                    StatefulArray::with_size(total, activation),
                )
            }
            LayerType::Sum | LayerType::Product => {
                if config.sizes.iter().any(|&s| s != config.sizes[0]) {
                    return Err(LayerError::config(format!(
                        "{:?} layers need inputs of the same size",
                        connection
                    )));
                }
                let state = if connection == LayerType::Sum {
                    LayerState::Sum(SumState)
                } else {
                    LayerState::Product(ProductState)
                };
                (state, StatefulArray::with_size(config.sizes[0], activation))
            }
            LayerType::MaxPooling => {
                let pool_size = config
                    .pool_size
                    .filter(|p| p[0] > 0 && p[1] > 0)
                    .ok_or_else(|| LayerError::config("MaxPooling layers need a pool size"))?;
                (
                    LayerState::MaxPooling(MaxPoolingState::new(pool_size)),
                    StatefulArray::new(activation),
                )
            }
            LayerType::SquaredDistance => (
                LayerState::SquaredDistance(SquaredDistanceState::default()),
                StatefulArray::with_size(1, activation),
            ),
        };

        let n_inputs = inputs.len();
        Ok(Self {
            connection,
            inputs,
            output,
            state,
            dropout: Dropout::new(config.dropout)?,
            dropout_masks: vec![DropoutMask::default(); n_inputs],
            prev_state_errors: None,
        })
    }

    /// Set the values of the first input
    pub fn set_input(&mut self, values: impl Into<AnyTensor>) -> Result<()> {
        self.set_input_at(0, values)
    }

    pub fn set_input_at(&mut self, index: usize, values: impl Into<AnyTensor>) -> Result<()> {
        self.inputs
            .get_mut(index)
            .ok_or_else(|| LayerError::config(format!("missing input {}", index)))?
            .assign_values(values)
    }

    /// Set the errors of the output
    pub fn set_errors(&mut self, errors: Tensor) -> Result<()> {
        self.output.assign_errors(errors)
    }

    /// Errors of the first input, computed by the last backward
    ///
    /// Uninitialized when the last backward did not propagate to the input.
    pub fn input_errors(&self) -> Result<&Tensor> {
        self.input_errors_at(0)
    }

    pub fn input_errors_at(&self, index: usize) -> Result<&Tensor> {
        self.inputs
            .get(index)
            .ok_or_else(|| LayerError::config(format!("missing input {}", index)))?
            .errors()
    }

    pub fn output_values(&self) -> Result<&Tensor> {
        self.output.dense_values()
    }

    /// Errors sent to the output of the previous timestep by the last backward
    pub fn prev_state_errors(&self) -> Option<&Tensor> {
        self.prev_state_errors.as_ref()
    }

    fn apply_dropout(&mut self, use_dropout: bool) -> Result<()> {
        for (input, mask) in self.inputs.iter_mut().zip(self.dropout_masks.iter_mut()) {
            if use_dropout && self.dropout.rate > 0.0 {
                let (masked, new_mask) = self.dropout.apply(input.values()?);
                input.assign_values(masked)?;
                *mask = new_mask;
            } else {
                *mask = DropoutMask::default();
            }
        }
        Ok(())
    }

    /// Forward the inputs to the output
    ///
    /// `window` gives recurrent layers the previous timestep; other layers
    /// ignore it. Dropout is applied to the inputs only when `use_dropout` is
    /// set.
    pub fn forward(
        &mut self,
        params: &LayerParameters,
        use_dropout: bool,
        window: &RecurrentWindow,
    ) -> Result<()> {
        self.apply_dropout(use_dropout)?;
        let helper = self.state.helper();
        let mut io = LayerIo {
            inputs: &mut self.inputs,
            output: &mut self.output,
            prev_state_errors: &mut self.prev_state_errors,
        };
        helper.forward(&mut io, params, window)
    }

    /// Forward without dropout, recording the contribution of every input
    /// element to every output unit
    pub fn forward_with_contributions(
        &mut self,
        params: &LayerParameters,
        window: &RecurrentWindow,
    ) -> Result<LayerContributions> {
        self.apply_dropout(false)?;
        let helper = self.state.helper();
        let mut io = LayerIo {
            inputs: &mut self.inputs,
            output: &mut self.output,
            prev_state_errors: &mut self.prev_state_errors,
        };
        helper.forward_with_contributions(&mut io, params, window)
    }

    /// Backward from the output errors
    ///
    /// Writes the parameter gradients into `grads` (a container of the same
    /// variant as `params`) and, when `propagate_to_input` is set, the input
    /// errors. With `meprop_k` only that fraction of the output units, ranked
    /// by gradient magnitude, feeds the input errors.
    pub fn backward(
        &mut self,
        params: &LayerParameters,
        grads: &mut LayerParameters,
        window: &RecurrentWindow,
        propagate_to_input: bool,
        meprop_k: Option<f64>,
    ) -> Result<()> {
        meprop::validate(meprop_k)?;

        if let Some(errors) = window.next_state_errors() {
            self.output.add_errors(errors)?;
        }
        self.prev_state_errors = None;

        let ctx = BackwardContext {
            propagate_to_input,
            meprop_k,
        };
        let helper = self.state.helper();
        let mut io = LayerIo {
            inputs: &mut self.inputs,
            output: &mut self.output,
            prev_state_errors: &mut self.prev_state_errors,
        };
        helper.backward(&mut io, params, grads, window, &ctx)?;

        if propagate_to_input {
            for (input, mask) in self.inputs.iter_mut().zip(&self.dropout_masks) {
                if input.has_errors() {
                    let errors = mask.backward(input.errors()?);
                    input.assign_errors(errors)?;
                }
            }
        } else {
            self.inputs.iter_mut().for_each(StatefulArray::clear_errors);
        }
        Ok(())
    }

    /// Set the input relevance from the output relevance
    pub fn set_input_relevance(&mut self, contributions: &LayerContributions) -> Result<()> {
        self.propagate_relevance(contributions, false)
    }

    /// Add to the input relevance the share of the output relevance
    pub fn add_input_relevance(&mut self, contributions: &LayerContributions) -> Result<()> {
        self.propagate_relevance(contributions, true)
    }

    fn propagate_relevance(&mut self, contributions: &LayerContributions, add: bool) -> Result<()> {
        let helper = self.state.helper();
        let mut io = LayerIo {
            inputs: &mut self.inputs,
            output: &mut self.output,
            prev_state_errors: &mut self.prev_state_errors,
        };
        helper.propagate_relevance(&mut io, contributions, add)
    }
}
