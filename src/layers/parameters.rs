//! Layer Parameters
//!
//! Every connection type owns a fixed, named, ordered set of [`ParamsArray`]s.
//! The same containers hold gradients: backward writes into a container of
//! the same variant and shapes as the one it reads the parameters from.
//!
//! ## Layout
//!
//! ```text
//! LayerParameters::GRU(GruParameters)
//!   ├── candidate       GateParameters { weights, biases, recurrent_weights }
//!   ├── reset_gate      GateParameters { weights, biases, recurrent_weights }
//!   └── partition_gate  GateParameters { weights, biases, recurrent_weights }
//! ```
//!
//! Weights multiply from the left (`W · x`, shape `[out, in]`), biases are
//! column vectors `[out, 1]`.

use super::affine::AffineParameters;
use super::attention::AttentionParameters;
use super::biaffine::BiaffineParameters;
use super::cfn::CfnParameters;
use super::delta_rnn::DeltaRnnParameters;
use super::gru::GruParameters;
use super::highway::HighwayParameters;
use super::lstm::LstmParameters;
use super::ran::RanParameters;
use super::squared_distance::SquaredDistanceParameters;
use super::structure::BackwardContext;
use crate::arrays::{ParamKind, ParamsArray};
use crate::config::{LayerConfiguration, LayerType};
use crate::error::{LayerError, Result};
use crate::random::RandomGenerator;
use crate::tensor::{AnyTensor, Tensor};
use serde::{Deserialize, Serialize};

/// Any container exposing its parameter tensors in a fixed order
pub trait ParamsContainer {
    fn params(&self) -> Vec<&ParamsArray>;

    fn params_mut(&mut self) -> Vec<&mut ParamsArray>;

    /// Randomize the weights and set every bias to `biases_init_value`
    ///
    /// Fails without touching anything if some weights are sparse.
    fn initialize(
        &mut self,
        generator: &mut dyn RandomGenerator,
        biases_init_value: f64,
    ) -> Result<()> {
        if self
            .params()
            .iter()
            .any(|p| p.kind() == ParamKind::Weights && p.is_sparse())
        {
            return Err(LayerError::config("Cannot randomize sparse weights"));
        }
        for p in self.params_mut() {
            match p.kind() {
                ParamKind::Weights => {
                    p.dense_mut()?.randomize(generator);
                }
                ParamKind::Biases => {
                    p.dense_mut()?.assign_fill(biases_init_value);
                }
            }
        }
        Ok(())
    }

    /// Copy every value of `other`, which must have the same layout
    fn assign_values(&mut self, other: &Self) -> Result<()>
    where
        Self: Sized,
    {
        let theirs = other.params();
        let mut mine = self.params_mut();
        if mine.len() != theirs.len() {
            return Err(LayerError::shape_mismatch(&[mine.len()], &[theirs.len()]));
        }
        for (a, b) in mine.iter_mut().zip(theirs) {
            a.assign_values(b)?;
        }
        Ok(())
    }

    /// Independent copy with the same values and no support structures
    fn copy(&self) -> Self
    where
        Self: Clone + Sized,
    {
        let mut copy = self.clone();
        for p in copy.params_mut() {
            *p.support_structure_mut() = None;
        }
        copy
    }

    /// Copy with the same layout and every value set to zero
    fn zeros_like(&self) -> Self
    where
        Self: Clone + Sized,
    {
        let mut zeros = self.copy();
        for p in zeros.params_mut() {
            p.zero();
        }
        zeros
    }

    /// Total number of scalar parameters
    fn num_parameters(&self) -> usize {
        self.params().iter().map(|p| p.values().len()).sum()
    }
}

/// Weights, biases and (optionally) recurrent weights feeding one unit
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GateParameters {
    pub weights: ParamsArray,
    pub biases: ParamsArray,
    pub recurrent_weights: Option<ParamsArray>,
}

impl GateParameters {
    /// A feedforward unit: `W · x + b`
    pub fn new(input_size: usize, output_size: usize, sparse_input: bool) -> Self {
        Self {
            weights: ParamsArray::weights(output_size, input_size, sparse_input),
            biases: ParamsArray::biases(output_size),
            recurrent_weights: None,
        }
    }

    /// A recurrent unit: `W · x + b + Wrec · yPrev`
    pub fn recurrent(input_size: usize, output_size: usize, sparse_input: bool) -> Self {
        Self {
            recurrent_weights: Some(ParamsArray::weights(output_size, output_size, false)),
            ..Self::new(input_size, output_size, sparse_input)
        }
    }

    /// A unit with one recurrent weight per output element (`wrec ⊙ yPrev`)
    pub fn independently_recurrent(
        input_size: usize,
        output_size: usize,
        sparse_input: bool,
    ) -> Self {
        Self {
            recurrent_weights: Some(ParamsArray::weights(output_size, 1, false)),
            ..Self::new(input_size, output_size, sparse_input)
        }
    }

    fn recurrent_array(&self) -> Result<&ParamsArray> {
        self.recurrent_weights
            .as_ref()
            .ok_or_else(|| LayerError::config("unit has no recurrent weights"))
    }

    /// `W · x + b`, plus `Wrec · yPrev` when a previous state is given
    pub(crate) fn forward(&self, x: &AnyTensor, y_prev: Option<&Tensor>) -> Result<Tensor> {
        let mut z = x.left_dot(self.weights.dense()?);
        z.assign_add(self.biases.dense()?);
        if let Some(y_prev) = y_prev {
            z.assign_add(&self.recurrent_array()?.dense()?.dot(y_prev));
        }
        Ok(z)
    }

    /// Write the gradients of a unit whose pre-activation gradient is `g`
    ///
    /// The recurrent weights get a zero gradient at the first timestep.
    pub(crate) fn assign_grads(
        &mut self,
        g: &Tensor,
        x: &AnyTensor,
        y_prev: Option<&Tensor>,
    ) -> Result<()> {
        self.weights.set_values(x.outer_from(g))?;
        self.biases.set_values(g.clone())?;
        if let Some(rec) = self.recurrent_weights.as_mut() {
            match y_prev {
                Some(y_prev) => rec.set_values(g.outer(y_prev))?,
                None => rec.zero(),
            }
        }
        Ok(())
    }

    /// `Wᵀ · g`
    pub(crate) fn input_errors(&self, g: &Tensor) -> Result<Tensor> {
        Ok(self.weights.dense()?.t().dot(g))
    }

    /// `Wrecᵀ · g`
    pub(crate) fn recurrent_errors(&self, g: &Tensor) -> Result<Tensor> {
        Ok(self.recurrent_array()?.dense()?.t().dot(g))
    }
}

/// `Σ Wᵀ · g` over gates reading the same input, with meProp applied to each `g`
pub(crate) fn gates_input_errors(
    ctx: &BackwardContext,
    gates: &[(&GateParameters, &Tensor)],
) -> Result<Tensor> {
    sum_errors(gates, |gate, g| gate.input_errors(&ctx.restrict(g)))
}

/// `Σ Wrecᵀ · g` over the recurrent gates
pub(crate) fn gates_recurrent_errors(gates: &[(&GateParameters, &Tensor)]) -> Result<Tensor> {
    sum_errors(gates, |gate, g| gate.recurrent_errors(g))
}

fn sum_errors(
    gates: &[(&GateParameters, &Tensor)],
    errors_of: impl Fn(&GateParameters, &Tensor) -> Result<Tensor>,
) -> Result<Tensor> {
    let (first, rest) = gates
        .split_first()
        .ok_or_else(|| LayerError::config("no gates to propagate errors through"))?;
    let mut total = errors_of(first.0, first.1)?;
    for (gate, g) in rest {
        total.assign_add(&errors_of(gate, g)?);
    }
    Ok(total)
}

impl ParamsContainer for GateParameters {
    fn params(&self) -> Vec<&ParamsArray> {
        let mut params = vec![&self.weights, &self.biases];
        params.extend(self.recurrent_weights.as_ref());
        params
    }

    fn params_mut(&mut self) -> Vec<&mut ParamsArray> {
        let mut params = vec![&mut self.weights, &mut self.biases];
        params.extend(self.recurrent_weights.as_mut());
        params
    }
}

/// Parameters of one layer, tagged by connection type
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum LayerParameters {
    Feedforward(GateParameters),
    Highway(HighwayParameters),
    SimpleRecurrent(GateParameters),
    CFN(CfnParameters),
    GRU(GruParameters),
    LSTM(LstmParameters),
    RAN(RanParameters),
    DeltaRNN(DeltaRnnParameters),
    IndRNN(GateParameters),
    ScaledDotAttention(AttentionParameters),
    Affine(AffineParameters),
    Biaffine(BiaffineParameters),
    SquaredDistance(SquaredDistanceParameters),
    /// Concat, Sum, Product and MaxPooling have nothing to train
    Empty,
}

macro_rules! variant_accessors {
    ($($get:ident, $get_mut:ident => $variant:ident($ty:ty);)*) => {
        $(
            pub fn $get(&self) -> Result<&$ty> {
                match self {
                    LayerParameters::$variant(p) => Ok(p),
                    _ => Err(self.mismatch(stringify!($variant))),
                }
            }

            pub fn $get_mut(&mut self) -> Result<&mut $ty> {
                match self {
                    LayerParameters::$variant(p) => Ok(p),
                    other => Err(other.mismatch(stringify!($variant))),
                }
            }
        )*
    };
}

impl LayerParameters {
    /// Zero-initialized parameters for a layer of the given configuration
    ///
    /// `config.sizes` holds the size of each input.
    pub fn new(config: &LayerConfiguration, sparse_input: bool) -> Result<Self> {
        let connection = config
            .connection
            .ok_or_else(|| LayerError::config("missing connection type"))?;
        let input_size = *config
            .sizes
            .first()
            .ok_or_else(|| LayerError::config("missing input size"))?;
        let out = config.size;

        if sparse_input && !connection.supports_sparse_input() {
            return Err(LayerError::config(format!(
                "{:?} layers cannot read a sparse input",
                connection
            )));
        }

        Ok(match connection {
            LayerType::Feedforward => {
                LayerParameters::Feedforward(GateParameters::new(input_size, out, sparse_input))
            }
            LayerType::Highway => {
                if input_size != out {
                    return Err(LayerError::config(
                        "Highway layers need the same input and output size",
                    ));
                }
                LayerParameters::Highway(HighwayParameters::new(out))
            }
            LayerType::SimpleRecurrent => LayerParameters::SimpleRecurrent(
                GateParameters::recurrent(input_size, out, sparse_input),
            ),
            LayerType::IndRNN => LayerParameters::IndRNN(
                GateParameters::independently_recurrent(input_size, out, sparse_input),
            ),
            LayerType::CFN => LayerParameters::CFN(CfnParameters::new(input_size, out, sparse_input)),
            LayerType::GRU => LayerParameters::GRU(GruParameters::new(input_size, out, sparse_input)),
            LayerType::LSTM => {
                LayerParameters::LSTM(LstmParameters::new(input_size, out, sparse_input))
            }
            LayerType::RAN => LayerParameters::RAN(RanParameters::new(input_size, out, sparse_input)),
            LayerType::DeltaRNN => {
                LayerParameters::DeltaRNN(DeltaRnnParameters::new(input_size, out, sparse_input))
            }
            LayerType::ScaledDotAttention => {
                LayerParameters::ScaledDotAttention(AttentionParameters::new(input_size, out))
            }
            LayerType::Affine => {
                if config.sizes.len() < 2 {
                    return Err(LayerError::config("Affine layers need at least two inputs"));
                }
                LayerParameters::Affine(AffineParameters::new(&config.sizes, out, sparse_input))
            }
            LayerType::Biaffine => {
                if config.sizes.len() != 2 {
                    return Err(LayerError::config("Biaffine layers need exactly two inputs"));
                }
                LayerParameters::Biaffine(BiaffineParameters::new(
                    config.sizes[0],
                    config.sizes[1],
                    out,
                ))
            }
            LayerType::SquaredDistance => {
                LayerParameters::SquaredDistance(SquaredDistanceParameters::new(input_size, out))
            }
            LayerType::Concat | LayerType::Sum | LayerType::Product | LayerType::MaxPooling => {
                LayerParameters::Empty
            }
        })
    }

    fn mismatch(&self, expected: &str) -> LayerError {
        LayerError::config(format!(
            "expected {} parameters, found {}",
            expected,
            self.name()
        ))
    }

    /// Name of the connection type these parameters belong to
    pub fn name(&self) -> &'static str {
        match self {
            LayerParameters::Feedforward(_) => "Feedforward",
            LayerParameters::Highway(_) => "Highway",
            LayerParameters::SimpleRecurrent(_) => "SimpleRecurrent",
            LayerParameters::CFN(_) => "CFN",
            LayerParameters::GRU(_) => "GRU",
            LayerParameters::LSTM(_) => "LSTM",
            LayerParameters::RAN(_) => "RAN",
            LayerParameters::DeltaRNN(_) => "DeltaRNN",
            LayerParameters::IndRNN(_) => "IndRNN",
            LayerParameters::ScaledDotAttention(_) => "ScaledDotAttention",
            LayerParameters::Affine(_) => "Affine",
            LayerParameters::Biaffine(_) => "Biaffine",
            LayerParameters::SquaredDistance(_) => "SquaredDistance",
            LayerParameters::Empty => "Empty",
        }
    }

    variant_accessors! {
        feedforward, feedforward_mut => Feedforward(GateParameters);
        highway, highway_mut => Highway(HighwayParameters);
        simple_recurrent, simple_recurrent_mut => SimpleRecurrent(GateParameters);
        cfn, cfn_mut => CFN(CfnParameters);
        gru, gru_mut => GRU(GruParameters);
        lstm, lstm_mut => LSTM(LstmParameters);
        ran, ran_mut => RAN(RanParameters);
        delta_rnn, delta_rnn_mut => DeltaRNN(DeltaRnnParameters);
        ind_rnn, ind_rnn_mut => IndRNN(GateParameters);
        attention, attention_mut => ScaledDotAttention(AttentionParameters);
        affine, affine_mut => Affine(AffineParameters);
        biaffine, biaffine_mut => Biaffine(BiaffineParameters);
        squared_distance, squared_distance_mut => SquaredDistance(SquaredDistanceParameters);
    }

    pub fn expect_empty(&self) -> Result<()> {
        match self {
            LayerParameters::Empty => Ok(()),
            _ => Err(self.mismatch("Empty")),
        }
    }

    fn as_container(&self) -> Option<&dyn ParamsContainer> {
        match self {
            LayerParameters::Feedforward(p)
            | LayerParameters::SimpleRecurrent(p)
            | LayerParameters::IndRNN(p) => Some(p),
            LayerParameters::Highway(p) => Some(p),
            LayerParameters::CFN(p) => Some(p),
            LayerParameters::GRU(p) => Some(p),
            LayerParameters::LSTM(p) => Some(p),
            LayerParameters::RAN(p) => Some(p),
            LayerParameters::DeltaRNN(p) => Some(p),
            LayerParameters::ScaledDotAttention(p) => Some(p),
            LayerParameters::Affine(p) => Some(p),
            LayerParameters::Biaffine(p) => Some(p),
            LayerParameters::SquaredDistance(p) => Some(p),
            LayerParameters::Empty => None,
        }
    }

    fn as_container_mut(&mut self) -> Option<&mut dyn ParamsContainer> {
        match self {
            LayerParameters::Feedforward(p)
            | LayerParameters::SimpleRecurrent(p)
            | LayerParameters::IndRNN(p) => Some(p),
            LayerParameters::Highway(p) => Some(p),
            LayerParameters::CFN(p) => Some(p),
            LayerParameters::GRU(p) => Some(p),
            LayerParameters::LSTM(p) => Some(p),
            LayerParameters::RAN(p) => Some(p),
            LayerParameters::DeltaRNN(p) => Some(p),
            LayerParameters::ScaledDotAttention(p) => Some(p),
            LayerParameters::Affine(p) => Some(p),
            LayerParameters::Biaffine(p) => Some(p),
            LayerParameters::SquaredDistance(p) => Some(p),
            LayerParameters::Empty => None,
        }
    }
}

impl ParamsContainer for LayerParameters {
    fn params(&self) -> Vec<&ParamsArray> {
        self.as_container().map_or_else(Vec::new, |c| c.params())
    }

    fn params_mut(&mut self) -> Vec<&mut ParamsArray> {
        self.as_container_mut()
            .map_or_else(Vec::new, |c| c.params_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::FixedRangeRandom;

    fn gru_config() -> LayerConfiguration {
        let mut config = LayerConfiguration::hidden(3, LayerType::GRU, None);
        config.sizes = vec![2];
        config
    }

    #[test]
    fn test_gru_layout() {
        let params = LayerParameters::new(&gru_config(), false).unwrap();
        let shapes: Vec<[usize; 2]> = params.params().iter().map(|p| p.shape()).collect();
        assert_eq!(shapes.len(), 9);
        assert_eq!(shapes[0], [3, 2]);
        assert_eq!(shapes[1], [3, 1]);
        assert_eq!(shapes[2], [3, 3]);
        assert_eq!(params.num_parameters(), 3 * (6 + 3 + 9));
    }

    #[test]
    fn test_initialize_sets_biases() {
        let mut params = LayerParameters::new(&gru_config(), false).unwrap();
        let mut gen = FixedRangeRandom::new(0.1, 3);
        params.initialize(&mut gen, 0.5).unwrap();

        let gru = params.gru().unwrap();
        assert!(gru.reset_gate.biases.dense().unwrap().data.iter().all(|&b| b == 0.5));
        assert!(gru
            .reset_gate
            .weights
            .dense()
            .unwrap()
            .data
            .iter()
            .any(|&w| w != 0.0));
    }

    #[test]
    fn test_initialize_sparse_weights_fails() {
        let mut config = LayerConfiguration::hidden(3, LayerType::Feedforward, None);
        config.sizes = vec![10];
        let mut params = LayerParameters::new(&config, true).unwrap();
        let mut gen = FixedRangeRandom::new(0.1, 3);
        assert!(matches!(
            params.initialize(&mut gen, 0.0),
            Err(LayerError::Configuration(_))
        ));
        // untouched
        assert!(params.params().iter().all(|p| p.values().to_dense().sum() == 0.0));
    }

    #[test]
    fn test_copy_is_independent() {
        let mut params = LayerParameters::new(&gru_config(), false).unwrap();
        let mut gen = FixedRangeRandom::new(0.1, 3);
        params.initialize(&mut gen, 0.0).unwrap();

        let mut copy = params.copy();
        copy.gru_mut().unwrap().candidate.weights.dense_mut().unwrap().data[0] = 9.0;
        assert_ne!(
            params.gru().unwrap().candidate.weights.dense().unwrap().data[0],
            9.0
        );

        copy.assign_values(&params).unwrap();
        assert_eq!(
            copy.gru().unwrap().candidate.weights.dense().unwrap().data,
            params.gru().unwrap().candidate.weights.dense().unwrap().data
        );
    }

    #[test]
    fn test_wrong_variant_accessor() {
        let params = LayerParameters::new(&gru_config(), false).unwrap();
        assert!(matches!(params.lstm(), Err(LayerError::Configuration(_))));
    }

    #[test]
    fn test_highway_needs_equal_sizes() {
        let mut config = LayerConfiguration::hidden(3, LayerType::Highway, None);
        config.sizes = vec![4];
        assert!(LayerParameters::new(&config, false).is_err());
    }
}
