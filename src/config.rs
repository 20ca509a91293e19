//! Layer and Training Configuration
//!
//! Configurations are plain data: they are built once, handed to a structure
//! constructor and never changed afterwards. They derive serde so that a
//! network description can be stored next to its parameters.
//!
//! ## Example
//!
//! ```rust
//! use neurolayer::{ActivationFunction, LayerConfiguration, LayerType};
//!
//! let layers = vec![
//!     LayerConfiguration::input(4),
//!     LayerConfiguration::hidden(5, LayerType::Feedforward, Some(ActivationFunction::Tanh)),
//!     LayerConfiguration::hidden(3, LayerType::Feedforward, Some(ActivationFunction::Softmax)),
//! ];
//! ```

use crate::activation::ActivationFunction;
use crate::error::{LayerError, Result};
use serde::{Deserialize, Serialize};

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| LayerError::config(format!("cannot serialize configuration: {}", e)))
}

/// Layers of a network, input layer first, as a JSON array
pub fn layers_to_json(layers: &[LayerConfiguration]) -> Result<String> {
    to_json(layers)
}

pub fn layers_from_json(json: &str) -> Result<Vec<LayerConfiguration>> {
    serde_json::from_str(json)
        .map_err(|e| LayerError::config(format!("invalid layers configuration: {}", e)))
}

/// Connection type of a layer with its inputs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerType {
    Feedforward,
    Highway,
    SimpleRecurrent,
    CFN,
    GRU,
    LSTM,
    RAN,
    DeltaRNN,
    IndRNN,
    ScaledDotAttention,
    Affine,
    Biaffine,
    Concat,
    Sum,
    Product,
    MaxPooling,
    SquaredDistance,
}

impl LayerType {
    /// Whether the layer reads its own output at the previous timestep
    pub fn is_recurrent(&self) -> bool {
        matches!(
            self,
            LayerType::SimpleRecurrent
                | LayerType::CFN
                | LayerType::GRU
                | LayerType::LSTM
                | LayerType::RAN
                | LayerType::DeltaRNN
                | LayerType::IndRNN
        )
    }

    /// Whether the layer combines two or more inputs
    pub fn is_merge(&self) -> bool {
        matches!(
            self,
            LayerType::Affine
                | LayerType::Biaffine
                | LayerType::Concat
                | LayerType::Sum
                | LayerType::Product
        )
    }

    /// Whether the layer reads a matrix (one row per element) instead of a vector
    pub fn takes_matrix_input(&self) -> bool {
        matches!(self, LayerType::ScaledDotAttention | LayerType::MaxPooling)
    }

    /// Whether the layer can read a sparse input
    pub fn supports_sparse_input(&self) -> bool {
        !matches!(
            self,
            LayerType::Highway
                | LayerType::ScaledDotAttention
                | LayerType::MaxPooling
                | LayerType::Biaffine
                | LayerType::Concat
                | LayerType::Sum
                | LayerType::Product
                | LayerType::SquaredDistance
        )
    }
}

/// Configuration of one layer of a network
///
/// The first layer of a stack is the input layer: it only declares a size and
/// whether the input is sparse.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerConfiguration {
    /// Output size
    pub size: usize,
    /// Sizes of each input, for merge layers
    pub sizes: Vec<usize>,
    pub connection: Option<LayerType>,
    pub activation: Option<ActivationFunction>,
    /// Probability of dropping each element of the input
    pub dropout: f64,
    pub sparse_input: bool,
    /// `[rows, cols]` of each pooling window, for max pooling
    pub pool_size: Option<[usize; 2]>,
}

impl Default for LayerConfiguration {
    fn default() -> Self {
        Self {
            size: 1,
            sizes: Vec::new(),
            connection: None,
            activation: None,
            dropout: 0.0,
            sparse_input: false,
            pool_size: None,
        }
    }
}

impl LayerConfiguration {
    /// The input layer of a stack
    pub fn input(size: usize) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    /// A sparse input layer
    pub fn sparse_input(size: usize) -> Self {
        Self {
            size,
            sparse_input: true,
            ..Default::default()
        }
    }

    /// A single-input layer
    pub fn hidden(
        size: usize,
        connection: LayerType,
        activation: Option<ActivationFunction>,
    ) -> Self {
        Self {
            size,
            connection: Some(connection),
            activation,
            ..Default::default()
        }
    }

    /// A merge layer reading one input per entry of `sizes`
    pub fn merge(
        sizes: Vec<usize>,
        size: usize,
        connection: LayerType,
        activation: Option<ActivationFunction>,
    ) -> Self {
        Self {
            size,
            sizes,
            connection: Some(connection),
            activation,
            ..Default::default()
        }
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn with_pool_size(mut self, rows: usize, cols: usize) -> Self {
        self.pool_size = Some([rows, cols]);
        self
    }
}

/// Configuration of a training run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub use_dropout: bool,
    pub shuffle: bool,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 1,
            use_dropout: true,
            shuffle: true,
            seed: 743,
        }
    }
}

impl TrainingConfig {
    /// A single ordered epoch, one example per batch
    pub fn quick() -> Self {
        Self {
            epochs: 1,
            batch_size: 1,
            use_dropout: false,
            shuffle: false,
            seed: 743,
        }
    }

    /// Mini-batch training
    pub fn batched(epochs: usize, batch_size: usize) -> Self {
        Self {
            epochs,
            batch_size,
            ..Default::default()
        }
    }

    pub fn to_json(&self) -> Result<String> {
        to_json(self)
    }

    /// Missing fields take their default value
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| LayerError::config(format!("invalid training configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_type_categories() {
        assert!(LayerType::GRU.is_recurrent());
        assert!(!LayerType::GRU.is_merge());
        assert!(LayerType::Biaffine.is_merge());
        assert!(LayerType::MaxPooling.takes_matrix_input());
        assert!(!LayerType::Highway.supports_sparse_input());
    }

    #[test]
    fn test_configuration_serde_round_trip() {
        let config = LayerConfiguration::hidden(
            8,
            LayerType::LSTM,
            Some(ActivationFunction::Tanh),
        )
        .with_dropout(0.25);
        let layers = vec![LayerConfiguration::input(4), config];
        let json = layers_to_json(&layers).unwrap();
        assert_eq!(layers_from_json(&json).unwrap(), layers);
    }

    #[test]
    fn test_training_config_defaults_missing_fields() {
        let config = TrainingConfig::from_json(r#"{ "epochs": 3, "batch_size": 8 }"#).unwrap();
        assert_eq!(config, TrainingConfig { epochs: 3, batch_size: 8, ..TrainingConfig::default() });

        let back = TrainingConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_invalid_json_is_a_configuration_error() {
        assert!(matches!(
            layers_from_json("[{ \"size\": \"four\" }]"),
            Err(LayerError::Configuration(_))
        ));
    }
}
