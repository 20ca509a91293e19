//! Neurolayer: Layer-based Neural Network Engine
//!
//! Stateful layers with hand-written forward, backward and relevance passes
//! for each connection type, pluggable update methods and the plumbing that
//! turns per-example gradients into parameter updates.
//!
//! # Modules
//!
//! - [`tensor`] - Dense and sparse matrices
//! - [`arrays`] - Stateful layer arrays and trainable parameter arrays
//! - [`layers`] - Layer structures, one per connection type
//! - [`update_methods`] - SGD, momentum, Nesterov, AdaGrad, RMSProp, Adam
//! - [`optimizer`] - Gradient accumulation and update driver
//! - [`stacked`] - Chains of single-input layers
//! - [`recurrent`] - Stacks unrolled over a sequence
//! - [`birnn`] - Bidirectional recurrent encoder
//! - [`attention_network`] - Context-vector attention over a sequence
//! - [`training`] - Feedforward training helper
//!
//! # Example
//!
//! ```rust,no_run
//! use neurolayer::{
//!     ActivationFunction, FixedRangeRandom, LayerConfiguration, LayerType, ParamsContainer,
//!     StackedLayers, StackedLayersParameters, Tensor,
//! };
//!
//! let configs = vec![
//!     LayerConfiguration::input(4),
//!     LayerConfiguration::hidden(5, LayerType::Feedforward, Some(ActivationFunction::Tanh)),
//!     LayerConfiguration::hidden(3, LayerType::Feedforward, Some(ActivationFunction::Softmax)),
//! ];
//! let params = StackedLayersParameters::initialized(&configs, &mut FixedRangeRandom::new(0.1, 1), 0.0)?;
//! let mut grads = params.zeros_like();
//! let mut network = StackedLayers::new(&params)?;
//!
//! let y = network.forward(&params, Tensor::vector(vec![-0.8, -0.9, -0.9, 1.0]), false)?;
//! let errors = y.sub(&Tensor::vector(vec![0.0, 0.0, 1.0]));
//! network.backward(&params, errors, &mut grads, true, None)?;
//! # Ok::<(), neurolayer::LayerError>(())
//! ```

pub mod activation;
pub mod arrays;
pub mod attention_network;
pub mod birnn;
pub mod config;
pub mod error;
pub mod gradients;
pub mod layers;
pub mod loss;
pub mod optimizer;
pub mod pool;
pub mod random;
pub mod recurrent;
pub mod stacked;
pub mod tensor;
pub mod training;
pub mod update_methods;

// Re-export main types for convenience
pub use activation::ActivationFunction;
pub use arrays::{ParamKind, ParamsArray, StatefulArray};
pub use attention_network::{AttentionNetwork, AttentionNetworkParameters};
pub use birnn::{BiRnn, BiRnnEncoder, BiRnnEncodersPool, BiRnnOptimizer};
pub use config::{layers_from_json, layers_to_json, LayerConfiguration, LayerType, TrainingConfig};
pub use error::{LayerError, Result};
pub use layers::{LayerParameters, LayerStructure, ParamsContainer, RecurrentWindow};
pub use loss::LossFunction;
pub use optimizer::{ParamsAccumulator, ParamsOptimizer};
pub use pool::{ItemsPool, PoolTicket};
pub use random::{FixedRangeRandom, GaussianDistributedRandom, RandomGenerator};
pub use recurrent::RecurrentProcessor;
pub use stacked::{StackedLayers, StackedLayersParameters};
pub use tensor::{AnyTensor, SparseTensor, Tensor};
pub use training::{Example, FeedforwardTrainer};
pub use update_methods::{
    AdaGradMethod, AdamMethod, LearningRateMethod, LearningRateSchedule, MomentumMethod,
    NesterovMomentumMethod, RMSPropMethod, Regularization, UpdateMethod,
};
