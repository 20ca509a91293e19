//! Neural Network Layers
//!
//! One live [`LayerStructure`] per layer (and per timestep, for recurrent
//! layers), driven by a [`LayerParameters`] container shared by all its
//! timesteps.
//!
//! ## Connection Types
//!
//! - **feedforward**: `y = f(W · x + b)`
//! - **highway**: gated mix of a transformation and the input itself
//! - **simple_recurrent**, **ind_rnn**: `y = f(W · x + b + Wrec · yPrev)`
//! - **cfn**, **gru**, **lstm**, **ran**, **delta_rnn**: gated recurrent units
//! - **attention**: scaled dot-product self-attention over a sequence matrix
//! - **affine**, **biaffine**, **merge**: layers reading two or more inputs
//! - **max_pooling**, **squared_distance**
//!
//! ## Design Pattern
//!
//! Every connection type keeps the intermediate arrays it needs between
//! forward and backward in its own state type and implements one helper
//! trait over it:
//!
//! ```rust,ignore
//! impl LayerHelper for GruState {
//!     fn forward(&mut self, io, params, window) -> Result<()> { }
//!     fn backward(&mut self, io, params, grads, window, ctx) -> Result<()> { }
//! }
//! ```
//!
//! Backward writes parameter gradients into a container of the same shape as
//! the parameters, so accumulating and applying them is independent of the
//! layer type.

pub mod affine;
pub mod attention;
pub mod biaffine;
pub mod cfn;
pub mod delta_rnn;
pub mod dropout;
pub mod feedforward;
pub mod gru;
pub mod highway;
pub mod ind_rnn;
pub mod linear;
pub mod lstm;
pub mod max_pooling;
pub mod merge;
pub mod meprop;
pub mod parameters;
pub mod ran;
pub mod relevance;
pub mod simple_recurrent;
pub mod squared_distance;
pub mod structure;
pub mod window;

// Re-export main types for convenience
pub use dropout::Dropout;
pub use parameters::{GateParameters, LayerParameters, ParamsContainer};
pub use structure::{LayerContributions, LayerState, LayerStructure};
pub use window::{split_neighbors, RecurrentWindow};
