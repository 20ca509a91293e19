//! Error Types
//!
//! Every fallible operation in the crate reports one of a small, closed set of
//! failures. They are raised synchronously to the immediate caller and never
//! retried internally: a failed forward, backward or update leaves nothing
//! half-applied that the caller could rely on.
//!
//! ```text
//! UninitializedState     read of values/errors/relevance before assignment
//! ShapeMismatch          assignment or accumulation between incompatible shapes
//! Configuration          illegal layer connection, loss/activation pairing, mePropK range
//! UnsupportedOperation   a path a variant (or the numeric backend) does not implement
//! ItemNotLent            a pool ticket that the pool does not recognize as lent
//! ```

/// All errors that can occur within the layer engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LayerError {
    /// A field was read (or written) before its required predecessor was set.
    #[error("uninitialized state: `{field}` has not been assigned")]
    UninitializedState { field: &'static str },

    /// Two tensors that must agree in shape do not.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// Illegal configuration of a layer, a network or a training helper.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The requested operation is not implemented on this path.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A pool item was released or accessed without being lent.
    #[error("pool item {0} is not currently lent")]
    ItemNotLent(usize),
}

impl LayerError {
    pub fn uninitialized(field: &'static str) -> Self {
        LayerError::UninitializedState { field }
    }

    pub fn shape_mismatch(expected: &[usize], got: &[usize]) -> Self {
        LayerError::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        LayerError::Configuration(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        LayerError::UnsupportedOperation(msg.into())
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, LayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_failure() {
        let err = LayerError::uninitialized("errors");
        assert_eq!(err.to_string(), "uninitialized state: `errors` has not been assigned");

        let err = LayerError::shape_mismatch(&[3, 1], &[4, 1]);
        assert!(err.to_string().contains("[3, 1]"));
        assert!(err.to_string().contains("[4, 1]"));
    }
}
