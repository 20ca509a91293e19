//! Loss Functions
//!
//! ```text
//! MSE:                  loss = ½ Σ (y - gold)²        errors = y - gold
//! SoftmaxCrossEntropy:  loss = -Σ gold · ln(y)        errors = y - gold
//! ```
//!
//! The cross-entropy errors are the gradient with respect to the softmax
//! *pre-activation*, so they are only correct on top of a softmax output
//! (whose derivative reports all ones). [`LossFunction::check_pairing`]
//! enforces the pairing in both directions.

use crate::activation::ActivationFunction;
use crate::error::{LayerError, Result};
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossFunction {
    MSE,
    SoftmaxCrossEntropy,
}

fn check_shapes(output: &Tensor, gold: &Tensor) -> Result<()> {
    if output.len() != gold.len() {
        return Err(LayerError::shape_mismatch(&[output.len()], &[gold.len()]));
    }
    Ok(())
}

impl LossFunction {
    /// Errors of the output with respect to the gold
    pub fn errors(&self, output: &Tensor, gold: &Tensor) -> Result<Tensor> {
        check_shapes(output, gold)?;
        Ok(output.as_column().sub(&gold.as_column()))
    }

    pub fn loss(&self, output: &Tensor, gold: &Tensor) -> Result<f64> {
        check_shapes(output, gold)?;
        let pairs = output.data.iter().zip(&gold.data);
        Ok(match self {
            LossFunction::MSE => 0.5 * pairs.map(|(y, g)| (y - g) * (y - g)).sum::<f64>(),
            LossFunction::SoftmaxCrossEntropy => -pairs
                .map(|(y, g)| g * y.max(f64::MIN_POSITIVE).ln())
                .sum::<f64>(),
        })
    }

    /// Softmax outputs go with the softmax cross-entropy and vice versa
    pub fn check_pairing(&self, output_activation: Option<ActivationFunction>) -> Result<()> {
        let softmax = output_activation == Some(ActivationFunction::Softmax);
        let cross_entropy = *self == LossFunction::SoftmaxCrossEntropy;
        if softmax != cross_entropy {
            return Err(LayerError::config(
                "the softmax cross-entropy loss must be used with a softmax output activation and vice versa",
            ));
        }
        Ok(())
    }
}
