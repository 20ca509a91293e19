//! Row-wise Linear Projection
//!
//! Projects every row of a sequence matrix with the same weights:
//!
//! ```text
//! Input:   X [seq_len, in]
//! Weights: W [in, out]
//! Biases:  b [out]
//! Output:  Y = X · W + b [seq_len, out]
//! ```
//!
//! ## Backward Pass
//!
//! ```text
//! gW = Xᵀ · gY
//! gb = Σ_rows gY
//! gX = gY · Wᵀ
//! ```
//!
//! The bias gradient sums over rows because every row reads the same bias.

use super::parameters::ParamsContainer;
use crate::arrays::ParamsArray;
use crate::error::{LayerError, Result};
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Weights and biases of one row-wise projection
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RowProjection {
    pub weights: ParamsArray,
    pub biases: ParamsArray,
}

impl RowProjection {
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self {
            weights: ParamsArray::weights(in_features, out_features, false),
            biases: ParamsArray::biases(out_features),
        }
    }

    /// `Y = X · W + b`, with `b` added to every row
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let w = self.weights.dense()?;
        if x.cols() != w.rows() {
            return Err(LayerError::shape_mismatch(
                &[x.rows(), w.rows()],
                &[x.rows(), x.cols()],
            ));
        }
        let mut y = x.dot(w);
        let b = self.biases.dense()?;
        let cols = y.cols();
        for (i, v) in y.data.iter_mut().enumerate() {
            *v += b.data[i % cols];
        }
        Ok(y)
    }

    /// Write `gW` and `gb` into `grads`, a projection of the same shape
    pub fn assign_grads(grads: &mut RowProjection, gy: &Tensor, x: &Tensor) -> Result<()> {
        grads.weights.set_values(x.t().dot(gy))?;

        let mut gb = Tensor::zeros(gy.cols(), 1);
        for row in 0..gy.rows() {
            for col in 0..gy.cols() {
                gb.data[col] += gy.get(row, col);
            }
        }
        grads.biases.set_values(gb)
    }

    /// `gX = gY · Wᵀ`
    pub fn input_errors(&self, gy: &Tensor) -> Result<Tensor> {
        Ok(gy.dot(&self.weights.dense()?.t()))
    }
}

impl ParamsContainer for RowProjection {
    fn params(&self) -> Vec<&ParamsArray> {
        vec![&self.weights, &self.biases]
    }

    fn params_mut(&mut self) -> Vec<&mut ParamsArray> {
        vec![&mut self.weights, &mut self.biases]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projection() -> RowProjection {
        let mut p = RowProjection::new(2, 3);
        p.weights
            .set_values(Tensor::from_rows(&[
                vec![1.0, 0.0, -1.0],
                vec![0.5, 2.0, 0.0],
            ]))
            .unwrap();
        p.biases.set_values(Tensor::vector(vec![0.1, 0.2, 0.3])).unwrap();
        p
    }

    #[test]
    fn test_forward_adds_bias_to_every_row() {
        let x = Tensor::from_rows(&[vec![1.0, 2.0], vec![0.0, -1.0]]);
        let y = projection().forward(&x).unwrap();
        let expected = Tensor::from_rows(&[vec![2.1, 4.2, -0.7], vec![-0.4, -1.8, 0.3]]);
        assert!(y.equals(&expected, 1e-12));
    }

    #[test]
    fn test_bias_gradient_sums_rows() {
        let p = projection();
        let mut grads = p.zeros_like();
        let x = Tensor::from_rows(&[vec![1.0, 2.0], vec![0.0, -1.0]]);
        let gy = Tensor::from_rows(&[vec![1.0, 0.0, 2.0], vec![3.0, 1.0, -1.0]]);
        RowProjection::assign_grads(&mut grads, &gy, &x).unwrap();

        assert!(grads
            .biases
            .dense()
            .unwrap()
            .equals(&Tensor::vector(vec![4.0, 1.0, 1.0]), 1e-12));
        assert_eq!(grads.weights.shape(), [2, 3]);
        assert_eq!(p.input_errors(&gy).unwrap().shape, [2, 2]);
    }

    #[test]
    fn test_forward_rejects_wrong_width() {
        let x = Tensor::from_rows(&[vec![1.0, 2.0, 3.0]]);
        assert!(matches!(
            projection().forward(&x),
            Err(LayerError::ShapeMismatch { .. })
        ));
    }
}
