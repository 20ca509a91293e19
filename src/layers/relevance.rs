//! Layer-wise Relevance Propagation
//!
//! The relevance of an output unit is redistributed to the elements that fed
//! its pre-activation, proportionally to their contribution:
//!
//! ```text
//! R_i = Σ_j  c_ji / (z_j + ε · sign(z_j)) · R_j
//! ```
//!
//! where `c_ji` is the contribution of element `i` to unit `j` recorded by
//! the contribution forward, `z_j = Σ_i c_ji` the pre-activation of unit `j`
//! and `ε` a small stabilizer keeping the ratio finite when `z_j` is near 0.

use crate::error::{LayerError, Result};
use crate::tensor::{AnyTensor, Tensor};

/// Stabilizer of the relevance ratio
pub const RELEVANCE_EPSILON: f64 = 0.01;

/// Contributions `c_ji = w_ji · x_i + bias_share · b_j / n` of a linear unit
///
/// `bias_share` is the part of the bias assigned to this input (`1.0` for a
/// single input, `0.5` when a recurrent input shares it).
pub fn linear_contributions(
    w: &Tensor,
    x: &AnyTensor,
    b: &Tensor,
    bias_share: f64,
) -> Tensor {
    let x = x.to_dense();
    let n = x.len() as f64;
    let mut c = Tensor::zeros(w.rows(), w.cols());
    for j in 0..w.rows() {
        let bias = bias_share * b.data[j] / n;
        for i in 0..w.cols() {
            c.set(j, i, w.get(j, i) * x.data[i] + bias);
        }
    }
    c
}

/// Redistribute `relevance` over the columns of `contributions`
pub fn distribute(contributions: &Tensor, z: &Tensor, relevance: &Tensor) -> Result<Tensor> {
    if z.len() != contributions.rows() || relevance.len() != contributions.rows() {
        return Err(LayerError::shape_mismatch(
            &[contributions.rows()],
            &[relevance.len()],
        ));
    }
    let mut r = Tensor::zeros(contributions.cols(), 1);
    for j in 0..contributions.rows() {
        let z_j = z.data[j];
        let sign = if z_j >= 0.0 { 1.0 } else { -1.0 };
        let factor = relevance.data[j] / (z_j + RELEVANCE_EPSILON * sign);
        for i in 0..contributions.cols() {
            r.data[i] += contributions.get(j, i) * factor;
        }
    }
    Ok(r)
}
