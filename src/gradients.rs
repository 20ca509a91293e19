//! Gradient Utilities
//!
//! Operations over a whole gradient container, whatever layer (or stack of
//! layers) it belongs to.
//!
//! ## Components
//!
//! - **Gradient Norm Computation**: the L2 norm of every gradient value
//! - **Gradient Clipping**: scale the gradients down to a maximum norm
//!
//! ## Algorithm
//!
//! ```text
//! norm = √(Σ gradient²)
//! if norm > max_norm:
//!     gradients *= (max_norm / norm)
//! ```
//!
//! All gradients are scaled by the same factor, so their relative magnitudes
//! (the direction of the update) are preserved. Sparse gradients only scale
//! the entries they store.

use crate::layers::ParamsContainer;

/// Compute the L2 norm of all gradients in a container
pub fn grad_norm<P: ParamsContainer + ?Sized>(grads: &P) -> f64 {
    grads
        .params()
        .iter()
        .map(|p| p.values().squared_norm())
        .sum::<f64>()
        .sqrt()
}

/// Clip gradients to a maximum norm
///
/// Returns the norm measured before clipping.
///
/// # Example
///
/// ```rust,ignore
/// let norm = clip_gradients(&mut grads, 1.0);
/// if norm > 1.0 {
///     log::debug!("clipped gradients of norm {:.4}", norm);
/// }
/// ```
pub fn clip_gradients<P: ParamsContainer + ?Sized>(grads: &mut P, max_norm: f64) -> f64 {
    let norm = grad_norm(grads);

    // Only clip if norm exceeds threshold
    if norm > max_norm && norm > 0.0 {
        let scale = max_norm / norm;
        for p in grads.params_mut() {
            p.scale(scale);
        }
    }
    norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::GateParameters;
    use crate::tensor::{SparseTensor, Tensor};
    use assert_approx_eq::assert_approx_eq;

    fn grads() -> GateParameters {
        let mut g = GateParameters::new(2, 1, false);
        g.weights.set_values(Tensor::new(vec![3.0, 0.0], [1, 2])).unwrap();
        g.biases.set_values(Tensor::vector(vec![4.0])).unwrap();
        g
    }

    #[test]
    fn test_grad_norm() {
        assert_approx_eq!(grad_norm(&grads()), 5.0);
    }

    #[test]
    fn test_clip_scales_to_max_norm() {
        let mut g = grads();
        let norm = clip_gradients(&mut g, 1.0);
        assert_approx_eq!(norm, 5.0);
        assert_approx_eq!(grad_norm(&g), 1.0);
        assert_approx_eq!(g.biases.dense().unwrap().data[0], 0.8);
    }

    #[test]
    fn test_clip_below_threshold_is_noop() {
        let mut g = grads();
        clip_gradients(&mut g, 10.0);
        assert_approx_eq!(g.weights.dense().unwrap().data[0], 3.0);
    }

    #[test]
    fn test_sparse_gradients() {
        let mut g = GateParameters::new(4, 1, true);
        g.weights
            .set_values(SparseTensor::new([1, 4], vec![(0, 1, 6.0), (0, 3, 8.0)]))
            .unwrap();
        assert_approx_eq!(grad_norm(&g), 10.0);
        clip_gradients(&mut g, 5.0);
        assert_approx_eq!(g.weights.values().to_dense().data[3], 4.0);
    }
}
