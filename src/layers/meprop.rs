//! meProp
//!
//! Sparsified backpropagation: the input errors of a layer are computed from
//! the top `k` fraction of its output-unit gradients only, ranked by
//! magnitude. Parameter gradients are always computed from the full gradient.
//!
//! ```text
//! g        = [0.1, -0.9, 0.3, 0.05]
//! k = 0.5  → keep ceil(0.5 · 4) = 2 units
//! restrict = [0.0, -0.9, 0.3, 0.0]
//! ```

use crate::error::{LayerError, Result};
use crate::tensor::Tensor;

/// Check that `k`, when given, lies in `[0.0, 1.0]`
pub fn validate(k: Option<f64>) -> Result<()> {
    match k {
        Some(k) if !(0.0..=1.0).contains(&k) => Err(LayerError::config(format!(
            "mePropK must be in [0.0, 1.0], got {}",
            k
        ))),
        _ => Ok(()),
    }
}

/// Binary mask keeping the `ceil(k · n)` largest elements of `g` by magnitude
pub fn top_k_mask(g: &Tensor, k: f64) -> Tensor {
    let n = g.len();
    let keep = ((k * n as f64).ceil() as usize).min(n);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| g.data[b].abs().total_cmp(&g.data[a].abs()));

    let mut mask = Tensor::zeros(g.rows(), g.cols());
    for &i in &order[..keep] {
        mask.data[i] = 1.0;
    }
    mask
}

/// `g` restricted to its top-`k` units, or `g` itself without `k`
pub fn restrict(g: &Tensor, k: Option<f64>) -> Tensor {
    match k {
        Some(k) if k < 1.0 => g.prod(&top_k_mask(g, k)),
        _ => g.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_range() {
        assert!(validate(None).is_ok());
        assert!(validate(Some(0.0)).is_ok());
        assert!(validate(Some(1.0)).is_ok());
        assert!(matches!(
            validate(Some(1.5)),
            Err(LayerError::Configuration(_))
        ));
        assert!(validate(Some(-0.1)).is_err());
    }

    #[test]
    fn test_restrict_keeps_largest() {
        let g = Tensor::vector(vec![0.1, -0.9, 0.3, 0.05]);
        let r = restrict(&g, Some(0.5));
        assert_eq!(r.data, vec![0.0, -0.9, 0.3, 0.0]);
        assert_eq!(restrict(&g, Some(1.0)).data, g.data);
        assert_eq!(restrict(&g, Some(0.0)).data, vec![0.0; 4]);
    }
}
