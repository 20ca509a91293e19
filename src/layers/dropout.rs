//! Input Dropout
//!
//! When a layer forwards with dropout enabled, each element of its input is
//! kept with probability `1 - p` and scaled by `1 / (1 - p)` (inverted
//! dropout), or zeroed. Evaluation passes the input through unchanged, so no
//! rescaling is needed at inference time.
//!
//! The mask is drawn anew at every forward call and kept so that backward can
//! route the input errors through the same mask.

use crate::error::{LayerError, Result};
use crate::tensor::{AnyTensor, SparseTensor, Tensor};
use log::warn;

/// Dropout applied to one layer input
#[derive(Clone, Copy, Debug)]
pub struct Dropout {
    pub rate: f64,
}

impl Dropout {
    /// Create a dropout with probability `rate` of dropping each element
    pub fn new(rate: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(LayerError::config(format!(
                "dropout must be in [0.0, 1.0], got {}",
                rate
            )));
        }
        if rate >= 1.0 {
            warn!("dropout of 1.0 drops every input element");
        }
        Ok(Self { rate })
    }

    /// Mask the input, returning the masked copy and the mask for backward
    pub fn apply(&self, x: &AnyTensor) -> (AnyTensor, DropoutMask) {
        if self.rate == 0.0 {
            return (x.clone(), DropoutMask { mask: None });
        }

        let shape = x.shape();
        let scale = if self.rate >= 1.0 {
            0.0
        } else {
            1.0 / (1.0 - self.rate)
        };
        let mut mask = Tensor::zeros(shape[0], shape[1]);
        for m in mask.data.iter_mut() {
            if rand::random::<f64>() >= self.rate {
                *m = scale;
            }
        }

        let masked = match x {
            AnyTensor::Dense(t) => AnyTensor::Dense(t.prod(&mask)),
            AnyTensor::Sparse(s) => {
                let entries = s
                    .entries()
                    .iter()
                    .filter(|&&(i, j, _)| mask.get(i, j) != 0.0)
                    .map(|&(i, j, v)| (i, j, v * mask.get(i, j)))
                    .collect();
                AnyTensor::Sparse(SparseTensor::new(shape, entries))
            }
        };

        (masked, DropoutMask { mask: Some(mask) })
    }
}

/// Mask drawn by a forward call
#[derive(Clone, Debug, Default)]
pub struct DropoutMask {
    /// Per-element factor (`0` or `1 / (1 - p)`); `None` if nothing was dropped
    mask: Option<Tensor>,
}

impl DropoutMask {
    /// Errors of the unmasked input given the errors of the masked one
    pub fn backward(&self, errors: &Tensor) -> Tensor {
        match &self.mask {
            Some(mask) => errors.prod(mask),
            None => errors.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_values_are_zero_or_scaled() {
        let dropout = Dropout::new(0.25).unwrap();
        let x = AnyTensor::Dense(Tensor::fill(50, 1, 1.0));
        let (masked, mask) = dropout.apply(&x);
        for &v in &masked.to_dense().data {
            assert!(v == 0.0 || (v - 1.0 / 0.75).abs() < 1e-12);
        }

        let errors = Tensor::fill(50, 1, 1.0);
        assert_eq!(mask.backward(&errors).data, masked.to_dense().data);
    }

    #[test]
    fn test_zero_rate_is_identity() {
        let dropout = Dropout::new(0.0).unwrap();
        let x = AnyTensor::Dense(Tensor::vector(vec![0.3, -0.2]));
        let (masked, _) = dropout.apply(&x);
        assert_eq!(masked, x);
    }

    #[test]
    fn test_sparse_input_keeps_only_kept_entries() {
        let dropout = Dropout::new(0.5).unwrap();
        let x = AnyTensor::Sparse(SparseTensor::binary_vector(100, &[3, 10, 42, 77]));
        let (masked, _) = dropout.apply(&x);
        match masked {
            AnyTensor::Sparse(s) => {
                assert!(s.nnz() <= 4);
                assert!(s.entries().iter().all(|e| (e.2 - 2.0).abs() < 1e-12));
            }
            AnyTensor::Dense(_) => panic!("sparse input must stay sparse"),
        }
    }

    #[test]
    fn test_rate_out_of_range() {
        assert!(Dropout::new(1.2).is_err());
    }
}
