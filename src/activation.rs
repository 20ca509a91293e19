//! Activation Functions
//!
//! This module provides the activation functions a layer can apply to its
//! output, together with their derivatives for backpropagation.
//!
//! ## Derivatives
//!
//! Every derivative is evaluated from the **pre-activation** values, the ones
//! a [`StatefulArray`](crate::arrays::StatefulArray) keeps in
//! `values_not_activated` when it is activated:
//!
//! ```text
//! y  = f(z)
//! dy/dz = f'(z)
//! ```
//!
//! ## GELU
//!
//! We use the tanh approximation:
//!
//! ```text
//! GELU(x) ≈ 0.5 × x × (1 + tanh(√(2/π) × (x + 0.044715 × x³)))
//! ```
//!
//! ## Softmax
//!
//! Softmax is not element-wise, so its true derivative is a Jacobian. A
//! softmax output is only ever paired with the softmax cross-entropy loss,
//! whose errors `y - gold` already are the gradient with respect to the
//! pre-activation. The derivative reported here is therefore all ones.

use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

const SQRT_2_OVER_PI: f64 = 0.797_884_560_802_865_4;

/// The closed set of activation functions
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ActivationFunction {
    Tanh,
    Sigmoid,
    ReLU,
    LeakyReLU { slope: f64 },
    ELU { alpha: f64 },
    Softsign,
    HardTanh,
    GeLU,
    Softmax,
}

impl ActivationFunction {
    /// Apply the function to every element (row-wise for softmax)
    pub fn f(&self, x: &Tensor) -> Tensor {
        match *self {
            ActivationFunction::Tanh => x.map(f64::tanh),
            ActivationFunction::Sigmoid => x.map(sigmoid),
            ActivationFunction::ReLU => x.map(|v| v.max(0.0)),
            ActivationFunction::LeakyReLU { slope } => {
                x.map(|v| if v > 0.0 { v } else { slope * v })
            }
            ActivationFunction::ELU { alpha } => {
                x.map(|v| if v > 0.0 { v } else { alpha * (v.exp() - 1.0) })
            }
            ActivationFunction::Softsign => x.map(|v| v / (1.0 + v.abs())),
            ActivationFunction::HardTanh => x.map(|v| v.clamp(-1.0, 1.0)),
            ActivationFunction::GeLU => x.map(|v| {
                0.5 * v * (1.0 + (SQRT_2_OVER_PI * (v + 0.044715 * v.powi(3))).tanh())
            }),
            ActivationFunction::Softmax => {
                // Vectors are columns; softmax runs over the whole vector
                if x.cols() == 1 {
                    x.t().softmax_rows().t()
                } else {
                    x.softmax_rows()
                }
            }
        }
    }

    /// Derivative at the pre-activation values `x`
    pub fn df(&self, x: &Tensor) -> Tensor {
        match *self {
            ActivationFunction::Tanh => x.map(|v| {
                let t = v.tanh();
                1.0 - t * t
            }),
            ActivationFunction::Sigmoid => x.map(|v| {
                let s = sigmoid(v);
                s * (1.0 - s)
            }),
            ActivationFunction::ReLU => x.map(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            ActivationFunction::LeakyReLU { slope } => {
                x.map(|v| if v > 0.0 { 1.0 } else { slope })
            }
            ActivationFunction::ELU { alpha } => {
                x.map(|v| if v > 0.0 { 1.0 } else { alpha * v.exp() })
            }
            ActivationFunction::Softsign => x.map(|v| 1.0 / (1.0 + v.abs()).powi(2)),
            ActivationFunction::HardTanh => {
                x.map(|v| if (-1.0..=1.0).contains(&v) { 1.0 } else { 0.0 })
            }
            ActivationFunction::GeLU => x.map(gelu_deriv),
            ActivationFunction::Softmax => x.map(|_| 1.0),
        }
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// GELU derivative
///
/// Product rule over `0.5 × x × (1 + tanh(inner))`, with the sech² term from
/// the derivative of tanh.
fn gelu_deriv(x: f64) -> f64 {
    let inner = SQRT_2_OVER_PI * (x + 0.044715 * x.powi(3));
    let tanh_inner = inner.tanh();
    let sech_sq = 1.0 - tanh_inner * tanh_inner;
    0.5 * (1.0 + tanh_inner)
        + 0.5 * x * sech_sq * SQRT_2_OVER_PI * (1.0 + 3.0 * 0.044715 * x.powi(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_deriv(f: ActivationFunction, x: f64) -> f64 {
        let h = 1e-6;
        let plus = f.f(&Tensor::vector(vec![x + h])).data[0];
        let minus = f.f(&Tensor::vector(vec![x - h])).data[0];
        (plus - minus) / (2.0 * h)
    }

    #[test]
    fn test_derivatives_match_finite_differences() {
        let functions = [
            ActivationFunction::Tanh,
            ActivationFunction::Sigmoid,
            ActivationFunction::ReLU,
            ActivationFunction::LeakyReLU { slope: 0.1 },
            ActivationFunction::ELU { alpha: 0.5 },
            ActivationFunction::Softsign,
            ActivationFunction::HardTanh,
            ActivationFunction::GeLU,
        ];
        for f in functions {
            for &x in &[-1.7, -0.3, 0.4, 0.9, 2.2] {
                let analytic = f.df(&Tensor::vector(vec![x])).data[0];
                let numeric = numeric_deriv(f, x);
                assert!(
                    (analytic - numeric).abs() < 1e-5,
                    "{:?} at {}: {} vs {}",
                    f,
                    x,
                    analytic,
                    numeric
                );
            }
        }
    }

    #[test]
    fn test_softmax_on_column_vector() {
        let y = ActivationFunction::Softmax.f(&Tensor::vector(vec![1.0, 1.0, 1.0, 1.0]));
        assert_eq!(y.shape, [4, 1]);
        for v in y.data {
            assert!((v - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn test_activation_serde() {
        let json = serde_json::to_string(&ActivationFunction::LeakyReLU { slope: 0.01 }).unwrap();
        let back: ActivationFunction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ActivationFunction::LeakyReLU { slope: 0.01 });
    }
}
