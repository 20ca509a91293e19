//! Update Methods
//!
//! An update method turns the (averaged) gradient of a parameter tensor into
//! an in-place change of its values. Adaptive methods keep a per-parameter
//! memory, the *support structure*, stored next to the values it belongs to
//! in [`ParamsArray`].
//!
//! ## Rules
//!
//! ```text
//! SGD:       param -= lr · g
//! Momentum:  v = μ · v - lr · g;           param += v
//! Nesterov:  vPrev = v; v = μ · v - lr · g; param += (1 + μ) · v - μ · vPrev
//! AdaGrad:   s += g²;                      param -= lr · g / (√s + ε)
//! RMSProp:   m = d · m + (1 - d) · g²;     param -= lr · g / (√m + ε)
//! Adam:      m = β₁ · m + (1 - β₁) · g
//!            v = β₂ · v + (1 - β₂) · g²
//!            param -= lr · m̂ / (√v̂ + ε)   (m̂, v̂ bias-corrected at step t)
//! ```
//!
//! ## Dense and Sparse Paths
//!
//! Both paths apply the same per-entry rule. The dense path visits every
//! entry of the parameter; the sparse path only the coordinates stored in the
//! gradient, leaving the other values and their support entries untouched.
//!
//! ## Scheduling Signals
//!
//! Methods may react to the start of an epoch, a batch or an example (the
//! default is to ignore them): the learning-rate schedule decays on
//! `new_epoch`, Adam advances its timestep on `new_example`.

use crate::arrays::{ParamKind, ParamsArray};
use crate::error::{LayerError, Result};
use crate::tensor::{AnyTensor, Tensor};
use serde::{Deserialize, Serialize};

/// Per-parameter memory of an adaptive update method
#[derive(Clone, Debug, PartialEq)]
pub enum SupportStructure {
    Momentum { v: Tensor },
    Nesterov { v: Tensor, v_prev: Tensor },
    AdaGrad { sum_squares: Tensor },
    RMSProp { second_moments: Tensor },
    Adam {
        first_moments: Tensor,
        second_moments: Tensor,
    },
}

impl SupportStructure {
    fn kind(&self) -> &'static str {
        match self {
            SupportStructure::Momentum { .. } => "Momentum",
            SupportStructure::Nesterov { .. } => "Nesterov",
            SupportStructure::AdaGrad { .. } => "AdaGrad",
            SupportStructure::RMSProp { .. } => "RMSProp",
            SupportStructure::Adam { .. } => "Adam",
        }
    }
}

fn wrong_structure(method: &str, found: &SupportStructure) -> LayerError {
    LayerError::config(format!(
        "{} update on a parameter holding a {} support structure",
        method,
        found.kind()
    ))
}

/// Weight regularization applied before the update rule
///
/// Only weights are regularized, never biases.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Regularization {
    /// `w -= λ · sign(w)`
    L1 { lambda: f64 },
    /// `w *= 1 - λ`
    L2 { lambda: f64 },
}

impl Regularization {
    fn apply(&self, w: f64) -> f64 {
        match *self {
            Regularization::L1 { lambda } => {
                if w > 0.0 {
                    w - lambda
                } else if w < 0.0 {
                    w + lambda
                } else {
                    w
                }
            }
            Regularization::L2 { lambda } => w * (1.0 - lambda),
        }
    }
}

/// Learning rate decayed at every new epoch
///
/// ```text
/// lr(epoch) = max(min_learning_rate, lr0 / (1 + decay · epoch))
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LearningRateSchedule {
    pub initial: f64,
    pub decay: f64,
    pub min_learning_rate: f64,
    current: f64,
    epoch: usize,
}

impl LearningRateSchedule {
    pub fn new(initial: f64, decay: f64, min_learning_rate: f64) -> Self {
        Self {
            initial,
            decay,
            min_learning_rate,
            current: initial,
            epoch: 0,
        }
    }

    /// A rate that never changes
    pub fn constant(learning_rate: f64) -> Self {
        Self::new(learning_rate, 0.0, 0.0)
    }

    pub fn learning_rate(&self) -> f64 {
        self.current
    }

    pub fn new_epoch(&mut self) {
        self.epoch += 1;
        if self.decay > 0.0 {
            let decayed = self.initial / (1.0 + self.decay * self.epoch as f64);
            self.current = decayed.max(self.min_learning_rate);
        }
    }
}

/// A rule updating parameters from their gradients
pub trait UpdateMethod {
    fn name(&self) -> &'static str;

    /// Support structure for a parameter of the given shape, if the method needs one
    fn new_support_structure(&self, _shape: [usize; 2]) -> Option<SupportStructure> {
        None
    }

    /// The amount to subtract from entry `index` of a parameter whose gradient there is `g`
    fn optimize_entry(
        &self,
        support: Option<&mut SupportStructure>,
        index: usize,
        g: f64,
    ) -> Result<f64>;

    fn regularization(&self) -> Option<Regularization> {
        None
    }

    fn new_epoch(&mut self) {}

    fn new_batch(&mut self) {}

    fn new_example(&mut self) {}

    /// Update `param` in place from `grads`, a tensor of the same shape
    ///
    /// A sparse gradient only touches the entries it stores.
    fn update(&self, param: &mut ParamsArray, grads: &AnyTensor) -> Result<()> {
        let shape = param.shape();
        if grads.shape() != shape {
            return Err(LayerError::shape_mismatch(&shape, &grads.shape()));
        }
        let regularization = match param.kind() {
            ParamKind::Weights => self.regularization(),
            ParamKind::Biases => None,
        };

        let (values, support) = param.split_mut();
        let values = values.as_dense_mut()?;
        if support.is_none() {
            *support = self.new_support_structure(shape);
        }

        let mut step = |index: usize, g: f64| -> Result<()> {
            let w = &mut values.data[index];
            if let Some(r) = regularization {
                *w = r.apply(*w);
            }
            *w -= self.optimize_entry(support.as_mut(), index, g)?;
            Ok(())
        };

        match grads {
            AnyTensor::Dense(g) => {
                for (index, &g) in g.data.iter().enumerate() {
                    step(index, g)?;
                }
            }
            AnyTensor::Sparse(g) => {
                for &(row, col, g) in g.entries() {
                    step(row * shape[1] + col, g)?;
                }
            }
        }
        Ok(())
    }
}

/// Plain gradient descent
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LearningRateMethod {
    pub schedule: LearningRateSchedule,
    pub regularization: Option<Regularization>,
}

impl LearningRateMethod {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            schedule: LearningRateSchedule::constant(learning_rate),
            regularization: None,
        }
    }

    pub fn with_schedule(schedule: LearningRateSchedule) -> Self {
        Self {
            schedule,
            regularization: None,
        }
    }
}

impl UpdateMethod for LearningRateMethod {
    fn name(&self) -> &'static str {
        "LearningRate"
    }

    fn optimize_entry(&self, _: Option<&mut SupportStructure>, _: usize, g: f64) -> Result<f64> {
        Ok(self.schedule.learning_rate() * g)
    }

    fn regularization(&self) -> Option<Regularization> {
        self.regularization
    }

    fn new_epoch(&mut self) {
        self.schedule.new_epoch();
    }
}

/// Gradient descent with momentum
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MomentumMethod {
    pub schedule: LearningRateSchedule,
    pub momentum: f64,
    pub regularization: Option<Regularization>,
}

impl MomentumMethod {
    pub fn new(learning_rate: f64, momentum: f64) -> Self {
        Self {
            schedule: LearningRateSchedule::constant(learning_rate),
            momentum,
            regularization: None,
        }
    }
}

impl Default for MomentumMethod {
    fn default() -> Self {
        Self::new(0.01, 0.9)
    }
}

impl UpdateMethod for MomentumMethod {
    fn name(&self) -> &'static str {
        "Momentum"
    }

    fn new_support_structure(&self, shape: [usize; 2]) -> Option<SupportStructure> {
        Some(SupportStructure::Momentum {
            v: Tensor::zeros(shape[0], shape[1]),
        })
    }

    fn optimize_entry(
        &self,
        support: Option<&mut SupportStructure>,
        index: usize,
        g: f64,
    ) -> Result<f64> {
        match support {
            Some(SupportStructure::Momentum { v }) => {
                let v = &mut v.data[index];
                *v = self.momentum * *v - self.schedule.learning_rate() * g;
                Ok(-*v)
            }
            Some(other) => Err(wrong_structure(self.name(), other)),
            None => Err(LayerError::uninitialized("support_structure")),
        }
    }

    fn regularization(&self) -> Option<Regularization> {
        self.regularization
    }

    fn new_epoch(&mut self) {
        self.schedule.new_epoch();
    }
}

/// Momentum with a look-ahead correction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NesterovMomentumMethod {
    pub schedule: LearningRateSchedule,
    pub momentum: f64,
    pub regularization: Option<Regularization>,
}

impl NesterovMomentumMethod {
    pub fn new(learning_rate: f64, momentum: f64) -> Self {
        Self {
            schedule: LearningRateSchedule::constant(learning_rate),
            momentum,
            regularization: None,
        }
    }
}

impl Default for NesterovMomentumMethod {
    fn default() -> Self {
        Self::new(0.01, 0.9)
    }
}

impl UpdateMethod for NesterovMomentumMethod {
    fn name(&self) -> &'static str {
        "NesterovMomentum"
    }

    fn new_support_structure(&self, shape: [usize; 2]) -> Option<SupportStructure> {
        Some(SupportStructure::Nesterov {
            v: Tensor::zeros(shape[0], shape[1]),
            v_prev: Tensor::zeros(shape[0], shape[1]),
        })
    }

    fn optimize_entry(
        &self,
        support: Option<&mut SupportStructure>,
        index: usize,
        g: f64,
    ) -> Result<f64> {
        match support {
            Some(SupportStructure::Nesterov { v, v_prev }) => {
                let v = &mut v.data[index];
                let v_prev = &mut v_prev.data[index];
                *v_prev = *v;
                *v = self.momentum * *v - self.schedule.learning_rate() * g;
                Ok(self.momentum * *v_prev - (1.0 + self.momentum) * *v)
            }
            Some(other) => Err(wrong_structure(self.name(), other)),
            None => Err(LayerError::uninitialized("support_structure")),
        }
    }

    fn regularization(&self) -> Option<Regularization> {
        self.regularization
    }

    fn new_epoch(&mut self) {
        self.schedule.new_epoch();
    }
}

/// Learning rate scaled down by the history of squared gradients
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdaGradMethod {
    pub learning_rate: f64,
    pub epsilon: f64,
    pub regularization: Option<Regularization>,
}

impl AdaGradMethod {
    pub fn new(learning_rate: f64, epsilon: f64) -> Self {
        Self {
            learning_rate,
            epsilon,
            regularization: None,
        }
    }
}

impl Default for AdaGradMethod {
    fn default() -> Self {
        Self::new(0.01, 1e-8)
    }
}

impl UpdateMethod for AdaGradMethod {
    fn name(&self) -> &'static str {
        "AdaGrad"
    }

    fn new_support_structure(&self, shape: [usize; 2]) -> Option<SupportStructure> {
        Some(SupportStructure::AdaGrad {
            sum_squares: Tensor::zeros(shape[0], shape[1]),
        })
    }

    fn optimize_entry(
        &self,
        support: Option<&mut SupportStructure>,
        index: usize,
        g: f64,
    ) -> Result<f64> {
        match support {
            Some(SupportStructure::AdaGrad { sum_squares }) => {
                let s = &mut sum_squares.data[index];
                *s += g * g;
                Ok(self.learning_rate * g / (s.sqrt() + self.epsilon))
            }
            Some(other) => Err(wrong_structure(self.name(), other)),
            None => Err(LayerError::uninitialized("support_structure")),
        }
    }

    fn regularization(&self) -> Option<Regularization> {
        self.regularization
    }
}

/// Learning rate scaled down by a moving average of squared gradients
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RMSPropMethod {
    pub learning_rate: f64,
    pub epsilon: f64,
    pub decay: f64,
    pub regularization: Option<Regularization>,
}

impl RMSPropMethod {
    pub fn new(learning_rate: f64, epsilon: f64, decay: f64) -> Self {
        Self {
            learning_rate,
            epsilon,
            decay,
            regularization: None,
        }
    }
}

impl Default for RMSPropMethod {
    fn default() -> Self {
        Self::new(0.001, 1e-8, 0.95)
    }
}

impl UpdateMethod for RMSPropMethod {
    fn name(&self) -> &'static str {
        "RMSProp"
    }

    fn new_support_structure(&self, shape: [usize; 2]) -> Option<SupportStructure> {
        Some(SupportStructure::RMSProp {
            second_moments: Tensor::zeros(shape[0], shape[1]),
        })
    }

    fn optimize_entry(
        &self,
        support: Option<&mut SupportStructure>,
        index: usize,
        g: f64,
    ) -> Result<f64> {
        match support {
            Some(SupportStructure::RMSProp { second_moments }) => {
                let m = &mut second_moments.data[index];
                *m = self.decay * *m + (1.0 - self.decay) * g * g;
                Ok(self.learning_rate * g / (m.sqrt() + self.epsilon))
            }
            Some(other) => Err(wrong_structure(self.name(), other)),
            None => Err(LayerError::uninitialized("support_structure")),
        }
    }

    fn regularization(&self) -> Option<Regularization> {
        self.regularization
    }
}

/// Adam: momentum on the gradient and on its square, with bias correction
///
/// The timestep advances with every `new_example` signal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdamMethod {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub regularization: Option<Regularization>,
    step: usize,
}

impl AdamMethod {
    pub fn new(learning_rate: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            regularization: None,
            step: 0,
        }
    }

    pub fn step(&self) -> usize {
        self.step
    }
}

impl Default for AdamMethod {
    fn default() -> Self {
        Self::new(0.001, 0.9, 0.999, 1e-8)
    }
}

impl UpdateMethod for AdamMethod {
    fn name(&self) -> &'static str {
        "Adam"
    }

    fn new_support_structure(&self, shape: [usize; 2]) -> Option<SupportStructure> {
        Some(SupportStructure::Adam {
            first_moments: Tensor::zeros(shape[0], shape[1]),
            second_moments: Tensor::zeros(shape[0], shape[1]),
        })
    }

    fn optimize_entry(
        &self,
        support: Option<&mut SupportStructure>,
        index: usize,
        g: f64,
    ) -> Result<f64> {
        match support {
            Some(SupportStructure::Adam {
                first_moments,
                second_moments,
            }) => {
                let t = self.step.max(1) as i32;
                let m = &mut first_moments.data[index];
                let v = &mut second_moments.data[index];
                *m = self.beta1 * *m + (1.0 - self.beta1) * g;
                *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
                let m_hat = *m / (1.0 - self.beta1.powi(t));
                let v_hat = *v / (1.0 - self.beta2.powi(t));
                Ok(self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon))
            }
            Some(other) => Err(wrong_structure(self.name(), other)),
            None => Err(LayerError::uninitialized("support_structure")),
        }
    }

    fn regularization(&self) -> Option<Regularization> {
        self.regularization
    }

    fn new_example(&mut self) {
        self.step += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::SparseTensor;
    use assert_approx_eq::assert_approx_eq;

    fn param(values: Vec<f64>) -> ParamsArray {
        let mut p = ParamsArray::weights(values.len(), 1, false);
        p.set_values(Tensor::vector(values)).unwrap();
        p
    }

    fn values(p: &ParamsArray) -> Vec<f64> {
        p.dense().unwrap().data.clone()
    }

    #[test]
    fn test_sgd() {
        let mut p = param(vec![0.4, -0.2]);
        let method = LearningRateMethod::new(0.1);
        method
            .update(&mut p, &Tensor::vector(vec![1.0, -2.0]).into())
            .unwrap();
        let v = values(&p);
        assert_approx_eq!(v[0], 0.3);
        assert_approx_eq!(v[1], 0.0);
        assert!(p.support_structure().is_none());
    }

    #[test]
    fn test_momentum_accumulates_velocity() {
        let mut p = param(vec![1.0]);
        let method = MomentumMethod::new(0.1, 0.9);
        let g: AnyTensor = Tensor::vector(vec![1.0]).into();
        method.update(&mut p, &g).unwrap();
        // v = -0.1
        assert_approx_eq!(values(&p)[0], 0.9);
        method.update(&mut p, &g).unwrap();
        // v = 0.9 · -0.1 - 0.1 = -0.19
        assert_approx_eq!(values(&p)[0], 0.71);
    }

    #[test]
    fn test_nesterov_first_step() {
        let mut p = param(vec![1.0]);
        let method = NesterovMomentumMethod::new(0.1, 0.9);
        method
            .update(&mut p, &Tensor::vector(vec![1.0]).into())
            .unwrap();
        // vPrev = 0, v = -0.1: param += 1.9 · -0.1
        assert_approx_eq!(values(&p)[0], 0.81);
    }

    #[test]
    fn test_adagrad() {
        let mut p = param(vec![0.0]);
        let method = AdaGradMethod::new(0.5, 0.0);
        let g: AnyTensor = Tensor::vector(vec![2.0]).into();
        method.update(&mut p, &g).unwrap();
        assert_approx_eq!(values(&p)[0], -0.5);
        method.update(&mut p, &g).unwrap();
        assert_approx_eq!(values(&p)[0], -0.5 - 0.5 * 2.0 / 8.0f64.sqrt());
    }

    #[test]
    fn test_rmsprop_second_moment_converges_monotonically() {
        let mut p = param(vec![0.0]);
        let method = RMSPropMethod::default();
        let g: AnyTensor = Tensor::vector(vec![0.5]).into();

        let mut previous = 0.0;
        for _ in 0..200 {
            method.update(&mut p, &g).unwrap();
            let m = match p.support_structure() {
                Some(SupportStructure::RMSProp { second_moments }) => second_moments.data[0],
                other => panic!("unexpected support structure {:?}", other),
            };
            assert!(m > previous);
            assert!(m <= 0.25 + 1e-12);
            previous = m;
        }
        assert!((previous - 0.25).abs() < 1e-4);
    }

    #[test]
    fn test_sparse_update_leaves_other_entries() {
        let mut p = ParamsArray::weights(2, 3, true);
        p.set_values(Tensor::fill(2, 3, 1.0)).unwrap();
        let method = RMSPropMethod::new(0.1, 1e-8, 0.9);
        let g = SparseTensor::new([2, 3], vec![(1, 2, 0.5)]);
        method.update(&mut p, &g.into()).unwrap();

        let v = values(&p);
        for (i, &x) in v.iter().enumerate() {
            if i == 5 {
                assert!(x < 1.0);
            } else {
                assert_eq!(x, 1.0);
            }
        }
        match p.support_structure() {
            Some(SupportStructure::RMSProp { second_moments }) => {
                assert_eq!(second_moments.data.iter().filter(|&&m| m != 0.0).count(), 1);
            }
            other => panic!("unexpected support structure {:?}", other),
        }
    }

    #[test]
    fn test_wrong_support_structure() {
        let mut p = param(vec![0.0]);
        let g: AnyTensor = Tensor::vector(vec![1.0]).into();
        AdaGradMethod::default().update(&mut p, &g).unwrap();
        assert!(matches!(
            RMSPropMethod::default().update(&mut p, &g),
            Err(LayerError::Configuration(_))
        ));
    }

    #[test]
    fn test_shape_mismatch() {
        let mut p = param(vec![0.0, 0.0]);
        let g: AnyTensor = Tensor::vector(vec![1.0, 2.0, 3.0]).into();
        assert!(matches!(
            LearningRateMethod::new(0.1).update(&mut p, &g),
            Err(LayerError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_epoch_decay() {
        let mut method = LearningRateMethod::with_schedule(LearningRateSchedule::new(1.0, 1.0, 0.3));
        method.new_epoch();
        assert_approx_eq!(method.schedule.learning_rate(), 0.5);
        method.new_epoch();
        assert_approx_eq!(method.schedule.learning_rate(), 1.0 / 3.0);
        method.new_epoch();
        assert_approx_eq!(method.schedule.learning_rate(), 0.3);
    }

    #[test]
    fn test_adam_first_step_moves_by_learning_rate() {
        let mut p = param(vec![0.0, 0.0]);
        let mut method = AdamMethod::default();
        method.new_example();
        method
            .update(&mut p, &Tensor::vector(vec![0.3, -5.0]).into())
            .unwrap();
        let v = values(&p);
        assert!((v[0] + 0.001).abs() < 1e-6);
        assert!((v[1] - 0.001).abs() < 1e-6);
    }

    #[test]
    fn test_l2_regularization_skips_biases() {
        let method = LearningRateMethod {
            schedule: LearningRateSchedule::constant(0.0),
            regularization: Some(Regularization::L2 { lambda: 0.5 }),
        };
        let g: AnyTensor = Tensor::vector(vec![0.0]).into();

        let mut w = param(vec![2.0]);
        method.update(&mut w, &g).unwrap();
        assert_approx_eq!(values(&w)[0], 1.0);

        let mut b = ParamsArray::biases(1);
        b.set_values(Tensor::vector(vec![2.0])).unwrap();
        method.update(&mut b, &g).unwrap();
        assert_approx_eq!(values(&b)[0], 2.0);
    }
}
