//! Stateful and Parameter Arrays
//!
//! ## StatefulArray
//!
//! A tensor wrapper with the facets a layer needs during one forward/backward
//! cycle. Each facet has a predecessor that must be set first:
//!
//! ```text
//!                   ┌──> errors
//! empty ──> values ─┼──> relevance
//!             │     └──> recurrent_relevance
//!             └──> activate() keeps values_not_activated
//! ```
//!
//! Reading a facet that was never assigned fails with
//! `LayerError::UninitializedState`. Facets are overwritten by the next cycle,
//! never cleared implicitly.
//!
//! ## ParamsArray
//!
//! One trainable tensor of a layer (a weight matrix, a bias vector, ...) plus
//! the support structure of the update method that trains it, created on first
//! use by the optimizer. The same type holds gradients: a gradient container is
//! just a parameters container whose values are errors.

use crate::activation::ActivationFunction;
use crate::error::{LayerError, Result};
use crate::tensor::{AnyTensor, Tensor};
use crate::update_methods::SupportStructure;
use serde::{Deserialize, Serialize};

/// Whether two shapes are equal, or both describe vectors of the same length
fn compatible(a: [usize; 2], b: [usize; 2]) -> bool {
    let is_vector = |s: [usize; 2]| s[0] == 1 || s[1] == 1;
    a == b || (is_vector(a) && is_vector(b) && a[0] * a[1] == b[0] * b[1])
}

fn reshape_dense(t: Tensor, shape: [usize; 2]) -> Tensor {
    if t.shape == shape {
        t
    } else {
        Tensor::new(t.data, shape)
    }
}

/// Values, errors and relevance of one layer input or output
#[derive(Debug, Default)]
pub struct StatefulArray {
    shape: Option<[usize; 2]>,
    activation: Option<ActivationFunction>,
    values: Option<AnyTensor>,
    values_not_activated: Option<Tensor>,
    errors: Option<Tensor>,
    relevance: Option<Tensor>,
    recurrent_relevance: Option<Tensor>,
}

impl StatefulArray {
    /// An empty array of unconstrained shape
    pub fn new(activation: Option<ActivationFunction>) -> Self {
        Self {
            activation,
            ..Default::default()
        }
    }

    /// An empty array holding a vector of `size` elements
    pub fn with_size(size: usize, activation: Option<ActivationFunction>) -> Self {
        Self {
            shape: Some([size, 1]),
            activation,
            ..Default::default()
        }
    }

    pub fn activation(&self) -> Option<ActivationFunction> {
        self.activation
    }

    pub fn has_values(&self) -> bool {
        self.values.is_some()
    }

    /// Shape of the current values, or of the declared size when empty
    pub fn shape(&self) -> Option<[usize; 2]> {
        self.values.as_ref().map(|v| v.shape()).or(self.shape)
    }

    pub fn values(&self) -> Result<&AnyTensor> {
        self.values
            .as_ref()
            .ok_or(LayerError::uninitialized("values"))
    }

    /// The values, which must be dense
    pub fn dense_values(&self) -> Result<&Tensor> {
        self.values()?.as_dense()
    }

    /// Assign new values, resetting the pre-activation snapshot
    ///
    /// A row vector is accepted where a column vector of the same length is
    /// expected (and vice versa); it is stored in the declared orientation.
    pub fn assign_values(&mut self, values: impl Into<AnyTensor>) -> Result<()> {
        let values = values.into();
        let values = match self.shape {
            Some(shape) if shape != values.shape() => {
                if !compatible(shape, values.shape()) {
                    return Err(LayerError::shape_mismatch(&shape, &values.shape()));
                }
                match values {
                    AnyTensor::Dense(t) => AnyTensor::Dense(reshape_dense(t, shape)),
                    sparse => sparse.as_column(),
                }
            }
            _ => values,
        };
        self.values = Some(values);
        self.values_not_activated = None;
        Ok(())
    }

    /// Apply the activation function to the values
    ///
    /// The pre-activation tensor is kept for [`Self::calculate_activation_deriv`].
    /// Does nothing when no activation is configured.
    pub fn activate(&mut self) -> Result<()> {
        let Some(activation) = self.activation else {
            return Ok(());
        };
        let z = self.dense_values()?.clone();
        self.values = Some(AnyTensor::Dense(activation.f(&z)));
        self.values_not_activated = Some(z);
        Ok(())
    }

    /// Assign pre-activation values and activate them
    pub fn assign_activated(&mut self, z: Tensor) -> Result<()> {
        self.assign_values(z)?;
        self.activate()
    }

    /// Values before `activate()`, or the values themselves without activation
    pub fn values_not_activated(&self) -> Result<&Tensor> {
        match &self.values_not_activated {
            Some(z) => Ok(z),
            None if self.activation.is_none() => self.dense_values(),
            None => Err(LayerError::uninitialized("values_not_activated")),
        }
    }

    /// Element-wise activation derivative at the pre-activation values
    ///
    /// All ones when no activation is configured.
    pub fn calculate_activation_deriv(&self) -> Result<Tensor> {
        match self.activation {
            None => {
                let shape = self.values()?.shape();
                Ok(Tensor::fill(shape[0], shape[1], 1.0))
            }
            Some(activation) => Ok(activation.df(self.values_not_activated()?)),
        }
    }

    fn check_facet(&self, t: Tensor) -> Result<Tensor> {
        let shape = self.values()?.shape();
        if !compatible(shape, t.shape) {
            return Err(LayerError::shape_mismatch(&shape, &t.shape));
        }
        Ok(reshape_dense(t, shape))
    }

    pub fn errors(&self) -> Result<&Tensor> {
        self.errors
            .as_ref()
            .ok_or(LayerError::uninitialized("errors"))
    }

    pub fn has_errors(&self) -> bool {
        self.errors.is_some()
    }

    /// Assign errors; requires values with a matching shape
    pub fn assign_errors(&mut self, errors: Tensor) -> Result<()> {
        let errors = self.check_facet(errors)?;
        self.errors = Some(errors);
        Ok(())
    }

    pub fn clear_errors(&mut self) {
        self.errors = None;
    }

    /// Add to the current errors, or assign them when none are set
    pub fn add_errors(&mut self, errors: &Tensor) -> Result<()> {
        let errors = self.check_facet(errors.clone())?;
        match &mut self.errors {
            Some(current) => {
                current.assign_add(&errors);
            }
            None => self.errors = Some(errors),
        }
        Ok(())
    }

    pub fn relevance(&self) -> Result<&Tensor> {
        self.relevance
            .as_ref()
            .ok_or(LayerError::uninitialized("relevance"))
    }

    pub fn assign_relevance(&mut self, relevance: Tensor) -> Result<()> {
        let relevance = self.check_facet(relevance)?;
        self.relevance = Some(relevance);
        Ok(())
    }

    pub fn recurrent_relevance(&self) -> Result<&Tensor> {
        self.recurrent_relevance
            .as_ref()
            .ok_or(LayerError::uninitialized("recurrent_relevance"))
    }

    pub fn assign_recurrent_relevance(&mut self, relevance: Tensor) -> Result<()> {
        let relevance = self.check_facet(relevance)?;
        self.recurrent_relevance = Some(relevance);
        Ok(())
    }
}

/// Deep copy of the values and activation state only
///
/// The copy starts without errors or relevance.
impl Clone for StatefulArray {
    fn clone(&self) -> Self {
        Self {
            shape: self.shape,
            activation: self.activation,
            values: self.values.clone(),
            values_not_activated: self.values_not_activated.clone(),
            errors: None,
            relevance: None,
            recurrent_relevance: None,
        }
    }
}

/// Role of a parameter tensor inside its layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    Weights,
    Biases,
}

/// A trainable tensor of a layer (or its gradient)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParamsArray {
    values: AnyTensor,
    kind: ParamKind,
    /// Trained through sparse gradients only
    sparse: bool,
    #[serde(skip)]
    support_structure: Option<SupportStructure>,
}

impl ParamsArray {
    /// Zero-initialized weights of shape `[rows, cols]`
    pub fn weights(rows: usize, cols: usize, sparse: bool) -> Self {
        Self {
            values: AnyTensor::Dense(Tensor::zeros(rows, cols)),
            kind: ParamKind::Weights,
            sparse,
            support_structure: None,
        }
    }

    /// Zero-initialized bias vector
    pub fn biases(size: usize) -> Self {
        Self {
            values: AnyTensor::Dense(Tensor::zeros(size, 1)),
            kind: ParamKind::Biases,
            sparse: false,
            support_structure: None,
        }
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    pub fn is_sparse(&self) -> bool {
        self.sparse
    }

    pub fn shape(&self) -> [usize; 2] {
        self.values.shape()
    }

    pub fn values(&self) -> &AnyTensor {
        &self.values
    }

    /// The values, which must be dense
    pub fn dense(&self) -> Result<&Tensor> {
        self.values.as_dense()
    }

    pub fn dense_mut(&mut self) -> Result<&mut Tensor> {
        self.values.as_dense_mut()
    }

    /// Replace the values with a tensor (dense or sparse) of the same shape
    pub fn set_values(&mut self, values: impl Into<AnyTensor>) -> Result<()> {
        let values = values.into();
        if !compatible(self.shape(), values.shape()) {
            return Err(LayerError::shape_mismatch(&self.shape(), &values.shape()));
        }
        self.values = match values {
            AnyTensor::Dense(t) => AnyTensor::Dense(reshape_dense(t, self.shape())),
            sparse => sparse,
        };
        Ok(())
    }

    /// Copy the values of another array of the same shape
    pub fn assign_values(&mut self, other: &ParamsArray) -> Result<()> {
        self.set_values(other.values.clone())
    }

    /// Add another tensor of the same shape in place
    pub fn accumulate(&mut self, other: &AnyTensor) -> Result<()> {
        self.values = self.values.add(other)?;
        Ok(())
    }

    pub fn scale(&mut self, factor: f64) {
        self.values.assign_prod_scalar(factor);
    }

    pub fn div_scalar(&mut self, divisor: f64) {
        self.values.assign_div_scalar(divisor);
    }

    /// Reset the values to dense zeros
    pub fn zero(&mut self) {
        let shape = self.shape();
        self.values = AnyTensor::Dense(Tensor::zeros(shape[0], shape[1]));
    }

    pub fn support_structure(&self) -> Option<&SupportStructure> {
        self.support_structure.as_ref()
    }

    pub fn support_structure_mut(&mut self) -> &mut Option<SupportStructure> {
        &mut self.support_structure
    }

    /// Values and support structure borrowed together
    pub fn split_mut(&mut self) -> (&mut AnyTensor, &mut Option<SupportStructure>) {
        (&mut self.values, &mut self.support_structure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::SparseTensor;

    #[test]
    fn test_errors_before_assignment_fail() {
        let array = StatefulArray::with_size(3, None);
        assert_eq!(
            array.errors().unwrap_err(),
            LayerError::uninitialized("errors")
        );
        assert!(array.relevance().is_err());
        assert!(array.recurrent_relevance().is_err());
    }

    #[test]
    fn test_assign_errors_requires_values() {
        let mut array = StatefulArray::with_size(3, None);
        let err = array.assign_errors(Tensor::vector(vec![0.1, 0.2, 0.3]));
        assert_eq!(err, Err(LayerError::uninitialized("values")));
    }

    #[test]
    fn test_assign_errors_shape_mismatch() {
        let mut array = StatefulArray::with_size(3, None);
        array.assign_values(Tensor::vector(vec![1.0, 2.0, 3.0])).unwrap();
        let err = array.assign_errors(Tensor::vector(vec![0.1, 0.2])).unwrap_err();
        assert!(matches!(err, LayerError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_row_vector_assigned_to_column() {
        let mut array = StatefulArray::with_size(3, None);
        array
            .assign_values(Tensor::new(vec![1.0, 2.0, 3.0], [1, 3]))
            .unwrap();
        assert_eq!(array.values().unwrap().shape(), [3, 1]);
        array
            .assign_errors(Tensor::new(vec![0.1, 0.2, 0.3], [1, 3]))
            .unwrap();
        assert_eq!(array.errors().unwrap().shape, [3, 1]);
    }

    #[test]
    fn test_activate_keeps_pre_activation() {
        let mut array = StatefulArray::with_size(2, Some(ActivationFunction::Tanh));
        array.assign_values(Tensor::vector(vec![0.5, -1.0])).unwrap();
        array.activate().unwrap();
        let y = array.dense_values().unwrap();
        assert!((y.data[0] - 0.5f64.tanh()).abs() < 1e-12);
        assert_eq!(array.values_not_activated().unwrap().data, vec![0.5, -1.0]);

        let deriv = array.calculate_activation_deriv().unwrap();
        assert!((deriv.data[1] - (1.0 - 1.0f64.tanh().powi(2))).abs() < 1e-12);
    }

    #[test]
    fn test_activate_on_sparse_values_is_unsupported() {
        let mut array = StatefulArray::with_size(4, Some(ActivationFunction::Sigmoid));
        array
            .assign_values(SparseTensor::binary_vector(4, &[1]))
            .unwrap();
        assert!(matches!(
            array.activate(),
            Err(LayerError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_clone_drops_errors() {
        let mut array = StatefulArray::with_size(2, None);
        array.assign_values(Tensor::vector(vec![1.0, 2.0])).unwrap();
        array.assign_errors(Tensor::vector(vec![0.1, 0.2])).unwrap();

        let copy = array.clone();
        assert_eq!(copy.dense_values().unwrap().data, vec![1.0, 2.0]);
        assert!(copy.errors().is_err());
        assert!(array.errors().is_ok());
    }

    #[test]
    fn test_params_array_accumulate_mixed() {
        let mut gw = ParamsArray::weights(2, 2, true);
        let sparse = AnyTensor::Sparse(SparseTensor::new([2, 2], vec![(0, 1, 0.5)]));
        gw.accumulate(&sparse).unwrap();
        gw.accumulate(&sparse).unwrap();
        assert_eq!(gw.values().to_dense().data, vec![0.0, 1.0, 0.0, 0.0]);

        let wrong = AnyTensor::Dense(Tensor::zeros(3, 2));
        assert!(gw.accumulate(&wrong).is_err());
    }
}
