//! Numeric Backend
//!
//! This module provides the small, fixed operation set every layer is written
//! against. Layers never reach into the storage of a tensor directly except
//! through these operations, so the backend can be reasoned about on its own.
//!
//! ## Core Concepts
//!
//! - **Tensor**: dense row-major `f64` matrix. Vectors are column vectors
//!   with shape `[n, 1]`.
//! - **SparseTensor**: coordinate-list matrix. The set of stored coordinates
//!   is its *mask*; coordinates outside the mask are structural zeros.
//! - **AnyTensor**: either of the two, dispatched by the call site.
//!
//! ## Example
//!
//! ```rust
//! use neurolayer::Tensor;
//!
//! let w = Tensor::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]);
//! let x = Tensor::vector(vec![1.0, -1.0]);
//! let y = w.dot(&x);
//! assert_eq!(y.data, vec![-1.0, -1.0]);
//! ```
//!
//! ## Dense × Sparse Combinations
//!
//! Only the combinations exercised by the layers are defined:
//!
//! ```text
//! Tensor · SparseTensor              -> Tensor        (weights · sparse input)
//! Tensor[n,1] ⊗ SparseTensor[m,1]ᵀ   -> SparseTensor  (gradient of sparse-input weights)
//! Tensor += SparseTensor             -> Tensor
//! SparseTensor + SparseTensor        -> SparseTensor
//! ```
//!
//! Every other mixed operation on [`AnyTensor`] fails with
//! `LayerError::UnsupportedOperation`.

use crate::error::{LayerError, Result};
use crate::random::RandomGenerator;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Multiply-adds above which a matrix product is split across threads
#[cfg(feature = "parallel")]
const PARALLEL_THRESHOLD: usize = 1 << 16;

/// A dense two-dimensional array of `f64` values
///
/// # Memory Layout
///
/// For shape `[2, 3]`, data is stored as:
/// `[r0c0, r0c1, r0c2, r1c0, r1c1, r1c2]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    /// Flat storage of all elements
    pub data: Vec<f64>,
    /// `[rows, cols]`
    pub shape: [usize; 2],
}

impl Tensor {
    /// Create a new tensor with given data and shape
    ///
    /// # Panics
    ///
    /// Panics if the product of shape dimensions doesn't equal data length
    pub fn new(data: Vec<f64>, shape: [usize; 2]) -> Self {
        let expected_size = shape[0] * shape[1];
        assert_eq!(
            data.len(),
            expected_size,
            "Data length ({}) doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_size
        );
        Self { data, shape }
    }

    /// Create a tensor filled with zeros
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::new(vec![0.0; rows * cols], [rows, cols])
    }

    /// Create a tensor with every element set to `value`
    pub fn fill(rows: usize, cols: usize, value: f64) -> Self {
        Self::new(vec![value; rows * cols], [rows, cols])
    }

    /// Create a column vector
    pub fn vector(values: Vec<f64>) -> Self {
        let len = values.len();
        Self::new(values, [len, 1])
    }

    /// Create a matrix from its rows
    ///
    /// # Panics
    ///
    /// Panics if the rows have different lengths
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, |r| r.len());
        let mut data = Vec::with_capacity(n_rows * n_cols);
        for row in rows {
            assert_eq!(row.len(), n_cols, "All rows must have the same length");
            data.extend_from_slice(row);
        }
        Self::new(data, [n_rows, n_cols])
    }

    pub fn rows(&self) -> usize {
        self.shape[0]
    }

    pub fn cols(&self) -> usize {
        self.shape[1]
    }

    /// Total number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether this is a row or a column vector
    pub fn is_vector(&self) -> bool {
        self.shape[0] == 1 || self.shape[1] == 1
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.shape[1] + j]
    }

    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        let cols = self.shape[1];
        self.data[i * cols + j] = value;
    }

    /// Same data seen as a column vector
    pub fn as_column(&self) -> Tensor {
        Tensor::vector(self.data.clone())
    }

    /// Innermost loop of the matrix product: `result[j] += a_val * b[j]`
    ///
    /// Structured so that LLVM can auto-vectorize it.
    #[inline(always)]
    fn axpy(a_val: f64, b: &[f64], result: &mut [f64]) {
        for (r, &b_val) in result.iter_mut().zip(b.iter()) {
            *r += a_val * b_val;
        }
    }

    /// Matrix product
    ///
    /// For `A · B` where `A` is `[m, k]` and `B` is `[k, n]` the result is `[m, n]`.
    ///
    /// # Panics
    ///
    /// Panics if the inner dimensions differ
    pub fn dot(&self, other: &Tensor) -> Tensor {
        assert_eq!(
            self.shape[1], other.shape[0],
            "Matrix dimensions incompatible: [{}, {}] · [{}, {}]",
            self.shape[0], self.shape[1], other.shape[0], other.shape[1]
        );

        let m = self.shape[0];
        let k = self.shape[1];
        let n = other.shape[1];

        let mut result = vec![0.0; m * n];
        if n == 0 {
            return Tensor::new(result, [m, n]);
        }
        let fill_row = |(i, row): (usize, &mut [f64])| {
            for l in 0..k {
                let a_val = self.data[i * k + l];
                if a_val != 0.0 {
                    Self::axpy(a_val, &other.data[l * n..(l + 1) * n], row);
                }
            }
        };

        for_each_row(&mut result, n, m * k * n, fill_row);

        Tensor::new(result, [m, n])
    }

    /// Matrix product with a sparse right operand
    ///
    /// Only the stored coordinates of `other` contribute.
    pub fn dot_sparse(&self, other: &SparseTensor) -> Tensor {
        assert_eq!(
            self.shape[1], other.shape[0],
            "Matrix dimensions incompatible: [{}, {}] · sparse [{}, {}]",
            self.shape[0], self.shape[1], other.shape[0], other.shape[1]
        );

        let m = self.shape[0];
        let n = other.shape[1];
        let mut result = Tensor::zeros(m, n);

        for &(k, j, v) in &other.entries {
            for i in 0..m {
                result.data[i * n + j] += self.get(i, k) * v;
            }
        }

        result
    }

    /// Outer product `self · otherᵀ` of two column vectors
    pub fn outer(&self, other: &Tensor) -> Tensor {
        let a = self.len();
        let b = other.len();
        let mut result = Vec::with_capacity(a * b);
        for &x in &self.data {
            result.extend(other.data.iter().map(|&y| x * y));
        }
        Tensor::new(result, [a, b])
    }

    /// Outer product of a dense column vector with a sparse column vector
    ///
    /// The result only stores the columns present in the mask of `other`.
    pub fn outer_sparse(&self, other: &SparseTensor) -> SparseTensor {
        let rows = self.len();
        let cols = other.shape[0] * other.shape[1];
        let mut entries = Vec::with_capacity(rows * other.entries.len());
        for (i, &a) in self.data.iter().enumerate() {
            for &(r, c, v) in &other.entries {
                let k = r * other.shape[1] + c;
                entries.push((i, k, a * v));
            }
        }
        SparseTensor::new([rows, cols], entries)
    }

    /// Transpose
    pub fn t(&self) -> Tensor {
        let rows = self.shape[0];
        let cols = self.shape[1];
        let mut result = vec![0.0; rows * cols];
        for i in 0..rows {
            for j in 0..cols {
                result[j * rows + i] = self.data[i * cols + j];
            }
        }
        Tensor::new(result, [cols, rows])
    }

    fn check_same_shape(&self, other: &Tensor, op: &str) {
        assert_eq!(
            self.shape, other.shape,
            "Shapes must match for {}: {:?} vs {:?}",
            op, self.shape, other.shape
        );
    }

    fn zip_map(&self, other: &Tensor, op: &str, f: impl Fn(f64, f64) -> f64) -> Tensor {
        self.check_same_shape(other, op);
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(&a, &b)| f(a, b))
            .collect();
        Tensor::new(data, self.shape)
    }

    fn zip_assign(&mut self, other: &Tensor, op: &str, f: impl Fn(&mut f64, f64)) -> &mut Self {
        self.check_same_shape(other, op);
        for (a, &b) in self.data.iter_mut().zip(&other.data) {
            f(a, b);
        }
        self
    }

    /// Element-wise addition
    pub fn add(&self, other: &Tensor) -> Tensor {
        self.zip_map(other, "addition", |a, b| a + b)
    }

    /// Element-wise subtraction
    pub fn sub(&self, other: &Tensor) -> Tensor {
        self.zip_map(other, "subtraction", |a, b| a - b)
    }

    /// Element-wise (Hadamard) product
    pub fn prod(&self, other: &Tensor) -> Tensor {
        self.zip_map(other, "product", |a, b| a * b)
    }

    /// Element-wise division
    pub fn div(&self, other: &Tensor) -> Tensor {
        self.zip_map(other, "division", |a, b| a / b)
    }

    pub fn assign_add(&mut self, other: &Tensor) -> &mut Self {
        self.zip_assign(other, "addition", |a, b| *a += b)
    }

    pub fn assign_sub(&mut self, other: &Tensor) -> &mut Self {
        self.zip_assign(other, "subtraction", |a, b| *a -= b)
    }

    pub fn assign_prod(&mut self, other: &Tensor) -> &mut Self {
        self.zip_assign(other, "product", |a, b| *a *= b)
    }

    pub fn assign_div(&mut self, other: &Tensor) -> &mut Self {
        self.zip_assign(other, "division", |a, b| *a /= b)
    }

    /// Overwrite every element with the one of `other`
    pub fn assign_values(&mut self, other: &Tensor) -> &mut Self {
        self.zip_assign(other, "assignment", |a, b| *a = b)
    }

    /// Add the stored entries of a sparse tensor in place
    pub fn assign_add_sparse(&mut self, other: &SparseTensor) -> &mut Self {
        assert_eq!(
            self.shape, other.shape,
            "Shapes must match for sparse addition"
        );
        let cols = self.shape[1];
        for &(i, j, v) in &other.entries {
            self.data[i * cols + j] += v;
        }
        self
    }

    pub fn add_scalar(&self, scalar: f64) -> Tensor {
        self.map(|x| x + scalar)
    }

    pub fn prod_scalar(&self, scalar: f64) -> Tensor {
        self.map(|x| x * scalar)
    }

    pub fn div_scalar(&self, scalar: f64) -> Tensor {
        self.map(|x| x / scalar)
    }

    pub fn assign_prod_scalar(&mut self, scalar: f64) -> &mut Self {
        self.data.iter_mut().for_each(|x| *x *= scalar);
        self
    }

    pub fn assign_div_scalar(&mut self, scalar: f64) -> &mut Self {
        self.data.iter_mut().for_each(|x| *x /= scalar);
        self
    }

    pub fn assign_fill(&mut self, value: f64) -> &mut Self {
        self.data.iter_mut().for_each(|x| *x = value);
        self
    }

    /// `1 - x` for every element
    pub fn reverse(&self) -> Tensor {
        self.map(|x| 1.0 - x)
    }

    pub fn sqrt(&self) -> Tensor {
        self.map(f64::sqrt)
    }

    pub fn abs(&self) -> Tensor {
        self.map(f64::abs)
    }

    /// Apply `f` to every element
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Tensor {
        Tensor::new(self.data.iter().map(|&x| f(x)).collect(), self.shape)
    }

    /// Sum of all elements
    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// The `i`-th row as a column vector
    pub fn row(&self, i: usize) -> Tensor {
        let cols = self.shape[1];
        Tensor::vector(self.data[i * cols..(i + 1) * cols].to_vec())
    }

    /// All rows, each as a column vector
    pub fn row_vectors(&self) -> Vec<Tensor> {
        (0..self.shape[0]).map(|i| self.row(i)).collect()
    }

    /// Stack column vectors as the rows of a matrix
    pub fn stack_rows(rows: &[Tensor]) -> Tensor {
        let data: Vec<Vec<f64>> = rows.iter().map(|r| r.data.clone()).collect();
        Tensor::from_rows(&data)
    }

    /// Elements in `[start, end)` as a column vector
    pub fn range(&self, start: usize, end: usize) -> Tensor {
        Tensor::vector(self.data[start..end].to_vec())
    }

    /// Vertical concatenation of vectors into one column vector
    pub fn concat_v(vectors: &[&Tensor]) -> Tensor {
        let data: Vec<f64> = vectors.iter().flat_map(|v| v.data.iter().copied()).collect();
        Tensor::vector(data)
    }

    /// Fill every element with a value drawn from `generator`
    pub fn randomize(&mut self, generator: &mut dyn RandomGenerator) -> &mut Self {
        self.data.iter_mut().for_each(|x| *x = generator.next_value());
        self
    }

    /// Index (in the flat data) of the largest element
    pub fn argmax_index(&self) -> usize {
        let mut best = 0;
        for (i, &x) in self.data.iter().enumerate() {
            if x > self.data[best] {
                best = i;
            }
        }
        best
    }

    /// Whether every element is within `tolerance` of the matching one in `other`
    ///
    /// Vectors of equal length compare equal regardless of orientation.
    pub fn equals(&self, other: &Tensor, tolerance: f64) -> bool {
        let comparable = self.shape == other.shape
            || (self.is_vector() && other.is_vector() && self.len() == other.len());
        comparable
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| (a - b).abs() <= tolerance)
    }

    /// Numerically stable softmax of every row
    ///
    /// ```text
    /// softmax(x)[i] = exp(x[i] - max(x)) / sum(exp(x[j] - max(x)))
    /// ```
    pub fn softmax_rows(&self) -> Tensor {
        let rows = self.shape[0];
        let cols = self.shape[1];
        let mut result = Vec::with_capacity(self.data.len());
        for i in 0..rows {
            let row = &self.data[i * cols..(i + 1) * cols];
            let max = row.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
            let exp_values: Vec<f64> = row.iter().map(|&x| (x - max).exp()).collect();
            let sum: f64 = exp_values.iter().sum();
            result.extend(exp_values.into_iter().map(|v| v / sum));
        }
        Tensor::new(result, self.shape)
    }
}

/// Run `fill_row` over every `n`-wide row of `result`
///
/// With the `parallel` feature, rows are split across threads once the
/// product needs more than `PARALLEL_THRESHOLD` multiply-adds.
#[cfg(feature = "parallel")]
fn for_each_row<F>(result: &mut [f64], n: usize, work: usize, fill_row: F)
where
    F: Fn((usize, &mut [f64])) + Sync + Send,
{
    if work >= PARALLEL_THRESHOLD {
        result.par_chunks_mut(n).enumerate().for_each(fill_row);
    } else {
        result.chunks_mut(n).enumerate().for_each(fill_row);
    }
}

#[cfg(not(feature = "parallel"))]
fn for_each_row<F>(result: &mut [f64], n: usize, _work: usize, fill_row: F)
where
    F: Fn((usize, &mut [f64])),
{
    result.chunks_mut(n).enumerate().for_each(fill_row);
}

/// A sparse two-dimensional array in coordinate-list form
///
/// Entries are kept sorted by `(row, col)` with no duplicates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SparseTensor {
    pub shape: [usize; 2],
    entries: Vec<(usize, usize, f64)>,
}

impl SparseTensor {
    /// Create a sparse tensor, merging duplicated coordinates by summation
    ///
    /// # Panics
    ///
    /// Panics if a coordinate is out of bounds
    pub fn new(shape: [usize; 2], mut entries: Vec<(usize, usize, f64)>) -> Self {
        for &(i, j, _) in &entries {
            assert!(
                i < shape[0] && j < shape[1],
                "Sparse coordinate ({}, {}) out of bounds for shape {:?}",
                i,
                j,
                shape
            );
        }
        entries.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut merged: Vec<(usize, usize, f64)> = Vec::with_capacity(entries.len());
        for (i, j, v) in entries {
            match merged.last_mut() {
                Some(last) if last.0 == i && last.1 == j => last.2 += v,
                _ => merged.push((i, j, v)),
            }
        }

        Self {
            shape,
            entries: merged,
        }
    }

    /// Sparse column vector with the given `(index, value)` entries
    pub fn vector(len: usize, entries: Vec<(usize, f64)>) -> Self {
        Self::new([len, 1], entries.into_iter().map(|(i, v)| (i, 0, v)).collect())
    }

    /// Sparse binary column vector: `1.0` at each active index
    pub fn binary_vector(len: usize, active: &[usize]) -> Self {
        Self::vector(len, active.iter().map(|&i| (i, 1.0)).collect())
    }

    pub fn empty(shape: [usize; 2]) -> Self {
        Self {
            shape,
            entries: Vec::new(),
        }
    }

    /// Stored `(row, col, value)` entries
    pub fn entries(&self) -> &[(usize, usize, f64)] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [(usize, usize, f64)] {
        &mut self.entries
    }

    /// Number of stored entries
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.shape[0] * self.shape[1]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_vector(&self) -> bool {
        self.shape[0] == 1 || self.shape[1] == 1
    }

    pub fn to_dense(&self) -> Tensor {
        let mut dense = Tensor::zeros(self.shape[0], self.shape[1]);
        dense.assign_add_sparse(self);
        dense
    }

    pub fn t(&self) -> SparseTensor {
        SparseTensor::new(
            [self.shape[1], self.shape[0]],
            self.entries.iter().map(|&(i, j, v)| (j, i, v)).collect(),
        )
    }

    pub fn prod_scalar(&self, scalar: f64) -> SparseTensor {
        let mut result = self.clone();
        result.assign_prod_scalar(scalar);
        result
    }

    pub fn assign_prod_scalar(&mut self, scalar: f64) -> &mut Self {
        self.entries.iter_mut().for_each(|e| e.2 *= scalar);
        self
    }

    pub fn assign_div_scalar(&mut self, scalar: f64) -> &mut Self {
        self.entries.iter_mut().for_each(|e| e.2 /= scalar);
        self
    }

    /// Sum of two sparse tensors; the mask of the result is the union of both masks
    pub fn add(&self, other: &SparseTensor) -> SparseTensor {
        assert_eq!(self.shape, other.shape, "Shapes must match for sparse addition");
        let mut entries = self.entries.clone();
        entries.extend_from_slice(&other.entries);
        SparseTensor::new(self.shape, entries)
    }

    /// Element-wise product with a dense tensor, restricted to the mask
    pub fn prod_dense(&self, other: &Tensor) -> SparseTensor {
        assert_eq!(self.shape, other.shape, "Shapes must match for product");
        SparseTensor {
            shape: self.shape,
            entries: self
                .entries
                .iter()
                .map(|&(i, j, v)| (i, j, v * other.get(i, j)))
                .collect(),
        }
    }
}

/// Either a dense or a sparse tensor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AnyTensor {
    Dense(Tensor),
    Sparse(SparseTensor),
}

impl AnyTensor {
    pub fn shape(&self) -> [usize; 2] {
        match self {
            AnyTensor::Dense(t) => t.shape,
            AnyTensor::Sparse(s) => s.shape,
        }
    }

    pub fn len(&self) -> usize {
        let shape = self.shape();
        shape[0] * shape[1]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_vector(&self) -> bool {
        let shape = self.shape();
        shape[0] == 1 || shape[1] == 1
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, AnyTensor::Sparse(_))
    }

    /// The dense tensor, or `UnsupportedOperation` for a sparse one
    pub fn as_dense(&self) -> Result<&Tensor> {
        match self {
            AnyTensor::Dense(t) => Ok(t),
            AnyTensor::Sparse(_) => Err(LayerError::unsupported(
                "dense access to a sparse tensor",
            )),
        }
    }

    pub fn as_dense_mut(&mut self) -> Result<&mut Tensor> {
        match self {
            AnyTensor::Dense(t) => Ok(t),
            AnyTensor::Sparse(_) => Err(LayerError::unsupported(
                "dense access to a sparse tensor",
            )),
        }
    }

    /// A dense copy regardless of the representation
    pub fn to_dense(&self) -> Tensor {
        match self {
            AnyTensor::Dense(t) => t.clone(),
            AnyTensor::Sparse(s) => s.to_dense(),
        }
    }

    /// Same values reshaped as a column vector
    pub fn as_column(&self) -> AnyTensor {
        match self {
            AnyTensor::Dense(t) => AnyTensor::Dense(t.as_column()),
            AnyTensor::Sparse(s) => {
                let cols = s.shape[1];
                AnyTensor::Sparse(SparseTensor::new(
                    [s.len(), 1],
                    s.entries().iter().map(|&(i, j, v)| (i * cols + j, 0, v)).collect(),
                ))
            }
        }
    }

    /// `w · self`, the only product layers need with an input of either kind
    pub fn left_dot(&self, w: &Tensor) -> Tensor {
        match self {
            AnyTensor::Dense(x) => w.dot(x),
            AnyTensor::Sparse(x) => w.dot_sparse(x),
        }
    }

    /// `g · selfᵀ` where both are column vectors
    ///
    /// The result is sparse when `self` is sparse.
    pub fn outer_from(&self, g: &Tensor) -> AnyTensor {
        match self {
            AnyTensor::Dense(x) => AnyTensor::Dense(g.outer(x)),
            AnyTensor::Sparse(x) => AnyTensor::Sparse(g.outer_sparse(x)),
        }
    }

    /// Sum of two tensors of the same shape
    pub fn add(&self, other: &AnyTensor) -> Result<AnyTensor> {
        if self.shape() != other.shape() {
            return Err(LayerError::shape_mismatch(&self.shape(), &other.shape()));
        }
        Ok(match (self, other) {
            (AnyTensor::Dense(a), AnyTensor::Dense(b)) => AnyTensor::Dense(a.add(b)),
            (AnyTensor::Dense(a), AnyTensor::Sparse(b)) => {
                let mut sum = a.clone();
                sum.assign_add_sparse(b);
                AnyTensor::Dense(sum)
            }
            (AnyTensor::Sparse(a), AnyTensor::Dense(b)) => {
                let mut sum = b.clone();
                sum.assign_add_sparse(a);
                AnyTensor::Dense(sum)
            }
            (AnyTensor::Sparse(a), AnyTensor::Sparse(b)) => AnyTensor::Sparse(a.add(b)),
        })
    }

    pub fn assign_div_scalar(&mut self, scalar: f64) {
        match self {
            AnyTensor::Dense(t) => {
                t.assign_div_scalar(scalar);
            }
            AnyTensor::Sparse(s) => {
                s.assign_div_scalar(scalar);
            }
        }
    }

    pub fn assign_prod_scalar(&mut self, scalar: f64) {
        match self {
            AnyTensor::Dense(t) => {
                t.assign_prod_scalar(scalar);
            }
            AnyTensor::Sparse(s) => {
                s.assign_prod_scalar(scalar);
            }
        }
    }

    /// Squared L2 norm of the stored values
    pub fn squared_norm(&self) -> f64 {
        match self {
            AnyTensor::Dense(t) => t.data.iter().map(|x| x * x).sum(),
            AnyTensor::Sparse(s) => s.entries().iter().map(|e| e.2 * e.2).sum(),
        }
    }
}

impl From<Tensor> for AnyTensor {
    fn from(t: Tensor) -> Self {
        AnyTensor::Dense(t)
    }
}

impl From<SparseTensor> for AnyTensor {
    fn from(s: SparseTensor) -> Self {
        AnyTensor::Sparse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_and_transpose() {
        let a = Tensor::from_rows(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        let b = Tensor::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]]);
        let c = a.dot(&b);
        assert_eq!(c.shape, [2, 2]);
        assert_eq!(c.data, vec![4.0, 5.0, 10.0, 11.0]);

        let at = a.t();
        assert_eq!(at.shape, [3, 2]);
        assert_eq!(at.data, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_dot_sparse_matches_dense() {
        let w = Tensor::from_rows(&[vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]]);
        let x = SparseTensor::vector(3, vec![(0, 2.0), (2, -1.0)]);
        let dense = w.dot(&x.to_dense());
        let sparse = w.dot_sparse(&x);
        assert!(dense.equals(&sparse, 1e-12));
    }

    #[test]
    fn test_outer_sparse_keeps_only_masked_columns() {
        let g = Tensor::vector(vec![1.0, 2.0]);
        let x = SparseTensor::binary_vector(4, &[1, 3]);
        let gw = g.outer_sparse(&x);
        assert_eq!(gw.shape, [2, 4]);
        assert_eq!(gw.nnz(), 4);
        assert!(gw.to_dense().equals(&g.outer(&x.to_dense()), 1e-12));
    }

    #[test]
    fn test_sparse_new_merges_duplicates() {
        let s = SparseTensor::new([2, 2], vec![(1, 1, 1.0), (0, 0, 2.0), (1, 1, 0.5)]);
        assert_eq!(s.entries(), &[(0, 0, 2.0), (1, 1, 1.5)]);
    }

    #[test]
    fn test_any_tensor_add_mixed() {
        let a = AnyTensor::Dense(Tensor::vector(vec![1.0, 1.0, 1.0]));
        let b = AnyTensor::Sparse(SparseTensor::vector(3, vec![(1, 2.0)]));
        let sum = a.add(&b).unwrap();
        assert_eq!(sum.to_dense().data, vec![1.0, 3.0, 1.0]);

        let c = AnyTensor::Dense(Tensor::vector(vec![1.0, 1.0]));
        assert!(matches!(
            a.add(&c),
            Err(LayerError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_equals_is_orientation_agnostic_for_vectors() {
        let col = Tensor::vector(vec![0.19, 0.29, 0.53]);
        let row = Tensor::new(vec![0.19, 0.29, 0.53], [1, 3]);
        assert!(col.equals(&row, 1e-9));
        assert!(!col.equals(&Tensor::vector(vec![0.2, 0.29, 0.53]), 1e-3));
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let t = Tensor::from_rows(&[vec![1.0, 2.0, 3.0], vec![-1.0, 0.0, 1000.0]]);
        let s = t.softmax_rows();
        for i in 0..2 {
            assert!((s.row(i).sum() - 1.0).abs() < 1e-12);
        }
        assert!((s.get(1, 2) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_argmax_index() {
        let t = Tensor::vector(vec![0.1, 0.9, -2.0, 0.3]);
        assert_eq!(t.argmax_index(), 1);
    }
}
