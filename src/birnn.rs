//! Bidirectional Recurrent Encoder
//!
//! Two independent recurrent stacks read the same sequence, one from left to
//! right and one from right to left. The encoding of each position is the
//! concatenation of the two outputs at that position:
//!
//! ```text
//! x:        x0        x1        x2
//! l2r:      a0 ────►  a1 ────►  a2
//! r2l:      b0 ◄────  b1 ◄────  b2
//! output: [a0;b0]   [a1;b1]   [a2;b2]
//! ```
//!
//! Backward splits each output error in the two halves, runs both directions
//! and sums their input errors position by position.

use crate::arrays::ParamsArray;
use crate::config::LayerConfiguration;
use crate::error::{LayerError, Result};
use crate::layers::ParamsContainer;
use crate::optimizer::ParamsOptimizer;
use crate::pool::{ItemsPool, PoolTicket};
use crate::random::RandomGenerator;
use crate::recurrent::RecurrentProcessor;
use crate::stacked::StackedLayersParameters;
use crate::tensor::{AnyTensor, Tensor};
use crate::update_methods::UpdateMethod;
use serde::{Deserialize, Serialize};

/// The parameters of both directions
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BiRnn {
    pub left_to_right: StackedLayersParameters,
    pub right_to_left: StackedLayersParameters,
}

impl BiRnn {
    /// Zero-initialized parameters, the same layout in both directions
    ///
    /// At least one layer must be recurrent.
    pub fn new(configs: &[LayerConfiguration]) -> Result<Self> {
        let left_to_right = StackedLayersParameters::new(configs)?;
        if !left_to_right.is_recurrent() {
            return Err(LayerError::config(
                "a bidirectional encoder needs at least one recurrent layer",
            ));
        }
        Ok(Self {
            right_to_left: left_to_right.clone(),
            left_to_right,
        })
    }

    pub fn initialized(
        configs: &[LayerConfiguration],
        generator: &mut dyn RandomGenerator,
        biases_init_value: f64,
    ) -> Result<Self> {
        let mut birnn = Self::new(configs)?;
        birnn.initialize(generator, biases_init_value)?;
        Ok(birnn)
    }

    pub fn input_size(&self) -> usize {
        self.left_to_right.input_size()
    }

    /// Size of the encoding of one position
    pub fn output_size(&self) -> usize {
        2 * self.left_to_right.output_size()
    }
}

impl ParamsContainer for BiRnn {
    fn params(&self) -> Vec<&ParamsArray> {
        let mut params = self.left_to_right.params();
        params.extend(self.right_to_left.params());
        params
    }

    fn params_mut(&mut self) -> Vec<&mut ParamsArray> {
        let mut params = self.left_to_right.params_mut();
        params.extend(self.right_to_left.params_mut());
        params
    }
}

/// The live structures of one bidirectional encoding
#[derive(Debug)]
pub struct BiRnnEncoder {
    pub id: usize,
    left_to_right: RecurrentProcessor,
    right_to_left: RecurrentProcessor,
}

impl BiRnnEncoder {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            left_to_right: RecurrentProcessor::new(),
            right_to_left: RecurrentProcessor::new(),
        }
    }

    /// Encode every position of a sequence
    pub fn encode<T: Into<AnyTensor> + Clone>(
        &mut self,
        birnn: &BiRnn,
        sequence: &[T],
        use_dropout: bool,
    ) -> Result<Vec<Tensor>> {
        let reversed: Vec<T> = sequence.iter().rev().cloned().collect();
        let forward = self
            .left_to_right
            .forward(&birnn.left_to_right, sequence, use_dropout)?;
        let mut backward = self
            .right_to_left
            .forward(&birnn.right_to_left, &reversed, use_dropout)?;
        backward.reverse();

        Ok(forward
            .iter()
            .zip(&backward)
            .map(|(a, b)| Tensor::concat_v(&[a, b]))
            .collect())
    }

    /// Backward from the errors of every encoded position
    ///
    /// Returns the gradients of both directions. The input errors are then
    /// available through [`input_errors`](Self::input_errors).
    pub fn backward(
        &mut self,
        birnn: &BiRnn,
        output_errors: &[Tensor],
        propagate_to_input: bool,
        meprop_k: Option<f64>,
    ) -> Result<BiRnn> {
        let half = birnn.left_to_right.output_size();
        let mut l2r_errors = Vec::with_capacity(output_errors.len());
        let mut r2l_errors = Vec::with_capacity(output_errors.len());
        for errors in output_errors {
            if errors.len() != 2 * half {
                return Err(LayerError::shape_mismatch(&[2 * half], &[errors.len()]));
            }
            l2r_errors.push(errors.range(0, half));
            r2l_errors.push(errors.range(half, 2 * half));
        }
        r2l_errors.reverse();

        Ok(BiRnn {
            left_to_right: self.left_to_right.backward(
                &birnn.left_to_right,
                &l2r_errors,
                propagate_to_input,
                meprop_k,
            )?,
            right_to_left: self.right_to_left.backward(
                &birnn.right_to_left,
                &r2l_errors,
                propagate_to_input,
                meprop_k,
            )?,
        })
    }

    /// Errors of every input position, summed over both directions
    pub fn input_errors(&self) -> Result<Vec<Tensor>> {
        let forward = self.left_to_right.input_errors()?;
        let mut backward = self.right_to_left.input_errors()?;
        backward.reverse();
        Ok(forward.iter().zip(&backward).map(|(a, b)| a.add(b)).collect())
    }
}

/// A pool of encoders, so that a batch does not rebuild them per example
#[derive(Debug, Default)]
pub struct BiRnnEncodersPool {
    pool: ItemsPool<BiRnnEncoder>,
}

impl BiRnnEncodersPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_item(&mut self) -> Result<PoolTicket> {
        self.pool.get_item(|id| Ok(BiRnnEncoder::new(id)))
    }

    pub fn get(&self, ticket: &PoolTicket) -> Result<&BiRnnEncoder> {
        self.pool.get(ticket)
    }

    pub fn get_mut(&mut self, ticket: &PoolTicket) -> Result<&mut BiRnnEncoder> {
        self.pool.get_mut(ticket)
    }

    pub fn release(&mut self, ticket: PoolTicket) -> Result<()> {
        self.pool.release(ticket)
    }

    pub fn release_all(&mut self) {
        self.pool.release_all();
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

/// Optimizer of both directions, sharing one update method
#[derive(Clone, Debug)]
pub struct BiRnnOptimizer<M> {
    optimizer: ParamsOptimizer<BiRnn, M>,
}

impl<M: UpdateMethod> BiRnnOptimizer<M> {
    pub fn new(method: M) -> Self {
        Self {
            optimizer: ParamsOptimizer::new(method),
        }
    }

    pub fn accumulate(&mut self, errors: &BiRnn) -> Result<()> {
        self.optimizer.accumulate(errors)
    }

    pub fn accumulate_owned(&mut self, errors: BiRnn) -> Result<()> {
        self.optimizer.accumulate_owned(errors)
    }

    pub fn update(&mut self, birnn: &mut BiRnn) -> Result<()> {
        self.optimizer.update(birnn)
    }

    pub fn new_epoch(&mut self) {
        self.optimizer.new_epoch();
    }

    pub fn new_batch(&mut self) {
        self.optimizer.new_batch();
    }

    pub fn new_example(&mut self) {
        self.optimizer.new_example();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::ActivationFunction;
    use crate::config::LayerType;
    use crate::random::FixedRangeRandom;
    use crate::update_methods::LearningRateMethod;

    fn birnn() -> BiRnn {
        let configs = vec![
            LayerConfiguration::input(2),
            LayerConfiguration::hidden(3, LayerType::GRU, Some(ActivationFunction::Tanh)),
        ];
        BiRnn::initialized(&configs, &mut FixedRangeRandom::new(0.5, 17), 0.0).unwrap()
    }

    fn sequence() -> Vec<Tensor> {
        vec![
            Tensor::vector(vec![0.3, -0.1]),
            Tensor::vector(vec![-0.7, 0.4]),
            Tensor::vector(vec![0.2, 0.9]),
        ]
    }

    #[test]
    fn test_needs_a_recurrent_layer() {
        let configs = vec![
            LayerConfiguration::input(2),
            LayerConfiguration::hidden(3, LayerType::Feedforward, None),
        ];
        assert!(matches!(BiRnn::new(&configs), Err(LayerError::Configuration(_))));
    }

    #[test]
    fn test_encoding_concatenates_directions() {
        let birnn = birnn();
        let mut encoder = BiRnnEncoder::new(0);
        let encoded = encoder.encode(&birnn, &sequence(), false).unwrap();
        assert_eq!(encoded.len(), 3);
        assert_eq!(encoded[0].len(), birnn.output_size());

        // the right-to-left half of the last position only saw the last input
        let mut alone = RecurrentProcessor::new();
        let last = alone
            .forward(&birnn.right_to_left, &sequence()[2..], false)
            .unwrap();
        assert!(encoded[2].range(3, 6).equals(&last[0], 1e-12));
    }

    #[test]
    fn test_backward_and_update() {
        let mut birnn = birnn();
        let mut pool = BiRnnEncodersPool::new();
        let ticket = pool.get_item().unwrap();

        let encoder = pool.get_mut(&ticket).unwrap();
        encoder.encode(&birnn, &sequence(), false).unwrap();
        let errors = vec![Tensor::fill(6, 1, 0.1); 3];
        let grads = encoder.backward(&birnn, &errors, true, None).unwrap();
        let input_errors = encoder.input_errors().unwrap();
        assert_eq!(input_errors.len(), 3);
        assert_eq!(input_errors[0].len(), 2);
        pool.release(ticket).unwrap();

        let before = birnn.params()[0].values().to_dense();
        let mut optimizer = BiRnnOptimizer::new(LearningRateMethod::new(0.5));
        optimizer.accumulate_owned(grads).unwrap();
        optimizer.update(&mut birnn).unwrap();
        assert!(!birnn.params()[0].values().to_dense().equals(&before, 1e-12));
    }
}
