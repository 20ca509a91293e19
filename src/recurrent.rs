//! Recurrent Sequence Processor
//!
//! Unrolls a stack of layers over a sequence: one [`StackedLayers`] per
//! timestep, all reading the same [`StackedLayersParameters`].
//!
//! ```text
//!            x0          x1          x2
//!            │           │           │
//! level 1  [ t0 ] ────► [ t1 ] ────► [ t2 ]
//!            │           │           │
//! level 0  [ t0 ] ────► [ t1 ] ────► [ t2 ]      ──► : recurrent window
//!            │           │           │
//!            y0          y1          y2
//! ```
//!
//! The timestep structures live in one arena (a `Vec`) owned by the
//! processor. A timestep reaches its neighbors only through bounds-checked
//! index lookups, so the unrolled sequence holds no references between its
//! own elements. The arena is kept across sequences and only grows.
//!
//! ## Backward
//!
//! Backpropagation through time walks the timesteps in reverse: each step
//! adds to its output errors the errors its successor sent back through the
//! recurrent connections, and the parameter gradients of all the steps are
//! summed into one container.

use crate::error::{LayerError, Result};
use crate::layers::{split_neighbors, ParamsContainer};
use crate::optimizer::ParamsAccumulator;
use crate::stacked::{StackedLayers, StackedLayersParameters};
use crate::tensor::{AnyTensor, Tensor};
use log::trace;

/// Forward and backward of a stack of layers over a sequence
#[derive(Debug, Default)]
pub struct RecurrentProcessor {
    steps: Vec<StackedLayers>,
    /// Length of the sequence processed by the last forward
    len: usize,
}

impl RecurrentProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Length of the last forwarded sequence
    pub fn sequence_len(&self) -> usize {
        self.len
    }

    /// Number of timestep structures allocated so far
    pub fn arena_len(&self) -> usize {
        self.steps.len()
    }

    fn ensure_steps(&mut self, params: &StackedLayersParameters, len: usize) -> Result<()> {
        while self.steps.len() < len {
            self.steps.push(StackedLayers::new(params)?);
        }
        Ok(())
    }

    /// Forward a sequence, returning the output of every timestep
    pub fn forward<T: Into<AnyTensor> + Clone>(
        &mut self,
        params: &StackedLayersParameters,
        sequence: &[T],
        use_dropout: bool,
    ) -> Result<Vec<Tensor>> {
        if sequence.is_empty() {
            return Err(LayerError::config("cannot process an empty sequence"));
        }
        self.ensure_steps(params, sequence.len())?;
        self.len = sequence.len();

        let mut outputs = Vec::with_capacity(sequence.len());
        for (t, x) in sequence.iter().enumerate() {
            let (prev, current, _) = split_neighbors(&mut self.steps, t)
                .ok_or(LayerError::uninitialized("steps"))?;
            let y = current.forward_step(params, x.clone(), use_dropout, prev)?;
            outputs.push(y.clone());
        }
        trace!("forwarded a sequence of {} timesteps", self.len);
        Ok(outputs)
    }

    /// Backward from the output errors of every timestep
    ///
    /// Returns the parameter gradients summed over the timesteps. The input
    /// errors of each timestep are then available through
    /// [`input_errors`](Self::input_errors) when `propagate_to_input` is set.
    pub fn backward(
        &mut self,
        params: &StackedLayersParameters,
        output_errors: &[Tensor],
        propagate_to_input: bool,
        meprop_k: Option<f64>,
    ) -> Result<StackedLayersParameters> {
        if self.len == 0 {
            return Err(LayerError::uninitialized("sequence"));
        }
        if output_errors.len() != self.len {
            return Err(LayerError::shape_mismatch(&[self.len], &[output_errors.len()]));
        }

        let mut step_grads = params.zeros_like();
        let mut total = ParamsAccumulator::new();
        let steps = &mut self.steps[..self.len];

        for t in (0..self.len).rev() {
            let (prev, current, next) =
                split_neighbors(steps, t).ok_or(LayerError::uninitialized("steps"))?;
            current.backward_step(
                params,
                output_errors[t].clone(),
                &mut step_grads,
                propagate_to_input,
                meprop_k,
                prev,
                next,
            )?;
            total.accumulate(&step_grads)?;
        }
        total
            .take()
            .ok_or(LayerError::uninitialized("params_errors"))
    }

    /// Output of every timestep of the last forward
    pub fn outputs(&self) -> Result<Vec<Tensor>> {
        self.steps[..self.len]
            .iter()
            .map(|s| s.output_values().cloned())
            .collect()
    }

    /// Input errors of every timestep of the last backward
    pub fn input_errors(&self) -> Result<Vec<Tensor>> {
        self.steps[..self.len]
            .iter()
            .map(|s| s.input_errors().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::ActivationFunction;
    use crate::config::{LayerConfiguration, LayerType};
    use crate::random::FixedRangeRandom;

    fn params() -> StackedLayersParameters {
        let configs = vec![
            LayerConfiguration::input(2),
            LayerConfiguration::hidden(3, LayerType::SimpleRecurrent, Some(ActivationFunction::Tanh)),
        ];
        StackedLayersParameters::initialized(&configs, &mut FixedRangeRandom::new(0.6, 5), 0.1)
            .unwrap()
    }

    #[test]
    fn test_second_step_reads_first() {
        let params = params();
        let x0 = Tensor::vector(vec![0.5, -0.2]);
        let x1 = Tensor::vector(vec![0.1, 0.9]);

        let mut processor = RecurrentProcessor::new();
        let outputs = processor.forward(&params, &[x0, x1.clone()], false).unwrap();

        let mut alone = StackedLayers::new(&params).unwrap();
        let y1_alone = alone.forward(&params, x1, false).unwrap();
        assert!(!outputs[1].equals(y1_alone, 1e-9));
    }

    #[test]
    fn test_arena_is_reused_for_shorter_sequences() {
        let params = params();
        let mut processor = RecurrentProcessor::new();
        let long: Vec<Tensor> = (0..4).map(|i| Tensor::vector(vec![i as f64 * 0.1, 0.3])).collect();
        processor.forward(&params, &long, false).unwrap();
        let errors: Vec<Tensor> = (0..4).map(|_| Tensor::vector(vec![0.1, 0.2, 0.3])).collect();
        processor.backward(&params, &errors, true, None).unwrap();

        let first = processor.forward(&params, &long[..1], false).unwrap();
        let mut alone = StackedLayers::new(&params).unwrap();
        assert!(first[0].equals(alone.forward(&params, long[0].clone(), false).unwrap(), 1e-12));

        // the stale fourth timestep must not leak errors into the short sequence
        let grads = processor
            .backward(&params, &errors[..1], true, None)
            .unwrap();
        let mut direct = params.zeros_like();
        alone
            .backward(&params, errors[0].clone(), &mut direct, true, None)
            .unwrap();
        for (a, b) in grads.params().iter().zip(direct.params()) {
            assert!(a.values().to_dense().equals(&b.values().to_dense(), 1e-12));
        }
        assert_eq!(processor.sequence_len(), 1);
        assert_eq!(processor.arena_len(), 4);
    }

    #[test]
    fn test_mismatched_errors() {
        let params = params();
        let mut processor = RecurrentProcessor::new();
        processor
            .forward(&params, &[Tensor::vector(vec![0.0, 1.0])], false)
            .unwrap();
        assert!(matches!(
            processor.backward(&params, &[], true, None),
            Err(LayerError::ShapeMismatch { .. })
        ));
    }
}
