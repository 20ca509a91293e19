//! Attention Network
//!
//! Reduces a sequence of vectors to a single vector, weighting each element
//! by an importance score learned through a context vector:
//!
//! ```text
//! x0 ──► [ transform 0 ] ──► a0 ─┐
//! x1 ──► [ transform 1 ] ──► a1 ─┼─► s_i = a_i · c ──► α = softmax(s)
//! x2 ──► [ transform 2 ] ──► a2 ─┘
//!
//! y = Σ α_i x_i
//! ```
//!
//! Every transform is a feedforward layer `a_i = tanh(W x_i + b)` sharing the
//! same parameters. The output has the size of the input elements.
//!
//! ## Backward
//!
//! ```text
//! gα_i = gy · x_i
//! gs   = α ⊙ (gα - Σ_j α_j gα_j)
//! gc   = Σ_i gs_i a_i
//! ga_i = gs_i c                      (output errors of transform i)
//! gx_i = α_i gy + (input errors of transform i)
//! ```
//!
//! The gradients of the transform parameters are summed over the elements.

use crate::activation::ActivationFunction;
use crate::arrays::ParamsArray;
use crate::config::{LayerConfiguration, LayerType};
use crate::error::{LayerError, Result};
use crate::layers::{LayerParameters, LayerStructure, ParamsContainer, RecurrentWindow};
use crate::optimizer::ParamsAccumulator;
use crate::random::RandomGenerator;
use crate::tensor::Tensor;
use log::trace;
use serde::{Deserialize, Serialize};

/// The transform layer and the context vector
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttentionNetworkParameters {
    pub input_size: usize,
    pub attention_size: usize,
    /// Dropout of the transform layer input
    pub dropout: f64,
    pub transform: LayerParameters,
    pub context_vector: ParamsArray,
}

impl AttentionNetworkParameters {
    /// Zero-initialized parameters
    pub fn new(input_size: usize, attention_size: usize, dropout: f64) -> Result<Self> {
        if input_size == 0 || attention_size == 0 {
            return Err(LayerError::config(
                "an attention network needs non-empty input and attention arrays",
            ));
        }
        let config = transform_config(input_size, attention_size, dropout);
        Ok(Self {
            input_size,
            attention_size,
            dropout,
            transform: LayerParameters::new(&config, false)?,
            context_vector: ParamsArray::weights(attention_size, 1, false),
        })
    }

    pub fn initialized(
        input_size: usize,
        attention_size: usize,
        dropout: f64,
        generator: &mut dyn RandomGenerator,
        biases_init_value: f64,
    ) -> Result<Self> {
        let mut params = Self::new(input_size, attention_size, dropout)?;
        params.initialize(generator, biases_init_value)?;
        Ok(params)
    }

    fn transform_config(&self) -> LayerConfiguration {
        transform_config(self.input_size, self.attention_size, self.dropout)
    }
}

fn transform_config(input_size: usize, attention_size: usize, dropout: f64) -> LayerConfiguration {
    let mut config = LayerConfiguration::hidden(
        attention_size,
        LayerType::Feedforward,
        Some(ActivationFunction::Tanh),
    );
    config.sizes = vec![input_size];
    config.dropout = dropout;
    config
}

impl ParamsContainer for AttentionNetworkParameters {
    fn params(&self) -> Vec<&ParamsArray> {
        let mut params = self.transform.params();
        params.push(&self.context_vector);
        params
    }

    fn params_mut(&mut self) -> Vec<&mut ParamsArray> {
        let mut params = self.transform.params_mut();
        params.push(&mut self.context_vector);
        params
    }
}

/// The live structures of one attention over a sequence
///
/// Transform layers are kept across sequences and only grow, like the
/// timesteps of a [`RecurrentProcessor`](crate::recurrent::RecurrentProcessor).
#[derive(Debug)]
pub struct AttentionNetwork {
    pub id: usize,
    config: Option<LayerConfiguration>,
    transforms: Vec<LayerStructure>,
    inputs: Vec<Tensor>,
    importance_score: Option<Tensor>,
    input_errors: Option<Vec<Tensor>>,
}

impl AttentionNetwork {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            config: None,
            transforms: Vec::new(),
            inputs: Vec::new(),
            importance_score: None,
            input_errors: None,
        }
    }

    fn ensure_transforms(&mut self, params: &AttentionNetworkParameters, len: usize) -> Result<()> {
        let config = params.transform_config();
        if self.config.as_ref() != Some(&config) {
            self.transforms.clear();
        }
        while self.transforms.len() < len {
            self.transforms.push(LayerStructure::new(&config)?);
        }
        self.config = Some(config);
        Ok(())
    }

    /// Weighted sum of the sequence elements
    pub fn forward(
        &mut self,
        params: &AttentionNetworkParameters,
        sequence: &[Tensor],
        use_dropout: bool,
    ) -> Result<Tensor> {
        if sequence.is_empty() {
            return Err(LayerError::config("cannot attend over an empty sequence"));
        }
        if let Some(x) = sequence.iter().find(|x| x.len() != params.input_size) {
            return Err(LayerError::shape_mismatch(&[params.input_size], &[x.len()]));
        }
        self.ensure_transforms(params, sequence.len())?;
        self.importance_score = None;
        self.input_errors = None;
        self.inputs = sequence.iter().map(Tensor::as_column).collect();

        let context = params.context_vector.dense()?;
        let mut scores = Vec::with_capacity(sequence.len());
        for (transform, x) in self.transforms.iter_mut().zip(&self.inputs) {
            transform.set_input(x.clone())?;
            transform.forward(&params.transform, use_dropout, &RecurrentWindow::none())?;
            scores.push(transform.output_values()?.prod(context).sum());
        }
        let importance = ActivationFunction::Softmax.f(&Tensor::vector(scores));

        let mut y = Tensor::zeros(params.input_size, 1);
        for (x, &alpha) in self.inputs.iter().zip(&importance.data) {
            y.assign_add(&x.prod_scalar(alpha));
        }
        trace!("attended over a sequence of {} elements", self.inputs.len());
        self.importance_score = Some(importance);
        Ok(y)
    }

    /// Backward from the errors of the output
    ///
    /// Returns the parameter gradients. The input errors are then available
    /// through [`input_errors`](Self::input_errors) when `propagate_to_input`
    /// is set.
    pub fn backward(
        &mut self,
        params: &AttentionNetworkParameters,
        output_errors: &Tensor,
        propagate_to_input: bool,
    ) -> Result<AttentionNetworkParameters> {
        let importance = self.importance_score()?.clone();
        if output_errors.len() != params.input_size {
            return Err(LayerError::shape_mismatch(
                &[params.input_size],
                &[output_errors.len()],
            ));
        }
        let gy = output_errors.as_column();
        let len = self.inputs.len();

        let g_importance: Vec<f64> = self.inputs.iter().map(|x| x.prod(&gy).sum()).collect();
        let weighted: f64 = importance
            .data
            .iter()
            .zip(&g_importance)
            .map(|(alpha, g)| alpha * g)
            .sum();

        let context = params.context_vector.dense()?;
        let mut g_context = Tensor::zeros(params.attention_size, 1);
        let mut step_grads = params.transform.zeros_like();
        let mut transform_grads = ParamsAccumulator::new();
        let mut input_errors = Vec::with_capacity(len);

        for (i, transform) in self.transforms[..len].iter_mut().enumerate() {
            let alpha = importance.data[i];
            let g_score = alpha * (g_importance[i] - weighted);
            g_context.assign_add(&transform.output_values()?.prod_scalar(g_score));

            transform.set_errors(context.prod_scalar(g_score))?;
            transform.backward(
                &params.transform,
                &mut step_grads,
                &RecurrentWindow::none(),
                propagate_to_input,
                None,
            )?;
            transform_grads.accumulate(&step_grads)?;

            if propagate_to_input {
                let mut gx = gy.prod_scalar(alpha);
                gx.assign_add(transform.input_errors()?);
                input_errors.push(gx);
            }
        }
        self.input_errors = propagate_to_input.then_some(input_errors);

        let mut context_vector = ParamsArray::weights(params.attention_size, 1, false);
        context_vector.set_values(g_context)?;
        Ok(AttentionNetworkParameters {
            input_size: params.input_size,
            attention_size: params.attention_size,
            dropout: params.dropout,
            transform: transform_grads
                .take()
                .ok_or(LayerError::uninitialized("params_errors"))?,
            context_vector,
        })
    }

    /// Softmax of the scores of the last forward, one entry per element
    pub fn importance_score(&self) -> Result<&Tensor> {
        self.importance_score
            .as_ref()
            .ok_or(LayerError::uninitialized("importance_score"))
    }

    /// Errors of every element of the last backward
    pub fn input_errors(&self) -> Result<&[Tensor]> {
        self.input_errors
            .as_deref()
            .ok_or(LayerError::uninitialized("input_errors"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::ParamsOptimizer;
    use crate::pool::ItemsPool;
    use crate::random::FixedRangeRandom;
    use crate::update_methods::LearningRateMethod;
    use assert_approx_eq::assert_approx_eq;

    const H: f64 = 1e-5;

    fn params() -> AttentionNetworkParameters {
        AttentionNetworkParameters::initialized(3, 2, 0.0, &mut FixedRangeRandom::new(0.8, 9), 0.1)
            .unwrap()
    }

    fn sequence() -> Vec<Tensor> {
        vec![
            Tensor::vector(vec![0.5, -0.2, 0.1]),
            Tensor::vector(vec![-0.3, 0.8, 0.4]),
            Tensor::vector(vec![0.9, 0.1, -0.6]),
        ]
    }

    /// Weights of a linear loss `c · y`
    fn coefficients() -> Tensor {
        Tensor::vector(vec![0.3, -0.5, 0.8])
    }

    fn loss(params: &AttentionNetworkParameters, sequence: &[Tensor]) -> f64 {
        let mut network = AttentionNetwork::new(0);
        let y = network.forward(params, sequence, false).unwrap();
        y.prod(&coefficients()).sum()
    }

    fn assert_close(analytic: f64, numeric: f64, what: &str) {
        let tolerance = 1e-6 * numeric.abs().max(1.0);
        assert!(
            (analytic - numeric).abs() < tolerance,
            "{}: analytic {} vs numeric {}",
            what,
            analytic,
            numeric
        );
    }

    #[test]
    fn test_output_is_weighted_by_importance() {
        let params = params();
        let mut network = AttentionNetwork::new(0);
        let y = network.forward(&params, &sequence(), false).unwrap();

        let importance = network.importance_score().unwrap();
        assert_eq!(importance.len(), 3);
        assert_approx_eq!(importance.sum(), 1.0);
        assert!(importance.data.iter().all(|&alpha| alpha > 0.0));

        let mut expected = Tensor::zeros(3, 1);
        for (x, &alpha) in sequence().iter().zip(&importance.data) {
            expected.assign_add(&x.prod_scalar(alpha));
        }
        assert!(y.equals(&expected, 1e-12));
    }

    #[test]
    fn test_zero_context_averages_the_sequence() {
        let mut params = params();
        params.context_vector.zero();
        let mut network = AttentionNetwork::new(0);
        let y = network.forward(&params, &sequence(), false).unwrap();

        for &alpha in &network.importance_score().unwrap().data {
            assert_approx_eq!(alpha, 1.0 / 3.0);
        }
        assert!(y.equals(&Tensor::vector(vec![1.1 / 3.0, 0.7 / 3.0, -0.1 / 3.0]), 1e-12));
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let params = params();
        let sequence = sequence();
        let mut network = AttentionNetwork::new(0);
        network.forward(&params, &sequence, false).unwrap();
        let grads = network.backward(&params, &coefficients(), true).unwrap();

        // transform weights and biases, then the context vector
        for k in 0..params.params().len() {
            let analytic = grads.params()[k].values().to_dense();
            for j in 0..analytic.len() {
                let mut plus = params.copy();
                let mut minus = params.copy();
                plus.params_mut()[k].dense_mut().unwrap().data[j] += H;
                minus.params_mut()[k].dense_mut().unwrap().data[j] -= H;
                let numeric = (loss(&plus, &sequence) - loss(&minus, &sequence)) / (2.0 * H);
                assert_close(analytic.data[j], numeric, &format!("array {} entry {}", k, j));
            }
        }

        let input_errors = network.input_errors().unwrap();
        assert_eq!(input_errors.len(), sequence.len());
        for t in 0..sequence.len() {
            for i in 0..3 {
                let mut plus = sequence.clone();
                let mut minus = sequence.clone();
                plus[t].data[i] += H;
                minus[t].data[i] -= H;
                let numeric = (loss(&params, &plus) - loss(&params, &minus)) / (2.0 * H);
                assert_close(
                    input_errors[t].data[i],
                    numeric,
                    &format!("input {} of element {}", i, t),
                );
            }
        }
    }

    #[test]
    fn test_input_errors_only_when_propagated() {
        let params = params();
        let mut network = AttentionNetwork::new(0);
        network.forward(&params, &sequence(), false).unwrap();
        network.backward(&params, &coefficients(), true).unwrap();
        assert!(network.input_errors().is_ok());

        network.forward(&params, &sequence(), false).unwrap();
        network.backward(&params, &coefficients(), false).unwrap();
        assert!(matches!(
            network.input_errors(),
            Err(LayerError::UninitializedState { .. })
        ));
    }

    #[test]
    fn test_shorter_sequence_reuses_transforms() {
        let params = params();
        let mut network = AttentionNetwork::new(0);
        network.forward(&params, &sequence(), false).unwrap();
        let y = network.forward(&params, &sequence()[..1], false).unwrap();

        assert!(y.equals(&sequence()[0], 1e-12));
        assert_eq!(network.importance_score().unwrap().len(), 1);
        assert_eq!(network.transforms.len(), 3);
    }

    #[test]
    fn test_invalid_sequences() {
        let params = params();
        let mut network = AttentionNetwork::new(0);
        assert!(matches!(
            network.forward(&params, &[], false),
            Err(LayerError::Configuration(_))
        ));
        assert!(matches!(
            network.forward(&params, &[Tensor::vector(vec![0.1, 0.2])], false),
            Err(LayerError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            network.backward(&params, &coefficients(), true),
            Err(LayerError::UninitializedState { .. })
        ));
    }

    #[test]
    fn test_optimizer_updates_context_vector() {
        let mut params = AttentionNetworkParameters::new(3, 2, 0.0).unwrap();
        params
            .context_vector
            .set_values(Tensor::vector(vec![-0.3, -0.5]))
            .unwrap();

        let mut optimizer = ParamsOptimizer::new(LearningRateMethod::new(0.1));
        for errors in [vec![0.2, -0.5], vec![0.4, -0.3]] {
            let mut grads = params.zeros_like();
            grads.context_vector.set_values(Tensor::vector(errors)).unwrap();
            optimizer.accumulate_owned(grads).unwrap();
        }
        optimizer.update(&mut params).unwrap();

        let context = params.context_vector.dense().unwrap();
        assert!(context.equals(&Tensor::vector(vec![-0.33, -0.46]), 1e-6));
    }

    #[test]
    fn test_pooled_networks() {
        let params = params();
        let mut pool = ItemsPool::new();
        let ticket = pool.get_item(|id| Ok(AttentionNetwork::new(id))).unwrap();
        pool.get_mut(&ticket)
            .unwrap()
            .forward(&params, &sequence(), false)
            .unwrap();
        pool.release(ticket).unwrap();

        let again = pool.get_item(|_| panic!("a released network exists")).unwrap();
        assert_eq!(pool.get(&again).unwrap().id, 0);
        pool.release(again).unwrap();
    }
}
