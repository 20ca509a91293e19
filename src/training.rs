//! Feedforward Training Helper
//!
//! Runs the per-example cycle of a stack of layers against a loss function
//! and hands the gradients to a [`ParamsOptimizer`]:
//!
//! ```text
//! for epoch in 0..epochs:                          optimizer.new_epoch()
//!     for batch in examples.chunks(batch_size):    optimizer.new_batch()
//!         for example in batch:                    optimizer.new_example()
//!             y      = stack.forward(features)
//!             errors = loss.errors(y, gold)
//!             stack.backward(errors) → grads
//!             optimizer.accumulate(grads)
//!         optimizer.update(params)
//! ```
//!
//! The output activation and the loss are checked at construction: a softmax
//! output requires the softmax cross-entropy loss and vice versa.

use crate::config::TrainingConfig;
use crate::error::Result;
use crate::layers::ParamsContainer;
use crate::loss::LossFunction;
use crate::optimizer::ParamsOptimizer;
use crate::stacked::{StackedLayers, StackedLayersParameters};
use crate::tensor::{AnyTensor, Tensor};
use crate::update_methods::UpdateMethod;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// One training example
#[derive(Clone, Debug)]
pub struct Example {
    pub features: AnyTensor,
    pub gold: Tensor,
}

impl Example {
    pub fn new(features: impl Into<AnyTensor>, gold: Tensor) -> Self {
        Self {
            features: features.into(),
            gold,
        }
    }
}

/// Trains the parameters of a feedforward stack
pub struct FeedforwardTrainer<M> {
    pub params: StackedLayersParameters,
    pub optimizer: ParamsOptimizer<StackedLayersParameters, M>,
    pub loss: LossFunction,
    /// Fraction of output units propagating errors backward
    pub meprop_k: Option<f64>,
    stack: StackedLayers,
    /// Gradients of the last example, until accumulated
    grads: Option<StackedLayersParameters>,
}

impl<M: UpdateMethod> FeedforwardTrainer<M> {
    pub fn new(
        params: StackedLayersParameters,
        optimizer: ParamsOptimizer<StackedLayersParameters, M>,
        loss: LossFunction,
    ) -> Result<Self> {
        loss.check_pairing(params.output_activation())?;
        let stack = StackedLayers::new(&params)?;
        Ok(Self {
            params,
            optimizer,
            loss,
            meprop_k: None,
            stack,
            grads: None,
        })
    }

    pub fn with_meprop(mut self, k: f64) -> Self {
        self.meprop_k = Some(k);
        self
    }

    /// Forward without dropout
    pub fn predict(&mut self, features: impl Into<AnyTensor>) -> Result<Tensor> {
        Ok(self.stack.forward(&self.params, features, false)?.clone())
    }

    /// Forward and backward one example, returning its loss
    pub fn learn_from_example(&mut self, example: &Example, use_dropout: bool) -> Result<f64> {
        let output = self
            .stack
            .forward(&self.params, example.features.clone(), use_dropout)?
            .clone();
        let errors = self.loss.errors(&output, &example.gold)?;

        let params = &self.params;
        let grads = self.grads.get_or_insert_with(|| params.zeros_like());
        self.stack
            .backward(&self.params, errors, grads, false, self.meprop_k)?;

        self.loss.loss(&output, &example.gold)
    }

    /// Hand the gradients of the last example to the optimizer
    ///
    /// With batches of one example the gradients are moved instead of copied.
    pub fn accumulate_params_errors(&mut self, batch_size: usize) -> Result<()> {
        if batch_size > 1 {
            if let Some(grads) = self.grads.as_ref() {
                self.optimizer.accumulate(grads)?;
            }
        } else if let Some(grads) = self.grads.take() {
            self.optimizer.accumulate_owned(grads)?;
        }
        Ok(())
    }

    /// Train over `examples`, returning the mean loss of every epoch
    pub fn train(&mut self, examples: &[Example], config: &TrainingConfig) -> Result<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut order: Vec<usize> = (0..examples.len()).collect();
        let batch_size = config.batch_size.max(1);
        let mut epoch_losses = Vec::with_capacity(config.epochs);

        for epoch in 0..config.epochs {
            self.optimizer.new_epoch();
            if config.shuffle {
                order.shuffle(&mut rng);
            }

            let mut total_loss = 0.0;
            for (batch_index, batch) in order.chunks(batch_size).enumerate() {
                self.optimizer.new_batch();
                for &i in batch {
                    self.optimizer.new_example();
                    total_loss += self.learn_from_example(&examples[i], config.use_dropout)?;
                    self.accumulate_params_errors(batch_size)?;
                }
                self.optimizer.update(&mut self.params)?;
                debug!("epoch {} batch {} updated", epoch + 1, batch_index + 1);
            }

            let mean = if examples.is_empty() {
                0.0
            } else {
                total_loss / examples.len() as f64
            };
            info!(
                "epoch {}/{}: mean loss {:.6} over {} examples",
                epoch + 1,
                config.epochs,
                mean,
                examples.len()
            );
            epoch_losses.push(mean);
        }
        Ok(epoch_losses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::ActivationFunction;
    use crate::config::{LayerConfiguration, LayerType};
    use crate::error::LayerError;
    use crate::random::FixedRangeRandom;
    use crate::update_methods::LearningRateMethod;

    fn params(output: ActivationFunction) -> StackedLayersParameters {
        let configs = vec![
            LayerConfiguration::input(2),
            LayerConfiguration::hidden(4, LayerType::Feedforward, Some(ActivationFunction::Tanh)),
            LayerConfiguration::hidden(2, LayerType::Feedforward, Some(output)),
        ];
        StackedLayersParameters::initialized(&configs, &mut FixedRangeRandom::new(0.8, 42), 0.0)
            .unwrap()
    }

    #[test]
    fn test_pairing_checked_at_construction() {
        let optimizer = ParamsOptimizer::new(LearningRateMethod::new(0.1));
        assert!(matches!(
            FeedforwardTrainer::new(params(ActivationFunction::Softmax), optimizer.clone(), LossFunction::MSE),
            Err(LayerError::Configuration(_))
        ));
        assert!(matches!(
            FeedforwardTrainer::new(
                params(ActivationFunction::Sigmoid),
                optimizer,
                LossFunction::SoftmaxCrossEntropy
            ),
            Err(LayerError::Configuration(_))
        ));
    }

    #[test]
    fn test_loss_decreases() {
        let examples = vec![
            Example::new(Tensor::vector(vec![1.0, 0.0]), Tensor::vector(vec![1.0, 0.0])),
            Example::new(Tensor::vector(vec![0.0, 1.0]), Tensor::vector(vec![0.0, 1.0])),
            Example::new(Tensor::vector(vec![1.0, 1.0]), Tensor::vector(vec![1.0, 0.0])),
        ];
        let mut trainer = FeedforwardTrainer::new(
            params(ActivationFunction::Softmax),
            ParamsOptimizer::new(LearningRateMethod::new(0.5)),
            LossFunction::SoftmaxCrossEntropy,
        )
        .unwrap();

        let config = TrainingConfig {
            epochs: 100,
            use_dropout: false,
            ..TrainingConfig::default()
        };
        let losses = trainer.train(&examples, &config).unwrap();
        assert_eq!(losses.len(), 100);
        assert!(losses[99] < losses[0]);

        let y = trainer.predict(Tensor::vector(vec![0.0, 1.0])).unwrap();
        assert_eq!(y.argmax_index(), 1);
    }

    #[test]
    fn test_batched_accumulation_copies() {
        let mut trainer = FeedforwardTrainer::new(
            params(ActivationFunction::Sigmoid),
            ParamsOptimizer::new(LearningRateMethod::new(0.1)),
            LossFunction::MSE,
        )
        .unwrap();
        let example = Example::new(Tensor::vector(vec![0.3, -0.3]), Tensor::vector(vec![1.0, 0.0]));
        trainer.learn_from_example(&example, false).unwrap();
        trainer.accumulate_params_errors(4).unwrap();
        trainer.accumulate_params_errors(4).unwrap();
        assert_eq!(trainer.optimizer.accumulator().count(), 2);
        assert!(trainer.grads.is_some());

        trainer.accumulate_params_errors(1).unwrap();
        assert!(trainer.grads.is_none());
    }
}
