//! Stacked Layers
//!
//! A network built as a chain of single-input layers: the output of each layer
//! is the input of the next one.
//!
//! ```text
//! configs:    [ input(4) ][ hidden(5, Feedforward, Tanh) ][ hidden(3, Feedforward, Softmax) ]
//! structures:             [ layer 0                     ][ layer 1                         ]
//!
//! forward:   x ──► layer 0 ──► layer 1 ──► y
//! backward:  gx ◄── layer 0 ◄── layer 1 ◄── gy
//! ```
//!
//! The first configuration only declares the input size (and sparsity). Every
//! other configuration becomes one [`LayerStructure`] and one
//! [`LayerParameters`] entry.
//!
//! ## Allowed Connections
//!
//! A layer of the stack reads exactly one vector, so merge layers, layers
//! reading a matrix (attention, max pooling) and squared distance (whose
//! output is a scalar score, not a layer to stack upon) are rejected at
//! construction, as is any layer without a connection type. Softmax is
//! accepted only as the activation of the output layer.
//!
//! Recurrent layers are allowed. Outside of a [`RecurrentProcessor`] they
//! behave as the first timestep of a sequence.
//!
//! [`RecurrentProcessor`]: crate::recurrent::RecurrentProcessor

use crate::activation::ActivationFunction;
use crate::arrays::ParamsArray;
use crate::config::{LayerConfiguration, LayerType};
use crate::error::{LayerError, Result};
use crate::layers::{
    LayerContributions, LayerParameters, LayerStructure, ParamsContainer, RecurrentWindow,
};
use crate::random::RandomGenerator;
use crate::tensor::{AnyTensor, Tensor};
use serde::{Deserialize, Serialize};

fn allowed_in_stack(connection: LayerType) -> bool {
    !connection.is_merge()
        && !connection.takes_matrix_input()
        && connection != LayerType::SquaredDistance
}

/// Check the layout of a stack and fill in the input size of every layer
fn resolve_layers(configs: &[LayerConfiguration]) -> Result<Vec<LayerConfiguration>> {
    if configs.len() < 2 {
        return Err(LayerError::config(
            "a stack needs an input layer and at least one more layer",
        ));
    }
    let mut resolved = Vec::with_capacity(configs.len());
    resolved.push(configs[0].clone());

    for (i, pair) in configs.windows(2).enumerate() {
        let (prev, config) = (&pair[0], &pair[1]);
        let connection = config.connection.ok_or_else(|| {
            LayerError::config(format!("layer {} has no connection type", i + 1))
        })?;
        if !allowed_in_stack(connection) {
            return Err(LayerError::config(format!(
                "{:?} is not allowed as layer {} of a stack",
                connection,
                i + 1
            )));
        }
        if config.activation == Some(ActivationFunction::Softmax) && i + 2 < configs.len() {
            return Err(LayerError::config(format!(
                "Softmax is only allowed on the output layer, not on layer {}",
                i + 1
            )));
        }
        let mut config = config.clone();
        config.sizes = vec![prev.size];
        config.sparse_input = i == 0 && configs[0].sparse_input;
        resolved.push(config);
    }
    Ok(resolved)
}

/// The parameters of every layer of a stack
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StackedLayersParameters {
    pub layers_configuration: Vec<LayerConfiguration>,
    pub params_per_layer: Vec<LayerParameters>,
}

impl StackedLayersParameters {
    /// Zero-initialized parameters
    pub fn new(configs: &[LayerConfiguration]) -> Result<Self> {
        let layers_configuration = resolve_layers(configs)?;
        let params_per_layer = layers_configuration[1..]
            .iter()
            .map(|config| LayerParameters::new(config, config.sparse_input))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            layers_configuration,
            params_per_layer,
        })
    }

    /// Parameters with randomized weights and constant biases
    pub fn initialized(
        configs: &[LayerConfiguration],
        generator: &mut dyn RandomGenerator,
        biases_init_value: f64,
    ) -> Result<Self> {
        let mut params = Self::new(configs)?;
        params.initialize(generator, biases_init_value)?;
        Ok(params)
    }

    pub fn input_size(&self) -> usize {
        self.layers_configuration[0].size
    }

    pub fn output_size(&self) -> usize {
        self.layers_configuration[self.layers_configuration.len() - 1].size
    }

    pub fn sparse_input(&self) -> bool {
        self.layers_configuration[0].sparse_input
    }

    /// Number of layers with parameters (the input layer excluded)
    pub fn num_layers(&self) -> usize {
        self.params_per_layer.len()
    }

    pub fn is_recurrent(&self) -> bool {
        self.layers_configuration[1..]
            .iter()
            .filter_map(|c| c.connection)
            .any(|c| c.is_recurrent())
    }

    /// Activation of the output layer
    pub fn output_activation(&self) -> Option<ActivationFunction> {
        self.layers_configuration
            .last()
            .and_then(|c| c.activation)
    }
}

impl ParamsContainer for StackedLayersParameters {
    fn params(&self) -> Vec<&ParamsArray> {
        self.params_per_layer
            .iter()
            .flat_map(|p| p.params())
            .collect()
    }

    fn params_mut(&mut self) -> Vec<&mut ParamsArray> {
        self.params_per_layer
            .iter_mut()
            .flat_map(|p| p.params_mut())
            .collect()
    }
}

/// The live structures of a stack, one per layer
#[derive(Debug)]
pub struct StackedLayers {
    pub layers: Vec<LayerStructure>,
}

impl StackedLayers {
    pub fn new(params: &StackedLayersParameters) -> Result<Self> {
        let layers = params.layers_configuration[1..]
            .iter()
            .map(LayerStructure::new)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { layers })
    }

    fn check_params(&self, params: &StackedLayersParameters) -> Result<()> {
        if params.params_per_layer.len() != self.layers.len() {
            return Err(LayerError::shape_mismatch(
                &[self.layers.len()],
                &[params.params_per_layer.len()],
            ));
        }
        Ok(())
    }

    /// Forward an input through every layer, returning the output
    pub fn forward(
        &mut self,
        params: &StackedLayersParameters,
        input: impl Into<AnyTensor>,
        use_dropout: bool,
    ) -> Result<&Tensor> {
        self.forward_step(params, input, use_dropout, None)
    }

    /// Forward one timestep, each layer seeing its copy in `prev`
    pub(crate) fn forward_step(
        &mut self,
        params: &StackedLayersParameters,
        input: impl Into<AnyTensor>,
        use_dropout: bool,
        prev: Option<&StackedLayers>,
    ) -> Result<&Tensor> {
        self.check_params(params)?;
        self.layers[0].set_input(input)?;

        let last = self.layers.len() - 1;
        for i in 0..=last {
            let window = RecurrentWindow::new(prev.map(|p| &p.layers[i]), None);
            self.layers[i].forward(&params.params_per_layer[i], use_dropout, &window)?;
            if i < last {
                let y = self.layers[i].output_values()?.clone();
                self.layers[i + 1].set_input(y)?;
            }
        }
        self.output_values()
    }

    /// Backward from the output errors
    ///
    /// Writes the gradients of every layer into `grads`. When
    /// `propagate_to_input` is unset the first layer computes no input errors.
    pub fn backward(
        &mut self,
        params: &StackedLayersParameters,
        output_errors: Tensor,
        grads: &mut StackedLayersParameters,
        propagate_to_input: bool,
        meprop_k: Option<f64>,
    ) -> Result<()> {
        self.backward_step(
            params,
            output_errors,
            grads,
            propagate_to_input,
            meprop_k,
            None,
            None,
        )
    }

    /// Backward one timestep
    ///
    /// Each layer adds the errors its copy in `next` sent back to it, and
    /// reads `prev` for the previous output.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn backward_step(
        &mut self,
        params: &StackedLayersParameters,
        output_errors: Tensor,
        grads: &mut StackedLayersParameters,
        propagate_to_input: bool,
        meprop_k: Option<f64>,
        prev: Option<&StackedLayers>,
        next: Option<&StackedLayers>,
    ) -> Result<()> {
        self.check_params(params)?;
        self.check_params(grads)?;

        let last = self.layers.len() - 1;
        self.layers[last].set_errors(output_errors)?;

        for i in (0..=last).rev() {
            let window = RecurrentWindow::new(
                prev.map(|p| &p.layers[i]),
                next.map(|n| &n.layers[i]),
            );
            self.layers[i].backward(
                &params.params_per_layer[i],
                &mut grads.params_per_layer[i],
                &window,
                i > 0 || propagate_to_input,
                meprop_k,
            )?;
            if i > 0 {
                let errors = self.layers[i].input_errors()?.clone();
                self.layers[i - 1].set_errors(errors)?;
            }
        }
        Ok(())
    }

    /// Forward recording the contributions of every layer
    pub fn forward_with_contributions(
        &mut self,
        params: &StackedLayersParameters,
        input: impl Into<AnyTensor>,
    ) -> Result<Vec<LayerContributions>> {
        self.check_params(params)?;
        self.layers[0].set_input(input)?;

        let last = self.layers.len() - 1;
        let mut contributions = Vec::with_capacity(self.layers.len());
        for i in 0..=last {
            contributions.push(
                self.layers[i]
                    .forward_with_contributions(&params.params_per_layer[i], &RecurrentWindow::none())?,
            );
            if i < last {
                let y = self.layers[i].output_values()?.clone();
                self.layers[i + 1].set_input(y)?;
            }
        }
        Ok(contributions)
    }

    /// Relevance of the input elements given the relevance of the output
    ///
    /// Requires a previous [`forward_with_contributions`](Self::forward_with_contributions).
    pub fn input_relevance(
        &mut self,
        contributions: &[LayerContributions],
        output_relevance: Tensor,
    ) -> Result<&Tensor> {
        if contributions.len() != self.layers.len() {
            return Err(LayerError::shape_mismatch(
                &[self.layers.len()],
                &[contributions.len()],
            ));
        }
        let last = self.layers.len() - 1;
        self.layers[last].output.assign_relevance(output_relevance)?;
        for i in (0..=last).rev() {
            self.layers[i].set_input_relevance(&contributions[i])?;
            if i > 0 {
                let r = self.layers[i].inputs[0].relevance()?.clone();
                self.layers[i - 1].output.assign_relevance(r)?;
            }
        }
        self.layers[0].inputs[0].relevance()
    }

    pub fn output_values(&self) -> Result<&Tensor> {
        match self.layers.last() {
            Some(layer) => layer.output_values(),
            None => Err(LayerError::uninitialized("layers")),
        }
    }

    /// Errors of the input of the first layer
    pub fn input_errors(&self) -> Result<&Tensor> {
        match self.layers.first() {
            Some(layer) => layer.input_errors(),
            None => Err(LayerError::uninitialized("layers")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::FixedRangeRandom;

    fn configs(connection: LayerType) -> Vec<LayerConfiguration> {
        vec![
            LayerConfiguration::input(3),
            LayerConfiguration::hidden(4, connection, Some(ActivationFunction::Tanh)),
            LayerConfiguration::hidden(2, LayerType::Feedforward, Some(ActivationFunction::Sigmoid)),
        ]
    }

    #[test]
    fn test_layout() {
        let params = StackedLayersParameters::new(&configs(LayerType::Feedforward)).unwrap();
        assert_eq!(params.num_layers(), 2);
        assert_eq!(params.input_size(), 3);
        assert_eq!(params.output_size(), 2);
        assert_eq!(params.layers_configuration[2].sizes, vec![4]);
        // 3·4 + 4 + 4·2 + 2
        assert_eq!(params.num_parameters(), 26);
        assert!(!params.is_recurrent());
    }

    #[test]
    fn test_missing_connection_type() {
        let mut layers = configs(LayerType::Feedforward);
        layers[1].connection = None;
        assert!(matches!(
            StackedLayersParameters::new(&layers),
            Err(LayerError::Configuration(_))
        ));
    }

    #[test]
    fn test_merge_layer_rejected() {
        for connection in [LayerType::Concat, LayerType::Affine, LayerType::MaxPooling] {
            assert!(matches!(
                StackedLayersParameters::new(&configs(connection)),
                Err(LayerError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_softmax_only_on_output_layer() {
        let mut layers = configs(LayerType::Feedforward);
        layers[1].activation = Some(ActivationFunction::Softmax);
        assert!(matches!(
            StackedLayersParameters::new(&layers),
            Err(LayerError::Configuration(_))
        ));

        let mut layers = configs(LayerType::Feedforward);
        layers[2].activation = Some(ActivationFunction::Softmax);
        assert!(StackedLayersParameters::new(&layers).is_ok());
    }

    #[test]
    fn test_input_errors_cleared_when_not_propagated() {
        let mut rng = FixedRangeRandom::new(0.5, 3);
        let params =
            StackedLayersParameters::initialized(&configs(LayerType::Feedforward), &mut rng, 0.1)
                .unwrap();
        let mut stack = StackedLayers::new(&params).unwrap();
        let x = Tensor::vector(vec![0.1, -0.4, 0.7]);
        let errors = Tensor::vector(vec![0.5, -0.5]);

        stack.forward(&params, x.clone(), false).unwrap();
        let mut grads = params.zeros_like();
        stack
            .backward(&params, errors.clone(), &mut grads, true, None)
            .unwrap();
        assert!(stack.input_errors().is_ok());

        stack.forward(&params, x, false).unwrap();
        let mut grads = params.zeros_like();
        stack
            .backward(&params, errors, &mut grads, false, None)
            .unwrap();
        assert!(matches!(
            stack.input_errors(),
            Err(LayerError::UninitializedState { .. })
        ));
    }

    #[test]
    fn test_backward_without_input_propagation() {
        let mut rng = FixedRangeRandom::new(0.5, 3);
        let params =
            StackedLayersParameters::initialized(&configs(LayerType::Feedforward), &mut rng, 0.1)
                .unwrap();
        let mut grads = params.zeros_like();
        let mut stack = StackedLayers::new(&params).unwrap();

        let y = stack
            .forward(&params, Tensor::vector(vec![0.1, -0.4, 0.7]), false)
            .unwrap();
        assert_eq!(y.len(), 2);
        stack
            .backward(&params, Tensor::vector(vec![0.5, -0.5]), &mut grads, false, None)
            .unwrap();
        assert!(stack.input_errors().is_err());
        assert!(stack.layers[1].input_errors().is_ok());
        assert!(crate::gradients::grad_norm(&grads) > 0.0);
    }

    #[test]
    fn test_input_relevance() {
        let mut rng = FixedRangeRandom::new(0.5, 11);
        let params =
            StackedLayersParameters::initialized(&configs(LayerType::Feedforward), &mut rng, 0.0)
                .unwrap();
        let mut stack = StackedLayers::new(&params).unwrap();
        let contributions = stack
            .forward_with_contributions(&params, Tensor::vector(vec![1.0, 0.5, -0.5]))
            .unwrap();
        let r = stack
            .input_relevance(&contributions, Tensor::vector(vec![1.0, 0.0]))
            .unwrap();
        assert_eq!(r.len(), 3);
        assert!(r.data.iter().all(|v| v.is_finite()));
    }
}
