//! Simple Recurrent Layer
//!
//! ```text
//! y(t) = f(W · x(t) + b + Wrec · y(t-1))
//! ```
//!
//! The recurrent term is omitted at the first timestep. Backward sends
//! `Wrecᵀ · g` to the previous timestep, which adds it to its output errors.

use super::feedforward::assign_relevance;
use super::parameters::LayerParameters;
use super::relevance;
use super::structure::{BackwardContext, LayerContributions, LayerHelper, LayerIo};
use super::window::RecurrentWindow;
use crate::error::Result;
use crate::tensor::AnyTensor;

#[derive(Debug, Default)]
pub struct SimpleRecurrentState;

impl LayerHelper for SimpleRecurrentState {
    fn forward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        window: &RecurrentWindow,
    ) -> Result<()> {
        let p = params.simple_recurrent()?;
        let z = p.forward(io.input()?, window.prev_output()?)?;
        io.set_output(z)
    }

    fn backward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        grads: &mut LayerParameters,
        window: &RecurrentWindow,
        ctx: &BackwardContext,
    ) -> Result<()> {
        let p = params.simple_recurrent()?;
        let g = io.output_gradient()?;
        let y_prev = window.prev_output()?;

        grads
            .simple_recurrent_mut()?
            .assign_grads(&g, io.input()?, y_prev)?;

        if y_prev.is_some() {
            *io.prev_state_errors = Some(p.recurrent_errors(&g)?);
        }

        if ctx.propagate_to_input {
            let gx = p.input_errors(&ctx.restrict(&g))?;
            io.assign_input_errors(0, gx)?;
        }
        Ok(())
    }

    /// Contributions of the input and of the previous output
    ///
    /// The bias is split in half between the two when a previous output exists.
    fn forward_with_contributions(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        window: &RecurrentWindow,
    ) -> Result<LayerContributions> {
        self.forward(io, params, window)?;
        let p = params.simple_recurrent()?;
        let b = p.biases.dense()?;
        let y_prev = window.prev_output()?;
        let share = if y_prev.is_some() { 0.5 } else { 1.0 };

        let input = relevance::linear_contributions(p.weights.dense()?, io.input()?, b, share);
        let recurrent = match (y_prev, p.recurrent_weights.as_ref()) {
            (Some(y_prev), Some(wrec)) => Some(relevance::linear_contributions(
                wrec.dense()?,
                &AnyTensor::Dense(y_prev.clone()),
                b,
                share,
            )),
            _ => None,
        };
        Ok(LayerContributions { input, recurrent })
    }

    /// Input relevance, plus the relevance of the previous output stored as
    /// the recurrent relevance of this output
    fn propagate_relevance(
        &mut self,
        io: &mut LayerIo,
        contributions: &LayerContributions,
        add: bool,
    ) -> Result<()> {
        let z = io.output.values_not_activated()?.clone();
        let output_relevance = io.output.relevance()?.clone();

        let r = relevance::distribute(&contributions.input, &z, &output_relevance)?;
        assign_relevance(io, 0, r, add)?;

        if let Some(recurrent) = &contributions.recurrent {
            let r = relevance::distribute(recurrent, &z, &output_relevance)?;
            io.output.assign_recurrent_relevance(r)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::activation::ActivationFunction;
    use crate::config::{LayerConfiguration, LayerType};
    use crate::layers::parameters::{LayerParameters, ParamsContainer};
    use crate::layers::structure::LayerStructure;
    use crate::layers::window::RecurrentWindow;
    use crate::tensor::Tensor;

    fn setup() -> (LayerStructure, LayerStructure, LayerParameters) {
        let mut config =
            LayerConfiguration::hidden(2, LayerType::SimpleRecurrent, Some(ActivationFunction::Tanh));
        config.sizes = vec![2];
        let mut params = LayerParameters::new(&config, false).unwrap();
        {
            let p = params.simple_recurrent_mut().unwrap();
            p.weights
                .set_values(Tensor::from_rows(&[vec![0.1, 0.2], vec![-0.3, 0.4]]))
                .unwrap();
            p.biases.set_values(Tensor::vector(vec![0.05, -0.05])).unwrap();
            p.recurrent_weights
                .as_mut()
                .unwrap()
                .set_values(Tensor::from_rows(&[vec![0.5, -0.1], vec![0.2, 0.3]]))
                .unwrap();
        }
        (
            LayerStructure::new(&config).unwrap(),
            LayerStructure::new(&config).unwrap(),
            params,
        )
    }

    #[test]
    fn test_forward_uses_previous_output() {
        let (mut t0, mut t1, params) = setup();
        t0.set_input(Tensor::vector(vec![1.0, 0.0])).unwrap();
        t0.forward(&params, false, &RecurrentWindow::none()).unwrap();
        let y0 = t0.output_values().unwrap().clone();
        assert!(y0.equals(&Tensor::vector(vec![0.15f64.tanh(), (-0.35f64).tanh()]), 1e-12));

        t1.set_input(Tensor::vector(vec![0.0, 1.0])).unwrap();
        t1.forward(&params, false, &RecurrentWindow::new(Some(&t0), None))
            .unwrap();
        let z = Tensor::vector(vec![
            0.2 + 0.05 + 0.5 * y0.data[0] - 0.1 * y0.data[1],
            0.4 - 0.05 + 0.2 * y0.data[0] + 0.3 * y0.data[1],
        ]);
        assert!(t1.output_values().unwrap().equals(&z.map(f64::tanh), 1e-12));
    }

    #[test]
    fn test_backward_sends_errors_to_previous_step() {
        let (mut t0, mut t1, params) = setup();
        t0.set_input(Tensor::vector(vec![1.0, 0.0])).unwrap();
        t0.forward(&params, false, &RecurrentWindow::none()).unwrap();
        t1.set_input(Tensor::vector(vec![0.0, 1.0])).unwrap();
        t1.forward(&params, false, &RecurrentWindow::new(Some(&t0), None))
            .unwrap();

        let mut grads = params.zeros_like();
        t1.set_errors(Tensor::vector(vec![0.3, -0.2])).unwrap();
        t1.backward(
            &params,
            &mut grads,
            &RecurrentWindow::new(Some(&t0), None),
            true,
            None,
        )
        .unwrap();
        assert!(t1.prev_state_errors().is_some());

        t0.set_errors(Tensor::vector(vec![0.0, 0.0])).unwrap();
        t0.backward(
            &params,
            &mut grads,
            &RecurrentWindow::new(None, Some(&t1)),
            true,
            None,
        )
        .unwrap();
        // the errors of t0 are only those coming from t1
        let received = t0.output.errors().unwrap();
        assert!(received.equals(t1.prev_state_errors().unwrap(), 1e-12));
        assert!(t0.prev_state_errors().is_none());
    }

    #[test]
    fn test_recurrent_relevance() {
        let (mut t0, mut t1, params) = setup();
        t0.set_input(Tensor::vector(vec![1.0, 0.0])).unwrap();
        t0.forward(&params, false, &RecurrentWindow::none()).unwrap();
        t1.set_input(Tensor::vector(vec![0.0, 1.0])).unwrap();
        let contributions = t1
            .forward_with_contributions(&params, &RecurrentWindow::new(Some(&t0), None))
            .unwrap();
        assert!(contributions.recurrent.is_some());

        t1.output.assign_relevance(Tensor::vector(vec![1.0, 1.0])).unwrap();
        t1.set_input_relevance(&contributions).unwrap();
        let total = t1.inputs[0].relevance().unwrap().sum()
            + t1.output.recurrent_relevance().unwrap().sum();
        // ε keeps the total a little off the output relevance
        assert!((total - 2.0).abs() < 0.2);
    }
}
