//! Highway Layer
//!
//! A transform gate decides, per unit, how much of the transformed input
//! replaces the input itself (so input and output have the same size):
//!
//! ```text
//! t = σ(Wt · x + bt)
//! c = f(Wi · x + bi)
//! y = t ⊙ c + (1 - t) ⊙ x
//! ```
//!
//! Backward:
//!
//! ```text
//! gc = gy ⊙ t ⊙ f'
//! gt = gy ⊙ (c - x) ⊙ σ'
//! gx = Wiᵀ · gc + Wtᵀ · gt + gy ⊙ (1 - t)
//! ```

use super::parameters::{gates_input_errors, GateParameters, LayerParameters, ParamsContainer};
use super::structure::{BackwardContext, LayerHelper, LayerIo};
use super::window::RecurrentWindow;
use crate::activation::ActivationFunction;
use crate::arrays::{ParamsArray, StatefulArray};
use crate::error::Result;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HighwayParameters {
    pub input: GateParameters,
    pub transform_gate: GateParameters,
}

impl HighwayParameters {
    pub fn new(size: usize) -> Self {
        Self {
            input: GateParameters::new(size, size, false),
            transform_gate: GateParameters::new(size, size, false),
        }
    }
}

impl ParamsContainer for HighwayParameters {
    fn params(&self) -> Vec<&ParamsArray> {
        let mut params = self.input.params();
        params.extend(self.transform_gate.params());
        params
    }

    fn params_mut(&mut self) -> Vec<&mut ParamsArray> {
        let mut params = self.input.params_mut();
        params.extend(self.transform_gate.params_mut());
        params
    }
}

#[derive(Debug)]
pub struct HighwayState {
    pub input_unit: StatefulArray,
    pub transform_gate: StatefulArray,
}

impl HighwayState {
    pub fn new(size: usize, activation: Option<ActivationFunction>) -> Self {
        Self {
            input_unit: StatefulArray::with_size(size, activation),
            transform_gate: StatefulArray::with_size(size, Some(ActivationFunction::Sigmoid)),
        }
    }
}

impl LayerHelper for HighwayState {
    fn forward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        _window: &RecurrentWindow,
    ) -> Result<()> {
        let p = params.highway()?;
        let x = io.input()?;

        self.transform_gate
            .assign_activated(p.transform_gate.forward(x, None)?)?;
        self.input_unit.assign_activated(p.input.forward(x, None)?)?;

        let x = x.as_dense()?;
        let t = self.transform_gate.dense_values()?;
        let mut y = t.prod(self.input_unit.dense_values()?);
        y.assign_add(&t.reverse().prod(x));
        io.set_output(y)
    }

    fn backward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        grads: &mut LayerParameters,
        _window: &RecurrentWindow,
        ctx: &BackwardContext,
    ) -> Result<()> {
        let p = params.highway()?;
        let gy = io.output_gradient()?;
        let x = io.input()?;
        let x_dense = x.as_dense()?;

        let t = self.transform_gate.dense_values()?;
        let c = self.input_unit.dense_values()?;

        let gc = gy.prod(t).prod(&self.input_unit.calculate_activation_deriv()?);
        let gt = gy
            .prod(&c.sub(x_dense))
            .prod(&self.transform_gate.calculate_activation_deriv()?);

        let g = grads.highway_mut()?;
        g.input.assign_grads(&gc, x, None)?;
        g.transform_gate.assign_grads(&gt, x, None)?;

        if ctx.propagate_to_input {
            let mut gx = gates_input_errors(ctx, &[(&p.input, &gc), (&p.transform_gate, &gt)])?;
            gx.assign_add(&gy.prod(&t.reverse()));
            io.assign_input_errors(0, gx)?;
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
    use crate::random::FixedRangeRandom;
    use crate::tensor::Tensor;

    const H: f64 = 1e-6;

    fn config() -> LayerConfiguration {
        let mut config =
            LayerConfiguration::hidden(3, LayerType::Highway, Some(ActivationFunction::Tanh));
        config.sizes = vec![3];
        config
    }

    fn params() -> LayerParameters {
        let mut params = LayerParameters::new(&config(), false).unwrap();
        params
            .initialize(&mut FixedRangeRandom::new(0.8, 5), 0.1)
            .unwrap();
        params
    }

    fn output(params: &LayerParameters, x: &Tensor) -> Tensor {
        let mut s = LayerStructure::new(&config()).unwrap();
        s.set_input(x.clone()).unwrap();
        s.forward(params, false, &RecurrentWindow::none()).unwrap();
        s.output_values().unwrap().clone()
    }

    fn loss(params: &LayerParameters, x: &Tensor, gold: &Tensor) -> f64 {
        let y = output(params, x);
        0.5 * y.sub(gold).data.iter().map(|d| d * d).sum::<f64>()
    }

    #[test]
    fn test_closed_transform_gate_carries_input() {
        let mut params = params();
        // a very negative gate bias closes the gate
        params
            .highway_mut()
            .unwrap()
            .transform_gate
            .biases
            .set_values(Tensor::vector(vec![-50.0; 3]))
            .unwrap();
        let x = Tensor::vector(vec![0.3, -0.7, 0.9]);
        assert!(output(&params, &x).equals(&x, 1e-9));
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let params = params();
        let x = Tensor::vector(vec![0.3, -0.7, 0.9]);
        let gold = Tensor::vector(vec![0.1, 0.2, -0.4]);

        let mut s = LayerStructure::new(&config()).unwrap();
        s.set_input(x.clone()).unwrap();
        s.forward(&params, false, &RecurrentWindow::none()).unwrap();
        let errors = s.output_values().unwrap().sub(&gold);
        s.set_errors(errors).unwrap();
        let mut grads = params.zeros_like();
        s.backward(&params, &mut grads, &RecurrentWindow::none(), true, None)
            .unwrap();

        // input unit and transform gate, weights and biases alike
        for k in 0..params.params().len() {
            let analytic = grads.params()[k].values().to_dense();
            for j in 0..analytic.len() {
                let mut plus = params.copy();
                let mut minus = params.copy();
                plus.params_mut()[k].dense_mut().unwrap().data[j] += H;
                minus.params_mut()[k].dense_mut().unwrap().data[j] -= H;
                let numeric = (loss(&plus, &x, &gold) - loss(&minus, &x, &gold)) / (2.0 * H);
                assert!(
                    (analytic.data[j] - numeric).abs() < 1e-6,
                    "array {} entry {}: {} vs {}",
                    k,
                    j,
                    analytic.data[j],
                    numeric
                );
            }
        }

        let gx = s.input_errors().unwrap();
        for i in 0..3 {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp.data[i] += H;
            xm.data[i] -= H;
            let numeric = (loss(&params, &xp, &gold) - loss(&params, &xm, &gold)) / (2.0 * H);
            assert!((gx.data[i] - numeric).abs() < 1e-6);
        }
    }
}
