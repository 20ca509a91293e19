//! Feedforward Layer (Fully Connected)
//!
//! ## Forward Pass
//!
//! ```text
//! Input:   x [in]
//! Weights: W [out, in]
//! Biases:  b [out]
//! Output:  y = f(W · x + b) [out]
//! ```
//!
//! ## Backward Pass
//!
//! Using the chain rule, with `gy` the output errors:
//!
//! ```text
//! g  = gy ⊙ f'(z)
//! gW = g ⊗ x
//! gb = g
//! gx = Wᵀ · g
//! ```
//!
//! When `x` is sparse, `gW` is sparse too: only the columns of the active
//! input elements are non-zero.

use super::relevance;
use super::parameters::LayerParameters;
use super::structure::{BackwardContext, LayerContributions, LayerHelper, LayerIo};
use super::window::RecurrentWindow;
use crate::error::Result;
use crate::tensor::Tensor;

#[derive(Debug, Default)]
pub struct FeedforwardState;

impl LayerHelper for FeedforwardState {
    fn forward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        _window: &RecurrentWindow,
    ) -> Result<()> {
        let p = params.feedforward()?;
        let z = p.forward(io.input()?, None)?;
        io.set_output(z)
    }

    fn backward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        grads: &mut LayerParameters,
        _window: &RecurrentWindow,
        ctx: &BackwardContext,
    ) -> Result<()> {
        let p = params.feedforward()?;
        let g = io.output_gradient()?;

        grads.feedforward_mut()?.assign_grads(&g, io.input()?, None)?;

        if ctx.propagate_to_input {
            let gx = p.input_errors(&ctx.restrict(&g))?;
            io.assign_input_errors(0, gx)?;
        }
        Ok(())
    }

    fn forward_with_contributions(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        window: &RecurrentWindow,
    ) -> Result<LayerContributions> {
        self.forward(io, params, window)?;
        let p = params.feedforward()?;
        let input = relevance::linear_contributions(
            p.weights.dense()?,
            io.input()?,
            p.biases.dense()?,
            1.0,
        );
        Ok(LayerContributions {
            input,
            recurrent: None,
        })
    }

    fn propagate_relevance(
        &mut self,
        io: &mut LayerIo,
        contributions: &LayerContributions,
        add: bool,
    ) -> Result<()> {
        let r = relevance::distribute(
            &contributions.input,
            io.output.values_not_activated()?,
            io.output.relevance()?,
        )?;
        assign_relevance(io, 0, r, add)
    }
}

/// Set or add the relevance of an input
pub(crate) fn assign_relevance(
    io: &mut LayerIo,
    index: usize,
    r: Tensor,
    add: bool,
) -> Result<()> {
    let input = &mut io.inputs[index];
    let r = match (add, input.relevance()) {
        (true, Ok(current)) => current.add(&r),
        _ => r,
    };
    input.assign_relevance(r)
}

#[cfg(test)]
mod tests {
    use crate::activation::ActivationFunction;
    use crate::config::{LayerConfiguration, LayerType};
    use crate::error::LayerError;
    use crate::layers::parameters::{LayerParameters, ParamsContainer};
    use crate::layers::structure::LayerStructure;
    use crate::layers::window::RecurrentWindow;
    use crate::tensor::{AnyTensor, SparseTensor, Tensor};

    fn layer(activation: Option<ActivationFunction>) -> (LayerStructure, LayerParameters) {
        let mut config = LayerConfiguration::hidden(2, LayerType::Feedforward, activation);
        config.sizes = vec![3];
        let structure = LayerStructure::new(&config).unwrap();
        let mut params = LayerParameters::new(&config, false).unwrap();
        {
            let p = params.feedforward_mut().unwrap();
            p.weights
                .set_values(Tensor::from_rows(&[
                    vec![0.5, 0.6, -0.8],
                    vec![0.7, -0.4, 0.1],
                ]))
                .unwrap();
            p.biases.set_values(Tensor::vector(vec![0.4, -0.3])).unwrap();
        }
        (structure, params)
    }

    fn loss(params: &LayerParameters, x: &Tensor, gold: &Tensor) -> f64 {
        let (mut s, _) = layer(Some(ActivationFunction::Tanh));
        s.set_input(x.clone()).unwrap();
        s.forward(params, false, &RecurrentWindow::none()).unwrap();
        let y = s.output_values().unwrap();
        0.5 * y.sub(gold).data.iter().map(|d| d * d).sum::<f64>()
    }

    #[test]
    fn test_forward_known_values() {
        let (mut s, params) = layer(None);
        s.set_input(Tensor::vector(vec![1.0, 2.0, 0.5])).unwrap();
        s.forward(&params, false, &RecurrentWindow::none()).unwrap();
        let y = s.output_values().unwrap();
        assert!(y.equals(&Tensor::vector(vec![1.7, -0.35]), 1e-12));
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let x = Tensor::vector(vec![0.3, -0.7, 0.9]);
        let gold = Tensor::vector(vec![0.1, 0.2]);

        let (mut s, params) = layer(Some(ActivationFunction::Tanh));
        s.set_input(x.clone()).unwrap();
        s.forward(&params, false, &RecurrentWindow::none()).unwrap();
        let errors = s.output_values().unwrap().sub(&gold);
        s.set_errors(errors).unwrap();
        let mut grads = params.zeros_like();
        s.backward(&params, &mut grads, &RecurrentWindow::none(), true, None)
            .unwrap();

        let h = 1e-6;
        let gw = grads.feedforward().unwrap().weights.values().to_dense();
        let mut plus = params.copy();
        let mut minus = params.copy();
        plus.feedforward_mut().unwrap().weights.dense_mut().unwrap().data[4] += h;
        minus.feedforward_mut().unwrap().weights.dense_mut().unwrap().data[4] -= h;
        let numeric = (loss(&plus, &x, &gold) - loss(&minus, &x, &gold)) / (2.0 * h);
        assert!((gw.data[4] - numeric).abs() < 1e-6);

        let gx = s.input_errors().unwrap();
        for i in 0..3 {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp.data[i] += h;
            xm.data[i] -= h;
            let numeric = (loss(&params, &xp, &gold) - loss(&params, &xm, &gold)) / (2.0 * h);
            assert!((gx.data[i] - numeric).abs() < 1e-6);
        }
    }

    #[test]
    fn test_sparse_input_gives_sparse_weight_gradient() {
        let mut config = LayerConfiguration::hidden(2, LayerType::Feedforward, None);
        config.sizes = vec![5];
        let mut s = LayerStructure::new(&config).unwrap();
        let params = LayerParameters::new(&config, true).unwrap();
        let mut grads = params.zeros_like();

        s.set_input(SparseTensor::binary_vector(5, &[1, 4])).unwrap();
        s.forward(&params, false, &RecurrentWindow::none()).unwrap();
        s.set_errors(Tensor::vector(vec![1.0, -1.0])).unwrap();
        s.backward(&params, &mut grads, &RecurrentWindow::none(), false, None)
            .unwrap();

        match grads.feedforward().unwrap().weights.values() {
            AnyTensor::Sparse(gw) => assert_eq!(gw.nnz(), 4),
            AnyTensor::Dense(_) => panic!("expected a sparse gradient"),
        }
    }

    #[test]
    fn test_meprop_one_equals_unrestricted() {
        let x = Tensor::vector(vec![0.3, -0.7, 0.9]);
        let run = |k: Option<f64>| {
            let (mut s, params) = layer(Some(ActivationFunction::Sigmoid));
            s.set_input(x.clone()).unwrap();
            s.forward(&params, false, &RecurrentWindow::none()).unwrap();
            s.set_errors(Tensor::vector(vec![0.2, -0.5])).unwrap();
            let mut grads = params.zeros_like();
            s.backward(&params, &mut grads, &RecurrentWindow::none(), true, k)
                .map(|_| s.input_errors().unwrap().clone())
        };
        let full = run(None).unwrap();
        let k1 = run(Some(1.0)).unwrap();
        assert!(full.equals(&k1, 1e-12));

        assert!(matches!(run(Some(1.5)), Err(LayerError::Configuration(_))));
    }

    #[test]
    fn test_relevance_from_contributions() {
        let (mut s, params) = layer(Some(ActivationFunction::Tanh));
        s.set_input(Tensor::vector(vec![1.0, 2.0, 0.5])).unwrap();
        let contributions = s
            .forward_with_contributions(&params, &RecurrentWindow::none())
            .unwrap();
        assert_eq!(contributions.input.shape, [2, 3]);

        s.output.assign_relevance(Tensor::vector(vec![1.0, 0.0])).unwrap();
        s.set_input_relevance(&contributions).unwrap();
        let r = s.inputs[0].relevance().unwrap().clone();
        // z_0 = 1.7; contributions of unit 0 are 0.5+0.4/3, 1.2+0.4/3, -0.4+0.4/3
        let expected = Tensor::vector(vec![
            (0.5 + 0.4 / 3.0) / 1.71,
            (1.2 + 0.4 / 3.0) / 1.71,
            (-0.4 + 0.4 / 3.0) / 1.71,
        ]);
        assert!(r.equals(&expected, 1e-12));

        s.add_input_relevance(&contributions).unwrap();
        assert!(s.inputs[0].relevance().unwrap().equals(&r.prod_scalar(2.0), 1e-12));
    }

    #[test]
    fn test_relevance_requires_output_relevance() {
        let (mut s, params) = layer(None);
        s.set_input(Tensor::vector(vec![1.0, 2.0, 0.5])).unwrap();
        let contributions = s
            .forward_with_contributions(&params, &RecurrentWindow::none())
            .unwrap();
        assert_eq!(
            s.set_input_relevance(&contributions),
            Err(LayerError::uninitialized("relevance"))
        );
    }
}
