//! Biaffine Merge Layer
//!
//! Combines two dense inputs with one bilinear form per output unit plus an
//! affine term for each input:
//!
//! ```text
//! y[k] = f(x2ᵀ · Wk · x1 + (W1 · x1)[k] + (W2 · x2)[k] + b[k])
//! ```
//!
//! `Wk` is `[in2, in1]`. With `g = gy ⊙ f'`:
//!
//! ```text
//! gWk = g[k] · (x2 ⊗ x1)
//! gx1 = W1ᵀ · g + Σ_k g[k] · Wkᵀ · x2
//! gx2 = W2ᵀ · g + Σ_k g[k] · Wk · x1
//! ```

use super::parameters::{LayerParameters, ParamsContainer};
use super::structure::{BackwardContext, LayerHelper, LayerIo};
use super::window::RecurrentWindow;
use crate::arrays::ParamsArray;
use crate::error::Result;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BiaffineParameters {
    pub w1: ParamsArray,
    pub w2: ParamsArray,
    pub biases: ParamsArray,
    /// One `[in2, in1]` matrix per output unit
    pub w: Vec<ParamsArray>,
}

impl BiaffineParameters {
    pub fn new(input1_size: usize, input2_size: usize, output_size: usize) -> Self {
        Self {
            w1: ParamsArray::weights(output_size, input1_size, false),
            w2: ParamsArray::weights(output_size, input2_size, false),
            biases: ParamsArray::biases(output_size),
            w: (0..output_size)
                .map(|_| ParamsArray::weights(input2_size, input1_size, false))
                .collect(),
        }
    }
}

impl ParamsContainer for BiaffineParameters {
    fn params(&self) -> Vec<&ParamsArray> {
        let mut params = vec![&self.w1, &self.w2, &self.biases];
        params.extend(self.w.iter());
        params
    }

    fn params_mut(&mut self) -> Vec<&mut ParamsArray> {
        let mut params = vec![&mut self.w1, &mut self.w2, &mut self.biases];
        params.extend(self.w.iter_mut());
        params
    }
}

#[derive(Debug, Default)]
pub struct BiaffineState;

impl LayerHelper for BiaffineState {
    fn forward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        _window: &RecurrentWindow,
    ) -> Result<()> {
        let p = params.biaffine()?;
        let x1 = io.input_at(0)?.as_dense()?;
        let x2 = io.input_at(1)?.as_dense()?;

        let mut z = p.w1.dense()?.dot(x1);
        z.assign_add(&p.w2.dense()?.dot(x2))
            .assign_add(p.biases.dense()?);
        for (k, wk) in p.w.iter().enumerate() {
            z.data[k] += x2.t().dot(&wk.dense()?.dot(x1)).data[0];
        }
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
        let p = params.biaffine()?;
        let g = io.output_gradient()?;
        let x1 = io.input_at(0)?.as_dense()?.clone();
        let x2 = io.input_at(1)?.as_dense()?.clone();

        let gp = grads.biaffine_mut()?;
        gp.w1.set_values(g.outer(&x1))?;
        gp.w2.set_values(g.outer(&x2))?;
        gp.biases.set_values(g.clone())?;
        let x2_x1 = x2.outer(&x1);
        for (k, gwk) in gp.w.iter_mut().enumerate() {
            gwk.set_values(x2_x1.prod_scalar(g.data[k]))?;
        }

        if ctx.propagate_to_input {
            let g = ctx.restrict(&g);
            let mut gx1 = p.w1.dense()?.t().dot(&g);
            let mut gx2 = p.w2.dense()?.t().dot(&g);
            for (k, wk) in p.w.iter().enumerate() {
                if g.data[k] == 0.0 {
                    continue;
                }
                let wk = wk.dense()?;
                gx1.assign_add(&wk.t().dot(&x2).prod_scalar(g.data[k]));
                gx2.assign_add(&wk.dot(&x1).prod_scalar(g.data[k]));
            }
            io.assign_input_errors(0, gx1)?;
            io.assign_input_errors(1, gx2)?;
        }
        Ok(())
    }
}
