//! Squared Distance Layer
//!
//! The squared norm of a learned low-rank projection of the input:
//!
//! ```text
//! bh = B · x                 B [rank, in]
//! y  = bhᵀ · bh              [1, 1]
//! ```
//!
//! The layer size is the rank of `B`; the output is always a single value.
//!
//! ```text
//! gbh = 2 · gy · bh
//! gB  = gbh ⊗ x
//! gx  = Bᵀ · gbh
//! ```

use super::parameters::{LayerParameters, ParamsContainer};
use super::structure::{BackwardContext, LayerHelper, LayerIo};
use super::window::RecurrentWindow;
use crate::arrays::ParamsArray;
use crate::error::{LayerError, Result};
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SquaredDistanceParameters {
    pub b: ParamsArray,
}

impl SquaredDistanceParameters {
    pub fn new(input_size: usize, rank: usize) -> Self {
        Self {
            b: ParamsArray::weights(rank, input_size, false),
        }
    }
}

impl ParamsContainer for SquaredDistanceParameters {
    fn params(&self) -> Vec<&ParamsArray> {
        vec![&self.b]
    }

    fn params_mut(&mut self) -> Vec<&mut ParamsArray> {
        vec![&mut self.b]
    }
}

#[derive(Debug, Default)]
pub struct SquaredDistanceState {
    /// `B · x` of the last forward
    projection: Option<Tensor>,
}

impl LayerHelper for SquaredDistanceState {
    fn forward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        _window: &RecurrentWindow,
    ) -> Result<()> {
        let p = params.squared_distance()?;
        let bh = p.b.dense()?.dot(io.input()?.as_dense()?);
        let y = Tensor::vector(vec![bh.data.iter().map(|v| v * v).sum()]);
        self.projection = Some(bh);
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
        let p = params.squared_distance()?;
        let gy = io.output_gradient()?;
        let bh = self
            .projection
            .as_ref()
            .ok_or(LayerError::uninitialized("projection"))?;

        let gbh = bh.prod_scalar(2.0 * gy.data[0]);
        let x = io.input()?.as_dense()?;
        grads.squared_distance_mut()?.b.set_values(gbh.outer(x))?;

        if ctx.propagate_to_input {
            let gx = p.b.dense()?.t().dot(&gbh);
            io.assign_input_errors(0, gx)?;
        }
        Ok(())
    }
}
