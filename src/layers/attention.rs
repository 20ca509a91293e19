//! Scaled Dot-Product Attention
//!
//! Every element of an input sequence attends to every other element. The
//! input is a matrix with one row per element.
//!
//! ## Forward Pass
//!
//! ```text
//! Q, K, V = I · Wq + bq, I · Wk + bk, I · Wv + bv
//! S = (Q · Kᵀ) / √d_k
//! A = softmax(S)                               (row by row)
//! Y = A · V
//! ```
//!
//! There is no causal mask: row `i` of `A` spans the whole sequence. An
//! activation configured on the layer applies element-wise to `Y`.
//!
//! ## Backward Pass
//!
//! ```text
//! gV = Aᵀ · gY
//! gA = gY · Vᵀ
//! gS = A ⊙ (gA - rowsum(gA ⊙ A)) / √d_k        (softmax couples each row)
//! gQ = gS · K
//! gK = gSᵀ · Q
//! gI = gQ · Wqᵀ + gK · Wkᵀ + gV · Wvᵀ
//! ```
//!
//! meProp does not apply here: the input errors are always complete.

use super::linear::RowProjection;
use super::parameters::{LayerParameters, ParamsContainer};
use super::structure::{BackwardContext, LayerHelper, LayerIo};
use super::window::RecurrentWindow;
use crate::arrays::ParamsArray;
use crate::error::{LayerError, Result};
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttentionParameters {
    pub queries: RowProjection,
    pub keys: RowProjection,
    pub values: RowProjection,
}

impl AttentionParameters {
    /// Projections from rows of `input_size` to rows of `attention_size`
    pub fn new(input_size: usize, attention_size: usize) -> Self {
        Self {
            queries: RowProjection::new(input_size, attention_size),
            keys: RowProjection::new(input_size, attention_size),
            values: RowProjection::new(input_size, attention_size),
        }
    }

    fn scale(&self) -> f64 {
        (self.queries.weights.shape()[1] as f64).sqrt()
    }
}

impl ParamsContainer for AttentionParameters {
    fn params(&self) -> Vec<&ParamsArray> {
        let mut params = self.queries.params();
        params.extend(self.keys.params());
        params.extend(self.values.params());
        params
    }

    fn params_mut(&mut self) -> Vec<&mut ParamsArray> {
        let mut params = self.queries.params_mut();
        params.extend(self.keys.params_mut());
        params.extend(self.values.params_mut());
        params
    }
}

/// Projections and attention scores of the last forward
#[derive(Debug, Default)]
pub struct AttentionState {
    pub queries: Option<Tensor>,
    pub keys: Option<Tensor>,
    pub values: Option<Tensor>,
    /// Softmax of the scaled scores, `[seq_len, seq_len]`
    pub attention: Option<Tensor>,
}

fn cached<'a>(t: &'a Option<Tensor>, field: &'static str) -> Result<&'a Tensor> {
    t.as_ref().ok_or(LayerError::uninitialized(field))
}

impl LayerHelper for AttentionState {
    fn forward(
        &mut self,
        io: &mut LayerIo,
        params: &LayerParameters,
        _window: &RecurrentWindow,
    ) -> Result<()> {
        let p = params.attention()?;
        let input = io.input()?.as_dense()?;

        let q = p.queries.forward(input)?;
        let k = p.keys.forward(input)?;
        let v = p.values.forward(input)?;

        let scores = q.dot(&k.t()).div_scalar(p.scale());
        let attention = scores.softmax_rows();
        let y = attention.dot(&v);

        self.queries = Some(q);
        self.keys = Some(k);
        self.values = Some(v);
        self.attention = Some(attention);
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
        let p = params.attention()?;
        let gy = io.output_gradient()?;
        let q = cached(&self.queries, "queries")?;
        let k = cached(&self.keys, "keys")?;
        let v = cached(&self.values, "values")?;
        let a = cached(&self.attention, "attention")?;

        let gv = a.t().dot(&gy);
        let ga = gy.dot(&v.t());

        let seq_len = a.rows();
        let scale = p.scale();
        let mut gs = Tensor::zeros(seq_len, seq_len);
        for i in 0..seq_len {
            let row_dot: f64 = (0..seq_len).map(|j| ga.get(i, j) * a.get(i, j)).sum();
            for j in 0..seq_len {
                gs.set(i, j, a.get(i, j) * (ga.get(i, j) - row_dot) / scale);
            }
        }

        let gq = gs.dot(k);
        let gk = gs.t().dot(q);

        let input = io.input()?.as_dense()?;
        let g = grads.attention_mut()?;
        RowProjection::assign_grads(&mut g.queries, &gq, input)?;
        RowProjection::assign_grads(&mut g.keys, &gk, input)?;
        RowProjection::assign_grads(&mut g.values, &gv, input)?;

        if ctx.propagate_to_input {
            let mut gx = p.queries.input_errors(&gq)?;
            gx.assign_add(&p.keys.input_errors(&gk)?);
            gx.assign_add(&p.values.input_errors(&gv)?);
            io.assign_input_errors(0, gx)?;
        }
        Ok(())
    }
}
