//! Gradient Accumulation and Parameter Updates
//!
//! Training calls backward once per example, but updates the parameters once
//! per batch. In between, the gradients of every example are summed by a
//! [`ParamsAccumulator`]; [`ParamsOptimizer`] averages the sum, hands it to an
//! [`UpdateMethod`] and starts over.
//!
//! ## Cycle
//!
//! ```text
//! for example in batch:
//!     forward → backward → optimizer.accumulate(grads)
//! optimizer.update(&mut params)
//!     grads = Σ grads / n           average_errors
//!     clip(grads)                   only with a max gradient norm
//!     method.update(p, g)           for every parameter tensor
//!     reset                         the next accumulate starts from zero
//! ```
//!
//! ## Ownership
//!
//! The optimizer never holds the parameters it updates: they are passed to
//! [`ParamsOptimizer::update`], so the same parameters can be read by any
//! number of structures between two updates.
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut optimizer = ParamsOptimizer::new(MomentumMethod::new(0.01, 0.9));
//!
//! for batch in examples.chunks(8) {
//!     optimizer.new_batch();
//!     for example in batch {
//!         optimizer.new_example();
//!         let grads = learn(&params, example)?;
//!         optimizer.accumulate_owned(grads)?;
//!     }
//!     optimizer.update(&mut params)?;
//! }
//! ```

use crate::error::{LayerError, Result};
use crate::gradients::clip_gradients;
use crate::layers::ParamsContainer;
use crate::update_methods::UpdateMethod;
use log::{debug, warn};

/// Running sum of the gradients of a parameter container
#[derive(Clone, Debug)]
pub struct ParamsAccumulator<P> {
    errors: Option<P>,
    count: usize,
}

impl<P> Default for ParamsAccumulator<P> {
    fn default() -> Self {
        Self {
            errors: None,
            count: 0,
        }
    }
}

impl<P: ParamsContainer + Clone> ParamsAccumulator<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of containers accumulated since the last reset
    pub fn count(&self) -> usize {
        self.count
    }

    /// Add a copy of `errors` to the sum
    pub fn accumulate(&mut self, errors: &P) -> Result<()> {
        match self.errors.as_mut() {
            Some(sum) => add_into(sum, errors)?,
            None => self.errors = Some(errors.copy()),
        }
        self.count += 1;
        Ok(())
    }

    /// Add `errors` to the sum, taking it over as the sum when empty
    pub fn accumulate_owned(&mut self, errors: P) -> Result<()> {
        match self.errors.as_mut() {
            Some(sum) => add_into(sum, &errors)?,
            None => self.errors = Some(errors),
        }
        self.count += 1;
        Ok(())
    }

    /// Divide the sum by the number of accumulated containers
    ///
    /// Afterwards the accumulator counts as holding one (the average).
    pub fn average_errors(&mut self) {
        if self.count > 1 {
            if let Some(sum) = self.errors.as_mut() {
                let n = self.count as f64;
                for p in sum.params_mut() {
                    p.div_scalar(n);
                }
            }
            self.count = 1;
        }
    }

    /// The accumulated errors, if any
    pub fn errors(&self) -> Option<&P> {
        self.errors.as_ref()
    }

    pub fn errors_mut(&mut self) -> Option<&mut P> {
        self.errors.as_mut()
    }

    /// Take the accumulated errors out, leaving the accumulator empty
    pub fn take(&mut self) -> Option<P> {
        self.count = 0;
        self.errors.take()
    }

    pub fn reset(&mut self) {
        self.errors = None;
        self.count = 0;
    }
}

fn add_into<P: ParamsContainer>(sum: &mut P, errors: &P) -> Result<()> {
    let theirs = errors.params();
    let mut mine = sum.params_mut();
    if mine.len() != theirs.len() {
        return Err(LayerError::shape_mismatch(&[mine.len()], &[theirs.len()]));
    }
    for (a, b) in mine.iter_mut().zip(theirs) {
        a.accumulate(b.values())?;
    }
    Ok(())
}

/// Drives an update method over the accumulated gradients of a container
#[derive(Clone, Debug)]
pub struct ParamsOptimizer<P, M> {
    pub method: M,
    /// Clip the averaged gradients to this L2 norm before updating
    pub max_grad_norm: Option<f64>,
    accumulator: ParamsAccumulator<P>,
}

impl<P: ParamsContainer + Clone, M: UpdateMethod> ParamsOptimizer<P, M> {
    pub fn new(method: M) -> Self {
        Self {
            method,
            max_grad_norm: None,
            accumulator: ParamsAccumulator::new(),
        }
    }

    pub fn with_max_grad_norm(mut self, max_norm: f64) -> Self {
        self.max_grad_norm = Some(max_norm);
        self
    }

    pub fn new_epoch(&mut self) {
        self.method.new_epoch();
    }

    pub fn new_batch(&mut self) {
        self.method.new_batch();
    }

    pub fn new_example(&mut self) {
        self.method.new_example();
    }

    pub fn accumulate(&mut self, errors: &P) -> Result<()> {
        self.accumulator.accumulate(errors)
    }

    pub fn accumulate_owned(&mut self, errors: P) -> Result<()> {
        self.accumulator.accumulate_owned(errors)
    }

    pub fn accumulator(&self) -> &ParamsAccumulator<P> {
        &self.accumulator
    }

    /// Average the accumulated gradients, update `params` and reset
    ///
    /// With nothing accumulated the parameters are left unchanged.
    pub fn update(&mut self, params: &mut P) -> Result<()> {
        if self.accumulator.is_empty() {
            warn!("{} update called with no accumulated gradients", self.method.name());
            return Ok(());
        }
        let examples = self.accumulator.count();
        self.accumulator.average_errors();

        let result = match self.accumulator.errors_mut() {
            Some(errors) => {
                if let Some(max_norm) = self.max_grad_norm {
                    let norm = clip_gradients(errors, max_norm);
                    if norm > max_norm {
                        debug!("clipped gradient norm {:.4} to {:.4}", norm, max_norm);
                    }
                }
                apply(&self.method, params, errors)
            }
            None => Ok(()),
        };
        self.accumulator.reset();
        result?;

        debug!(
            "{} update over {} accumulated examples",
            self.method.name(),
            examples
        );
        Ok(())
    }
}

fn apply<P: ParamsContainer, M: UpdateMethod>(method: &M, params: &mut P, errors: &P) -> Result<()> {
    let grads = errors.params();
    let mut targets = params.params_mut();
    if targets.len() != grads.len() {
        return Err(LayerError::shape_mismatch(&[targets.len()], &[grads.len()]));
    }
    for (p, g) in targets.iter_mut().zip(grads) {
        method.update(p, g.values())?;
    }
    Ok(())
}
