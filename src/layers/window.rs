//! Recurrent Context Window
//!
//! An unrolled sequence keeps one structure per timestep in a contiguous
//! arena (a `Vec`). A [`RecurrentWindow`] is a pair of shared borrows into that
//! arena, the timestep before and the timestep after the one being processed:
//!
//! ```text
//! arena:   [ t0 ][ t1 ][ t2 ][ t3 ]
//!                  ^     ^     ^
//!                prev  current next
//! ```
//!
//! The current structure is borrowed mutably at the same time, which
//! [`split_neighbors`] obtains with `split_at_mut`.

use super::structure::LayerStructure;
use crate::error::Result;
use crate::tensor::Tensor;

/// Read access to the same layer at the adjacent timesteps
#[derive(Clone, Copy, Default)]
pub struct RecurrentWindow<'a> {
    prev: Option<&'a LayerStructure>,
    next: Option<&'a LayerStructure>,
}

impl<'a> RecurrentWindow<'a> {
    pub fn new(prev: Option<&'a LayerStructure>, next: Option<&'a LayerStructure>) -> Self {
        Self { prev, next }
    }

    /// No adjacent timesteps (a feedforward layer or a one-step sequence)
    pub fn none() -> Self {
        Self::default()
    }

    pub fn prev_state_layer(&self) -> Option<&'a LayerStructure> {
        self.prev
    }

    pub fn next_state_layer(&self) -> Option<&'a LayerStructure> {
        self.next
    }

    /// Output of the previous timestep, if any
    pub fn prev_output(&self) -> Result<Option<&'a Tensor>> {
        self.prev
            .map(|layer| layer.output.dense_values())
            .transpose()
    }

    /// Errors the next timestep sends back to this timestep's output
    pub fn next_state_errors(&self) -> Option<&'a Tensor> {
        self.next.and_then(|layer| layer.prev_state_errors())
    }
}

/// Split an arena into `(previous, current, next)` around `index`
///
/// Returns `None` when `index` is out of bounds.
pub fn split_neighbors<T>(items: &mut [T], index: usize) -> Option<(Option<&T>, &mut T, Option<&T>)> {
    if index >= items.len() {
        return None;
    }
    let (before, rest) = items.split_at_mut(index);
    let (current, after) = rest.split_first_mut()?;
    Some((before.last(), current, after.first()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_neighbors() {
        let mut items = vec![1, 2, 3];

        let (prev, current, next) = split_neighbors(&mut items, 0).unwrap();
        assert_eq!(prev, None);
        *current += 10;
        assert_eq!(next, Some(&2));

        let (prev, current, next) = split_neighbors(&mut items, 2).unwrap();
        assert_eq!(prev, Some(&2));
        assert_eq!(*current, 3);
        assert_eq!(next, None);

        assert!(split_neighbors(&mut items, 3).is_none());
        assert_eq!(items[0], 11);
    }
}
