//! Items Pool
//!
//! Reuses heavy per-example objects (encoders, unrolled structures) instead
//! of building a new one for every example.
//!
//! ```text
//! get_item  ──► first free item, or a new one from the factory ──► PoolTicket
//! get / get_mut(&ticket)                                       ──► &item
//! release(ticket)                                              ──► item free again
//! ```
//!
//! A [`PoolTicket`] cannot be cloned, and releasing consumes it, so an item
//! has at most one borrower. Every ticket carries the id of the pool that
//! issued it and the generation of its slot. A slot's generation advances each
//! time the slot is freed. A ticket is only honored while both still match:
//! tickets invalidated by `release_all`, or issued by another pool, fail with
//! [`LayerError::ItemNotLent`] even after their slot is lent again.
//!
//! ```text
//! slot 0:  lent(gen 0) ──release──► free(gen 1) ──get_item──► lent(gen 1)
//!          ticket{pool, 0, gen 0} is stale from the release on
//! ```
//!
//! The pool has no internal locking.

use crate::error::{LayerError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(0);

/// Proof of borrowing one item of an [`ItemsPool`]
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an item stays lent until its ticket is released"]
pub struct PoolTicket {
    pool: usize,
    id: usize,
    generation: u64,
}

impl PoolTicket {
    /// Id of the lent item, stable for the lifetime of the pool
    pub fn id(&self) -> usize {
        self.id
    }
}

#[derive(Debug)]
struct Slot<T> {
    item: T,
    lent: bool,
    generation: u64,
}

impl<T> Slot<T> {
    fn free(&mut self) {
        if self.lent {
            self.lent = false;
            self.generation += 1;
        }
    }
}

/// A growable set of reusable items
#[derive(Debug)]
pub struct ItemsPool<T> {
    id: usize,
    slots: Vec<Slot<T>>,
}

impl<T> Default for ItemsPool<T> {
    fn default() -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            slots: Vec::new(),
        }
    }
}

impl<T> ItemsPool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lend a free item, building one with `factory(id)` if none is free
    pub fn get_item(&mut self, factory: impl FnOnce(usize) -> Result<T>) -> Result<PoolTicket> {
        let id = match self.slots.iter().position(|slot| !slot.lent) {
            Some(id) => id,
            None => {
                let id = self.slots.len();
                self.slots.push(Slot {
                    item: factory(id)?,
                    lent: false,
                    generation: 0,
                });
                id
            }
        };
        let slot = &mut self.slots[id];
        slot.lent = true;
        Ok(PoolTicket {
            pool: self.id,
            id,
            generation: slot.generation,
        })
    }

    fn lent_slot(&self, ticket: &PoolTicket) -> Result<usize> {
        let honored = ticket.pool == self.id
            && self
                .slots
                .get(ticket.id)
                .is_some_and(|slot| slot.lent && slot.generation == ticket.generation);
        if honored {
            Ok(ticket.id)
        } else {
            Err(LayerError::ItemNotLent(ticket.id))
        }
    }

    pub fn get(&self, ticket: &PoolTicket) -> Result<&T> {
        let id = self.lent_slot(ticket)?;
        Ok(&self.slots[id].item)
    }

    pub fn get_mut(&mut self, ticket: &PoolTicket) -> Result<&mut T> {
        let id = self.lent_slot(ticket)?;
        Ok(&mut self.slots[id].item)
    }

    /// Give an item back to the pool
    pub fn release(&mut self, ticket: PoolTicket) -> Result<()> {
        let id = self.lent_slot(&ticket)?;
        self.slots[id].free();
        Ok(())
    }

    /// Mark every item as free, invalidating all outstanding tickets
    pub fn release_all(&mut self) {
        self.slots.iter_mut().for_each(Slot::free);
    }

    /// Number of items built so far
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn lent_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.lent).count()
    }
}
