//! Slab of flow entries addressed by generation-checked handles.
//!
//! Every index and binding list stores [`FlowId`]s rather than references.
//! A handle to a freed slot never resolves, even after the slot is reused.

use crate::entry::FlowEntry;
use crate::error::{FlowError, Result};
use std::fmt;

/// Stable handle to a flow entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowId {
    index: u32,
    generation: u32,
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<FlowEntry>,
}

/// Largest number of slots a 32-bit handle index can address.
pub(crate) const MAX_SLOTS: usize = u32::MAX as usize;

/// Fixed-capacity storage for flow entries.
#[derive(Debug)]
pub struct FlowArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
    capacity: usize,
}

impl FlowArena {
    /// Creates an empty arena. `capacity` is clamped to `MAX_SLOTS`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            capacity: capacity.min(MAX_SLOTS),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stores `entry` and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::TableFull`] when the arena holds `capacity`
    /// entries. Nothing is stored in that case.
    pub fn insert(&mut self, entry: FlowEntry) -> Result<FlowId> {
        if self.len >= self.capacity {
            return Err(FlowError::TableFull {
                limit: self.capacity,
            });
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.slots.len()).map_err(|_| FlowError::TableFull {
                    limit: self.capacity,
                })?;
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                index
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.entry = Some(entry);
        self.len += 1;

        Ok(FlowId {
            index,
            generation: slot.generation,
        })
    }

    pub fn get(&self, id: FlowId) -> Option<&FlowEntry> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    pub fn get_mut(&mut self, id: FlowId) -> Option<&mut FlowEntry> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    /// Frees the slot of `id`, returning the entry it held.
    pub fn remove(&mut self, id: FlowId) -> Option<FlowEntry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }

        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(entry)
    }

    pub fn contains(&self, id: FlowId) -> bool {
        self.get(id).is_some()
    }
}
