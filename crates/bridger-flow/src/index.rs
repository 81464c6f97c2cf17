//! Primary (by key) and ordering (by traffic rate) indices over flow handles.
//!
//! Neither index creates entries implicitly: lookups return `Option` and
//! every insertion is explicit, reporting whether the slot was already taken.

use crate::arena::FlowId;
use crate::key::FlowKey;
use std::collections::BTreeMap;

/// Unique-key index of admitted flows.
#[derive(Debug, Default)]
pub struct FlowIndex {
    inner: BTreeMap<FlowKey, FlowId>,
}

impl FlowIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get(&self, key: &FlowKey) -> Option<FlowId> {
        self.inner.get(key).copied()
    }

    /// Inserts `key`. Returns false, leaving the index untouched, if the key
    /// is already present.
    pub fn insert(&mut self, key: FlowKey, id: FlowId) -> bool {
        match self.inner.entry(key) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(id);
                true
            }
        }
    }

    pub fn remove(&mut self, key: &FlowKey) -> Option<FlowId> {
        self.inner.remove(key)
    }

    /// Handles in key order.
    pub fn ids(&self) -> impl Iterator<Item = FlowId> + '_ {
        self.inner.values().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlowKey, &FlowId)> {
        self.inner.iter()
    }
}

/// Sort position in the rate index: average first, key as tie-breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RateKey {
    pub average_packets: u64,
    pub key: FlowKey,
}

/// Ordering index of flows by smoothed packet rate.
///
/// Ties on `average_packets` are broken by [`FlowKey`] order, so the index
/// is a total order and every flow occupies exactly one position.
#[derive(Debug, Default)]
pub struct RateIndex {
    inner: BTreeMap<RateKey, FlowId>,
}

impl RateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn insert(&mut self, average_packets: u64, key: FlowKey, id: FlowId) -> bool {
        let rate = RateKey {
            average_packets,
            key,
        };
        match self.inner.entry(rate) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(id);
                true
            }
        }
    }

    pub fn remove(&mut self, average_packets: u64, key: FlowKey) -> Option<FlowId> {
        self.inner.remove(&RateKey {
            average_packets,
            key,
        })
    }

    pub fn contains(&self, average_packets: u64, key: FlowKey) -> bool {
        self.inner.contains_key(&RateKey {
            average_packets,
            key,
        })
    }

    /// Flows from coldest to hottest.
    pub fn ascending(&self) -> impl DoubleEndedIterator<Item = (&RateKey, &FlowId)> {
        self.inner.iter()
    }

    /// Flows from hottest to coldest.
    pub fn descending(&self) -> impl Iterator<Item = (&RateKey, &FlowId)> {
        self.inner.iter().rev()
    }
}
