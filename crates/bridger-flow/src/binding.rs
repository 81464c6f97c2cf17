//! Back-references from FDB entries to the flows anchored on them.
//!
//! When the bridge subsystem reports an FDB entry as changed or gone, these
//! lists give the flows to invalidate without scanning the whole table.

use crate::arena::FlowId;
use crate::collaborators::FdbId;
use std::collections::{BTreeSet, HashMap};

/// Flows referencing one FDB entry.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FdbBindings {
    /// Flows whose source address resolved to this entry
    pub as_source: BTreeSet<FlowId>,
    /// Flows whose destination address resolved to this entry
    pub as_destination: BTreeSet<FlowId>,
}

impl FdbBindings {
    fn is_empty(&self) -> bool {
        self.as_source.is_empty() && self.as_destination.is_empty()
    }
}

/// Binding lists for every FDB entry that anchors at least one flow.
#[derive(Debug, Default)]
pub struct BindingTable {
    lists: HashMap<FdbId, FdbBindings>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Links `flow` into the source list of `ingress` and the destination
    /// list of `egress`.
    pub fn attach(&mut self, flow: FlowId, ingress: FdbId, egress: FdbId) {
        self.lists
            .entry(ingress)
            .or_default()
            .as_source
            .insert(flow);
        self.lists
            .entry(egress)
            .or_default()
            .as_destination
            .insert(flow);
    }

    /// Unlinks `flow` from both lists. Returns false if either link was
    /// missing.
    pub fn detach(&mut self, flow: FlowId, ingress: FdbId, egress: FdbId) -> bool {
        let from_source = self.unlink(ingress, |b| b.as_source.remove(&flow));
        let from_destination = self.unlink(egress, |b| b.as_destination.remove(&flow));
        from_source && from_destination
    }

    fn unlink<F>(&mut self, fdb: FdbId, f: F) -> bool
    where
        F: FnOnce(&mut FdbBindings) -> bool,
    {
        let Some(bindings) = self.lists.get_mut(&fdb) else {
            return false;
        };
        let removed = f(bindings);
        if bindings.is_empty() {
            self.lists.remove(&fdb);
        }
        removed
    }

    pub fn get(&self, fdb: FdbId) -> Option<&FdbBindings> {
        self.lists.get(&fdb)
    }

    pub fn is_source_of(&self, fdb: FdbId, flow: FlowId) -> bool {
        self.lists
            .get(&fdb)
            .is_some_and(|b| b.as_source.contains(&flow))
    }

    pub fn is_destination_of(&self, fdb: FdbId, flow: FlowId) -> bool {
        self.lists
            .get(&fdb)
            .is_some_and(|b| b.as_destination.contains(&flow))
    }

    /// Every flow anchored on `fdb`, in either direction, without duplicates.
    pub fn flows_using(&self, fdb: FdbId) -> Vec<FlowId> {
        match self.lists.get(&fdb) {
            Some(b) => b.as_source.union(&b.as_destination).copied().collect(),
            None => Vec::new(),
        }
    }

    /// Total number of links held, counting each direction separately.
    pub fn link_count(&self) -> usize {
        self.lists
            .values()
            .map(|b| b.as_source.len() + b.as_destination.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::FlowArena;
    use crate::entry::FlowEntry;
    use crate::key::FlowKey;
    use bridger_types::{MacAddress, VlanTag};
    use pretty_assertions::assert_eq;

    fn ids(n: usize) -> Vec<FlowId> {
        let mut arena = FlowArena::with_capacity(n);
        (0..n)
            .map(|i| {
                let key = FlowKey::new(
                    i as u32,
                    MacAddress::new([0, 0, 0, 0, 0, 1]),
                    MacAddress::new([0, 0, 0, 0, 0, 2]),
                    VlanTag::UNTAGGED,
                );
                arena.insert(FlowEntry::new(key, FdbId(0), FdbId(0))).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_attach_and_detach() {
        let ids = ids(1);
        let mut table = BindingTable::new();
        table.attach(ids[0], FdbId(1), FdbId(2));

        assert!(table.is_source_of(FdbId(1), ids[0]));
        assert!(table.is_destination_of(FdbId(2), ids[0]));
        assert!(!table.is_source_of(FdbId(2), ids[0]));
        assert_eq!(table.link_count(), 2);

        assert!(table.detach(ids[0], FdbId(1), FdbId(2)));
        assert_eq!(table.link_count(), 0);
        assert!(table.get(FdbId(1)).is_none());
        assert!(table.get(FdbId(2)).is_none());
        assert!(!table.detach(ids[0], FdbId(1), FdbId(2)));
    }

    #[test]
    fn test_flows_using_merges_directions() {
        let ids = ids(3);
        let mut table = BindingTable::new();
        table.attach(ids[0], FdbId(1), FdbId(2));
        table.attach(ids[1], FdbId(2), FdbId(1));
        table.attach(ids[2], FdbId(3), FdbId(4));

        let mut using = table.flows_using(FdbId(1));
        using.sort();
        assert_eq!(using, vec![ids[0], ids[1]]);
        assert!(table.flows_using(FdbId(9)).is_empty());
    }

    #[test]
    fn test_list_is_kept_while_other_direction_remains() {
        let ids = ids(2);
        let mut table = BindingTable::new();
        table.attach(ids[0], FdbId(1), FdbId(2));
        table.attach(ids[1], FdbId(2), FdbId(3));

        table.detach(ids[0], FdbId(1), FdbId(2));
        let bindings = table.get(FdbId(2)).unwrap();
        assert!(bindings.as_destination.is_empty());
        assert!(bindings.as_source.contains(&ids[1]));
    }
}
