//! Offloaded flow records.

use crate::collaborators::FdbId;
use crate::ewma;
use crate::key::FlowKey;
use bridger_types::{MacAddress, VlanTag};
use serde::Serialize;

/// The forwarding decision programmed into the datapath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct OffloadDescriptor {
    /// Interface index packets are redirected to
    pub target_port: u32,
    /// VLAN to emit on the target port
    pub vlan: VlanTag,
}

/// Counters reported by the datapath for one flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowCounters {
    /// Cumulative packet count
    pub current_packets: u64,
    /// Fixed-point moving average, scaled by `1 << EWMA_SHIFT`
    pub average_packets: u64,
}

/// An admitted, offloaded flow.
///
/// Owned by the [`crate::FlowManager`]; bindings are FDB identifiers, not
/// references into the bridge subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowEntry {
    pub(crate) key: FlowKey,
    pub(crate) ingress: FdbId,
    pub(crate) egress: FdbId,
    pub(crate) offload: OffloadDescriptor,
    pub(crate) counters: FlowCounters,
}

impl FlowEntry {
    pub(crate) fn new(key: FlowKey, ingress: FdbId, egress: FdbId) -> Self {
        Self {
            key,
            ingress,
            egress,
            offload: OffloadDescriptor::default(),
            counters: FlowCounters::default(),
        }
    }

    pub fn key(&self) -> &FlowKey {
        &self.key
    }

    /// FDB entry resolved for the source address.
    pub fn ingress_binding(&self) -> FdbId {
        self.ingress
    }

    /// FDB entry resolved for the destination address.
    pub fn egress_binding(&self) -> FdbId {
        self.egress
    }

    pub fn offload(&self) -> &OffloadDescriptor {
        &self.offload
    }

    pub fn counters(&self) -> FlowCounters {
        self.counters
    }

    pub fn current_packets(&self) -> u64 {
        self.counters.current_packets
    }

    pub fn average_packets(&self) -> u64 {
        self.counters.average_packets
    }

    /// Smoothed packets per maintenance interval.
    pub fn packets_per_interval(&self) -> u64 {
        ewma::packets_per_interval(self.counters.average_packets)
    }

    pub fn summary(&self) -> FlowSummary {
        FlowSummary {
            ifindex: self.key.ifindex,
            src: self.key.src,
            dest: self.key.dest,
            vlan: self.key.vlan.id(),
            target_port: self.offload.target_port,
            output_vlan: self.offload.vlan.id(),
            current_packets: self.counters.current_packets,
            packets_per_interval: self.packets_per_interval(),
        }
    }
}

/// Serializable snapshot of a flow for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowSummary {
    pub ifindex: u32,
    pub src: MacAddress,
    pub dest: MacAddress,
    pub vlan: u16,
    pub target_port: u32,
    pub output_vlan: u16,
    pub current_packets: u64,
    pub packets_per_interval: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_entry_starts_cold() {
        let key = FlowKey::new(
            1,
            MacAddress::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]),
            MacAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]),
            VlanTag::tagged(10).unwrap(),
        );
        let entry = FlowEntry::new(key, FdbId(1), FdbId(2));

        assert_eq!(entry.key(), &key);
        assert_eq!(entry.average_packets(), 0);
        assert_eq!(entry.current_packets(), 0);
        assert_eq!(entry.ingress_binding(), FdbId(1));
        assert_eq!(entry.egress_binding(), FdbId(2));
    }

    #[test]
    fn test_summary_serializes_addresses_as_strings() {
        let key = FlowKey::new(
            3,
            MacAddress::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]),
            MacAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]),
            VlanTag::tagged(10).unwrap(),
        );
        let mut entry = FlowEntry::new(key, FdbId(1), FdbId(2));
        entry.counters = FlowCounters {
            current_packets: 40,
            average_packets: 5 << ewma::EWMA_SHIFT,
        };

        let json = serde_json::to_value(entry.summary()).unwrap();
        assert_eq!(json["src"], "11:22:33:44:55:66");
        assert_eq!(json["vlan"], 10);
        assert_eq!(json["packets_per_interval"], 5);
    }
}
