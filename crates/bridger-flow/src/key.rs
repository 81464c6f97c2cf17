//! Flow identity and pending-flow notifications.

use bridger_types::{MacAddress, VlanTag};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a candidate flow as reported by the datapath.
///
/// Equality covers every field, including the metadata bits of `vlan`.
/// The derived order (ingress, source, destination, vlan) is total and
/// independent of in-memory representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    pub ifindex: u32,
    pub src: MacAddress,
    pub dest: MacAddress,
    pub vlan: VlanTag,
}

impl FlowKey {
    pub fn new(ifindex: u32, src: MacAddress, dest: MacAddress, vlan: VlanTag) -> Self {
        Self {
            ifindex,
            src,
            dest,
            vlan,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} @{} (ifindex {})",
            self.src, self.dest, self.vlan, self.ifindex
        )
    }
}

/// Unoffloaded traffic observed by the datapath.
///
/// Consumed synchronously by [`crate::FlowManager::admit_pending_flow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFlow {
    pub key: FlowKey,
    pub packets: u64,
}

impl PendingFlow {
    pub fn new(key: FlowKey, packets: u64) -> Self {
        Self { key, packets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(ifindex: u32, vlan: VlanTag) -> FlowKey {
        FlowKey::new(
            ifindex,
            "11:22:33:44:55:66".parse().unwrap(),
            "aa:bb:cc:dd:ee:ff".parse().unwrap(),
            vlan,
        )
    }

    #[test]
    fn test_equality_is_fieldwise() {
        let vlan = VlanTag::tagged(10).unwrap();
        assert_eq!(key(1, vlan), key(1, vlan));
        assert_ne!(key(1, vlan), key(2, vlan));
        assert_ne!(key(1, vlan), key(1, VlanTag::from_raw(10)));
    }

    #[test]
    fn test_order_is_total_over_fields() {
        let vlan = VlanTag::tagged(10).unwrap();
        assert!(key(1, vlan) < key(2, vlan));
        assert!(key(1, VlanTag::from_raw(10)) < key(1, vlan));

        let mut keys = vec![key(3, vlan), key(1, vlan), key(2, vlan)];
        keys.sort();
        assert_eq!(
            keys.iter().map(|k| k.ifindex).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_display_shows_vlan_id() {
        let k = key(7, VlanTag::from_raw(0x8000 | 0x2000 | 10));
        assert_eq!(
            k.to_string(),
            "11:22:33:44:55:66 -> aa:bb:cc:dd:ee:ff @10 (ifindex 7)"
        );
    }
}
