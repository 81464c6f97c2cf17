//! Contracts for the subsystems the flow manager consumes.
//!
//! The device registry, the bridge forwarding database and the datapath
//! program are owned elsewhere. The flow manager reaches them only through
//! these traits, which keeps it testable and lets the daemon plug in either
//! the kernel-backed implementations or the in-memory ones from
//! [`crate::sim`].

use crate::entry::{FlowCounters, FlowEntry};
use crate::error::Result;
use bridger_types::{MacAddress, VlanTag};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an FDB entry in the bridge subsystem's own store.
///
/// Flow entries hold this instead of a reference, so the lifetime of the
/// FDB entry is never assumed by the flow manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FdbId(pub u64);

impl fmt::Display for FdbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fdb#{}", self.0)
    }
}

/// A resolved forwarding database entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdbEntry {
    pub id: FdbId,
    /// Interface index of the device the address was learned behind
    pub device: u32,
}

/// A network device known to the registry.
pub trait Device {
    /// Interface index
    fn ifindex(&self) -> u32;

    /// Interface name, used for diagnostics only
    fn name(&self) -> &str;

    /// Hardware address
    fn addr(&self) -> MacAddress;

    /// Interface index of the master device, if enslaved
    fn master(&self) -> Option<u32>;

    /// Returns true if this device is itself a bridge.
    fn is_bridge(&self) -> bool;

    /// Maps a VLAN seen on ingress to the bridge-internal VLAN.
    fn translate_input_vlan(&self, vlan: VlanTag) -> VlanTag;

    /// Maps a bridge-internal VLAN to the VLAN to emit on this device.
    fn translate_output_vlan(&self, vlan: VlanTag) -> VlanTag;
}

/// Device lookup by interface index.
pub trait DeviceRegistry: Send + Sync {
    fn resolve_device(&self, ifindex: u32) -> Option<&dyn Device>;

    /// Returns the device name, or `"(unknown)"` for diagnostics.
    fn device_name(&self, ifindex: u32) -> String {
        self.resolve_device(ifindex)
            .map(|dev| dev.name().to_string())
            .unwrap_or_else(|| "(unknown)".to_string())
    }
}

/// Read access to the bridge forwarding database.
pub trait FdbStore: Send + Sync {
    /// Looks up `(addr, vlan)` within the bridge domain of `bridge`.
    fn lookup_fdb(&self, bridge: u32, addr: MacAddress, vlan: VlanTag) -> Option<FdbEntry>;

    /// Resolves an entry previously returned by [`FdbStore::lookup_fdb`].
    fn get_fdb(&self, id: FdbId) -> Option<FdbEntry>;
}

/// The fast-path program holding offload entries.
pub trait Datapath: Send + Sync {
    /// Installs or refreshes the offload program for `flow`.
    fn install_or_refresh(&self, flow: &FlowEntry) -> Result<()>;

    /// Removes the offload program for `flow`. Failures are not reported.
    fn remove(&self, flow: &FlowEntry);

    /// Reads the counters of `flow` and returns the updated cumulative
    /// packet count and smoothed average (see [`crate::ewma`]).
    fn refresh_counters(&self, flow: &FlowEntry) -> FlowCounters;
}
