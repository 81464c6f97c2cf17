//! In-memory device registry, forwarding database and datapath.
//!
//! These back the daemon's simulation mode and the tests. The datapath keeps
//! per-flow packet counters that callers feed with [`SoftDatapath::account`]
//! and folds them into the moving average exactly like the fast-path
//! program does.

use crate::collaborators::{Datapath, Device, DeviceRegistry, FdbEntry, FdbId, FdbStore};
use crate::entry::{FlowCounters, FlowEntry, OffloadDescriptor};
use crate::error::Result;
use crate::ewma;
use crate::key::FlowKey;
use bridger_types::{MacAddress, VlanTag};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// A device description, also the `[[topology.device]]` config table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimDevice {
    pub ifindex: u32,
    pub name: String,
    pub addr: MacAddress,
    #[serde(default)]
    pub master: Option<u32>,
    #[serde(default)]
    pub bridge: bool,
    /// Ingress VLAN ID translations as `[from, to]` pairs
    #[serde(default)]
    pub input_vlan_map: Vec<(u16, u16)>,
    /// Egress VLAN ID translations as `[from, to]` pairs
    #[serde(default)]
    pub output_vlan_map: Vec<(u16, u16)>,
}

impl SimDevice {
    pub fn bridge(ifindex: u32, name: &str, addr: MacAddress) -> Self {
        Self {
            ifindex,
            name: name.to_string(),
            addr,
            master: None,
            bridge: true,
            input_vlan_map: Vec::new(),
            output_vlan_map: Vec::new(),
        }
    }

    pub fn port(ifindex: u32, name: &str, addr: MacAddress, master: u32) -> Self {
        Self {
            bridge: false,
            master: Some(master),
            ..Self::bridge(ifindex, name, addr)
        }
    }

    pub fn with_master(mut self, master: u32) -> Self {
        self.master = Some(master);
        self
    }

    pub fn with_input_vlan(mut self, from: u16, to: u16) -> Self {
        self.input_vlan_map.push((from, to));
        self
    }

    pub fn with_output_vlan(mut self, from: u16, to: u16) -> Self {
        self.output_vlan_map.push((from, to));
        self
    }

    fn translate(map: &[(u16, u16)], vlan: VlanTag) -> VlanTag {
        map.iter()
            .find(|(from, _)| *from == vlan.id())
            .map(|(_, to)| vlan.with_id(*to))
            .unwrap_or(vlan)
    }
}

impl Device for SimDevice {
    fn ifindex(&self) -> u32 {
        self.ifindex
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn addr(&self) -> MacAddress {
        self.addr
    }

    fn master(&self) -> Option<u32> {
        self.master
    }

    fn is_bridge(&self) -> bool {
        self.bridge
    }

    fn translate_input_vlan(&self, vlan: VlanTag) -> VlanTag {
        Self::translate(&self.input_vlan_map, vlan)
    }

    fn translate_output_vlan(&self, vlan: VlanTag) -> VlanTag {
        Self::translate(&self.output_vlan_map, vlan)
    }
}

/// Static device registry.
#[derive(Debug, Default, Clone)]
pub struct SimDevices {
    devices: BTreeMap<u32, SimDevice>,
}

impl SimDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, device: SimDevice) -> Self {
        self.devices.insert(device.ifindex, device);
        self
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl FromIterator<SimDevice> for SimDevices {
    fn from_iter<I: IntoIterator<Item = SimDevice>>(iter: I) -> Self {
        Self {
            devices: iter.into_iter().map(|d| (d.ifindex, d)).collect(),
        }
    }
}

impl DeviceRegistry for SimDevices {
    fn resolve_device(&self, ifindex: u32) -> Option<&dyn Device> {
        self.devices.get(&ifindex).map(|d| d as &dyn Device)
    }
}

/// A learned address, also the `[[topology.fdb]]` config table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimFdbEntry {
    pub bridge: u32,
    pub addr: MacAddress,
    #[serde(default)]
    pub vlan: u16,
    pub device: u32,
}

type FdbKey = (u32, MacAddress, u16);

#[derive(Debug, Default)]
struct FdbTable {
    by_key: HashMap<FdbKey, FdbId>,
    by_id: HashMap<FdbId, FdbEntry>,
    next_id: u64,
}

/// Mutable forwarding database keyed by bridge, address and VLAN ID.
///
/// Only the VLAN ID subfield takes part in lookups.
#[derive(Debug, Default)]
pub struct SimFdb {
    table: RwLock<FdbTable>,
}

impl SimFdb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a SimFdbEntry>) -> Self {
        let fdb = Self::new();
        for e in entries {
            fdb.learn(e.bridge, e.addr, e.vlan, e.device);
        }
        fdb
    }

    /// Learns `addr` behind `device`. An existing entry keeps its identifier
    /// and moves to the new device.
    pub fn learn(&self, bridge: u32, addr: MacAddress, vlan: u16, device: u32) -> FdbId {
        let mut table = self.table.write();
        let key = (bridge, addr, vlan & VlanTag::ID_MASK);

        if let Some(id) = table.by_key.get(&key).copied() {
            table.by_id.insert(id, FdbEntry { id, device });
            return id;
        }

        table.next_id += 1;
        let id = FdbId(table.next_id);
        table.by_key.insert(key, id);
        table.by_id.insert(id, FdbEntry { id, device });
        debug!(%addr, vlan, device, %id, "Learned address");
        id
    }

    /// Forgets `addr`, returning the identifier it had.
    pub fn forget(&self, bridge: u32, addr: MacAddress, vlan: u16) -> Option<FdbId> {
        let mut table = self.table.write();
        let id = table.by_key.remove(&(bridge, addr, vlan & VlanTag::ID_MASK))?;
        table.by_id.remove(&id);
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.table.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FdbStore for SimFdb {
    fn lookup_fdb(&self, bridge: u32, addr: MacAddress, vlan: VlanTag) -> Option<FdbEntry> {
        let table = self.table.read();
        let id = table.by_key.get(&(bridge, addr, vlan.id()))?;
        table.by_id.get(id).copied()
    }

    fn get_fdb(&self, id: FdbId) -> Option<FdbEntry> {
        self.table.read().by_id.get(&id).copied()
    }
}

/// Static topology for simulation mode, the `[topology]` config table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TopologyConfig {
    #[serde(default)]
    pub device: Vec<SimDevice>,
    #[serde(default)]
    pub fdb: Vec<SimFdbEntry>,
}

impl TopologyConfig {
    /// Builds the registry and forwarding database described here.
    pub fn build(&self) -> (SimDevices, SimFdb) {
        let devices = self.device.iter().cloned().collect();
        (devices, SimFdb::from_entries(&self.fdb))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SoftProgram {
    offload: OffloadDescriptor,
    packets: u64,
    last_packets: u64,
}

/// Datapath that keeps offload programs and counters in memory.
#[derive(Debug, Default)]
pub struct SoftDatapath {
    programs: Mutex<HashMap<FlowKey, SoftProgram>>,
}

impl SoftDatapath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts `packets` forwarded through the program for `key`. Returns
    /// false if no program is installed.
    pub fn account(&self, key: &FlowKey, packets: u64) -> bool {
        match self.programs.lock().get_mut(key) {
            Some(program) => {
                program.packets += packets;
                true
            }
            None => false,
        }
    }

    pub fn installed(&self, key: &FlowKey) -> Option<OffloadDescriptor> {
        self.programs.lock().get(key).map(|p| p.offload)
    }

    pub fn len(&self) -> usize {
        self.programs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Datapath for SoftDatapath {
    fn install_or_refresh(&self, flow: &FlowEntry) -> Result<()> {
        let mut programs = self.programs.lock();
        let program = programs.entry(*flow.key()).or_default();
        program.offload = *flow.offload();
        Ok(())
    }

    fn remove(&self, flow: &FlowEntry) {
        self.programs.lock().remove(flow.key());
    }

    fn refresh_counters(&self, flow: &FlowEntry) -> FlowCounters {
        let mut programs = self.programs.lock();
        let Some(program) = programs.get_mut(flow.key()) else {
            return flow.counters();
        };

        let delta = program.packets - program.last_packets;
        program.last_packets = program.packets;

        FlowCounters {
            current_packets: program.packets,
            average_packets: ewma::ewma_update(flow.average_packets(), delta),
        }
    }
}
