//! FlowManager - admission, indexing and maintenance of offloaded flows.
//!
//! Every admitted flow lives in one arena slot and is referenced by handle
//! from four places: the primary index (by key), the rate index (by smoothed
//! packet rate), the source list of its ingress FDB entry and the
//! destination list of its egress FDB entry. All mutation happens through
//! `&mut self`, so a single owner (see [`crate::FlowScheduler`]) serializes
//! intake and maintenance.

use crate::arena::{FlowArena, FlowId};
use crate::binding::{BindingTable, FdbBindings};
use crate::collaborators::{Datapath, DeviceRegistry, FdbEntry, FdbId, FdbStore};
use crate::config::FlowManagerConfig;
use crate::entry::{FlowEntry, FlowSummary, OffloadDescriptor};
use crate::error::Result;
use crate::ewma;
use crate::index::{FlowIndex, RateIndex};
use crate::key::{FlowKey, PendingFlow};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Why a pending flow was not offloaded.
///
/// These are expected outcomes, not errors: the traffic keeps being bridged
/// in software and the next notification for the same key retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// Ingress interface index is not in the registry
    UnknownDevice,
    /// Ingress device is a bridge itself
    IngressIsBridge,
    /// Ingress device is not enslaved to a bridge
    NoMasterBridge,
    /// Source or destination is the device's or the bridge's own address
    LocalAddress,
    /// No FDB entry for the source address
    UnknownSource,
    /// No FDB entry for the destination address
    UnknownDestination,
    /// Device behind the destination FDB entry is not in the registry
    UnknownEgressDevice,
    /// Device behind the destination FDB entry is a bridge
    EgressIsBridge,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Rejection::UnknownDevice => "unknown ingress device",
            Rejection::IngressIsBridge => "ingress device is a bridge",
            Rejection::NoMasterBridge => "ingress device has no master bridge",
            Rejection::LocalAddress => "locally terminated address",
            Rejection::UnknownSource => "source address not learned",
            Rejection::UnknownDestination => "destination address not learned",
            Rejection::UnknownEgressDevice => "unknown egress device",
            Rejection::EgressIsBridge => "egress device is a bridge",
        };
        f.write_str(s)
    }
}

/// Outcome of [`FlowManager::admit_pending_flow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A new entry was created
    Created(FlowId),
    /// An existing entry got fresh bindings and offload descriptor
    Replaced(FlowId),
    /// The flow is not offloadable right now
    Rejected(Rejection),
}

impl Admission {
    pub fn flow_id(&self) -> Option<FlowId> {
        match self {
            Admission::Created(id) | Admission::Replaced(id) => Some(*id),
            Admission::Rejected(_) => None,
        }
    }
}

/// Counters describing flow manager activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlowManagerStats {
    pub flows_created: u64,
    pub flows_replaced: u64,
    pub flows_removed: u64,
    pub rejections: u64,
    pub install_failures: u64,
    pub fdb_invalidations: u64,
    pub maintenance_passes: u64,
}

/// Topology resolved for an admissible flow.
struct Resolved {
    ingress: FdbEntry,
    egress: FdbEntry,
    offload: OffloadDescriptor,
}

/// Owner of all offloaded flows.
pub struct FlowManager {
    config: FlowManagerConfig,
    registry: Arc<dyn DeviceRegistry>,
    fdb: Arc<dyn FdbStore>,
    datapath: Arc<dyn Datapath>,
    arena: FlowArena,
    flows: FlowIndex,
    sorted: RateIndex,
    bindings: BindingTable,
    stats: FlowManagerStats,
}

impl FlowManager {
    /// Creates an empty flow manager.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` does not validate.
    pub fn new(
        config: FlowManagerConfig,
        registry: Arc<dyn DeviceRegistry>,
        fdb: Arc<dyn FdbStore>,
        datapath: Arc<dyn Datapath>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            arena: FlowArena::with_capacity(config.max_flows),
            config,
            registry,
            fdb,
            datapath,
            flows: FlowIndex::new(),
            sorted: RateIndex::new(),
            bindings: BindingTable::new(),
            stats: FlowManagerStats::default(),
        })
    }

    pub fn config(&self) -> &FlowManagerConfig {
        &self.config
    }

    /// Maximum number of flows the table can hold.
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    pub fn stats(&self) -> &FlowManagerStats {
        &self.stats
    }

    /// Starts the manager by running the first maintenance pass.
    pub fn init(&mut self) {
        info!(
            max_flows = self.capacity(),
            update_interval_ms = self.config.update_interval_ms,
            "Flow manager started"
        );
        self.run_maintenance();
    }

    /// Removes every flow, issuing one datapath removal per entry.
    pub fn shutdown(&mut self) -> usize {
        let ids: Vec<FlowId> = self.flows.ids().collect();
        let removed = ids
            .into_iter()
            .filter(|id| self.remove_flow(*id).is_some())
            .count();
        info!(removed, "Flow manager stopped");
        removed
    }

    /// Validates a datapath notification and offloads the flow if possible.
    ///
    /// Rejections are returned as [`Admission::Rejected`] and are otherwise
    /// silent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::FlowError::TableFull`] if a new entry is needed and
    /// the table is at capacity. No state is modified in that case.
    pub fn admit_pending_flow(&mut self, pending: &PendingFlow) -> Result<Admission> {
        let key = pending.key;

        let resolved = match self.resolve(pending) {
            Ok(resolved) => resolved,
            Err(reason) => {
                self.stats.rejections += 1;
                debug!(flow = %key, %reason, "Pending flow rejected");
                return Ok(Admission::Rejected(reason));
            }
        };

        let (id, replaced) = match self.flows.get(&key) {
            Some(id) => {
                self.unlink(id);
                (id, true)
            }
            None => {
                let entry = FlowEntry::new(key, resolved.ingress.id, resolved.egress.id);
                let id = self.arena.insert(entry)?;
                self.flows.insert(key, id);
                (id, false)
            }
        };

        if let Some(entry) = self.arena.get_mut(id) {
            entry.ingress = resolved.ingress.id;
            entry.egress = resolved.egress.id;
            self.bindings
                .attach(id, resolved.ingress.id, resolved.egress.id);

            entry.offload = resolved.offload;

            // The entry stays indexed even if the program did not load.
            if let Err(e) = self.datapath.install_or_refresh(entry) {
                self.stats.install_failures += 1;
                warn!(flow = %key, error = %e, "Failed to install offload program");
            }

            self.sorted.insert(entry.counters.average_packets, key, id);
        }

        if replaced {
            self.stats.flows_replaced += 1;
            Ok(Admission::Replaced(id))
        } else {
            self.stats.flows_created += 1;
            Ok(Admission::Created(id))
        }
    }

    fn resolve(&self, pending: &PendingFlow) -> std::result::Result<Resolved, Rejection> {
        let key = &pending.key;
        let registry = &self.registry;

        let dev = registry
            .resolve_device(key.ifindex)
            .ok_or(Rejection::UnknownDevice)?;
        if dev.is_bridge() {
            return Err(Rejection::IngressIsBridge);
        }

        let master = dev
            .master()
            .and_then(|index| registry.resolve_device(index))
            .filter(|master| master.is_bridge())
            .ok_or(Rejection::NoMasterBridge)?;

        let local = [dev.addr(), master.addr()];
        if local.contains(&key.src) || local.contains(&key.dest) {
            return Err(Rejection::LocalAddress);
        }

        let bridge = master.ifindex();
        let vlan = dev.translate_input_vlan(key.vlan);
        let fdb_in = self.fdb.lookup_fdb(bridge, key.src, vlan);
        let fdb_out = self.fdb.lookup_fdb(bridge, key.dest, vlan);

        debug!(
            "Pending flow on {}: {} -> {} @{} num_packets={} -> {}",
            dev.name(),
            key.src,
            key.dest,
            key.vlan.id(),
            pending.packets,
            fdb_out
                .map(|f| registry.device_name(f.device))
                .unwrap_or_else(|| "(unknown)".to_string())
        );

        let ingress = fdb_in.ok_or(Rejection::UnknownSource)?;
        let egress = fdb_out.ok_or(Rejection::UnknownDestination)?;

        let out_dev = registry
            .resolve_device(egress.device)
            .ok_or(Rejection::UnknownEgressDevice)?;
        if out_dev.is_bridge() {
            return Err(Rejection::EgressIsBridge);
        }

        Ok(Resolved {
            ingress,
            egress,
            offload: OffloadDescriptor {
                target_port: out_dev.ifindex(),
                vlan: out_dev.translate_output_vlan(vlan),
            },
        })
    }

    /// Detaches `id` from both binding lists and the rate index while
    /// leaving it in the primary index.
    fn unlink(&mut self, id: FlowId) {
        let Some(entry) = self.arena.get(id) else {
            return;
        };
        self.bindings.detach(id, entry.ingress, entry.egress);
        self.sorted
            .remove(entry.counters.average_packets, entry.key);
    }

    /// Removes a flow from both binding lists, the rate index and the
    /// primary index, then withdraws it from the datapath.
    ///
    /// Returns `None` if `id` no longer refers to an admitted flow.
    pub fn remove_flow(&mut self, id: FlowId) -> Option<FlowEntry> {
        if !self.arena.contains(id) {
            return None;
        }

        self.unlink(id);
        let entry = self.arena.remove(id)?;
        self.flows.remove(&entry.key);
        self.datapath.remove(&entry);
        self.stats.flows_removed += 1;

        debug!(flow = %entry.key, "Flow removed");
        Some(entry)
    }

    pub fn remove_flow_by_key(&mut self, key: &FlowKey) -> bool {
        match self.flows.get(key) {
            Some(id) => self.remove_flow(id).is_some(),
            None => false,
        }
    }

    /// Removes every flow anchored on `fdb` in either direction.
    #[instrument(skip_all, fields(fdb = %fdb))]
    pub fn invalidate_fdb(&mut self, fdb: FdbId) -> usize {
        let ids = self.bindings.flows_using(fdb);
        let removed = ids
            .into_iter()
            .filter(|id| self.remove_flow(*id).is_some())
            .count();

        self.stats.fdb_invalidations += 1;
        if removed > 0 {
            info!(removed, "Invalidated flows bound to FDB entry");
        }
        removed
    }

    /// Refreshes the counters of every flow and re-sorts the rate index.
    ///
    /// Each flow is taken out of the rate index, updated from the datapath
    /// and put back at its new position. The primary index is not modified
    /// and each flow is visited exactly once. Returns the number of flows
    /// visited.
    pub fn run_maintenance(&mut self) -> usize {
        let ids: Vec<FlowId> = self.flows.ids().collect();
        let mut visited = 0;

        for id in ids {
            let Some(entry) = self.arena.get(id) else {
                continue;
            };
            let key = entry.key;
            self.sorted.remove(entry.counters.average_packets, key);

            let counters = self.datapath.refresh_counters(entry);

            let Some(entry) = self.arena.get_mut(id) else {
                continue;
            };
            entry.counters = counters;
            let (ingress, egress) = (entry.ingress, entry.egress);

            debug!(
                "Update flow {}@{} -> {}@{} vlan={} cur_packets={} avg_packets={}",
                key.src,
                self.fdb_device_name(ingress),
                key.dest,
                self.fdb_device_name(egress),
                key.vlan.id(),
                counters.current_packets,
                ewma::packets_per_interval(counters.average_packets)
            );

            self.sorted.insert(counters.average_packets, key, id);
            visited += 1;
        }

        self.stats.maintenance_passes += 1;
        visited
    }

    fn fdb_device_name(&self, fdb: FdbId) -> String {
        match self.fdb.get_fdb(fdb) {
            Some(entry) => self.registry.device_name(entry.device),
            None => "(unknown)".to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn get(&self, key: &FlowKey) -> Option<&FlowEntry> {
        self.flows.get(key).and_then(|id| self.arena.get(id))
    }

    pub fn get_by_id(&self, id: FlowId) -> Option<&FlowEntry> {
        self.arena.get(id)
    }

    pub fn flow_id(&self, key: &FlowKey) -> Option<FlowId> {
        self.flows.get(key)
    }

    /// Flows in ascending order of smoothed rate, ties broken by key.
    pub fn flows_by_rate(&self) -> Vec<&FlowEntry> {
        self.sorted
            .ascending()
            .filter_map(|(_, id)| self.arena.get(*id))
            .collect()
    }

    /// The `n` busiest flows, hottest first.
    pub fn hottest(&self, n: usize) -> Vec<FlowSummary> {
        self.sorted
            .descending()
            .filter_map(|(_, id)| self.arena.get(*id))
            .take(n)
            .map(FlowEntry::summary)
            .collect()
    }

    /// Binding lists of `fdb`, if any flow is anchored on it.
    pub fn fdb_bindings(&self, fdb: FdbId) -> Option<&FdbBindings> {
        self.bindings.get(fdb)
    }

    /// Flows anchored on `fdb` in either direction.
    pub fn flows_using_fdb(&self, fdb: FdbId) -> Vec<&FlowEntry> {
        self.bindings
            .flows_using(fdb)
            .into_iter()
            .filter_map(|id| self.arena.get(id))
            .collect()
    }

    /// Checks that every admitted flow is present exactly once in each
    /// index and binding list. Returns a description of each violation.
    pub fn check_consistency(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.flows.len() != self.arena.len() {
            problems.push(format!(
                "primary index holds {} flows, arena holds {}",
                self.flows.len(),
                self.arena.len()
            ));
        }
        if self.sorted.len() != self.flows.len() {
            problems.push(format!(
                "rate index holds {} flows, primary index holds {}",
                self.sorted.len(),
                self.flows.len()
            ));
        }
        if self.bindings.link_count() != 2 * self.flows.len() {
            problems.push(format!(
                "binding lists hold {} links for {} flows",
                self.bindings.link_count(),
                self.flows.len()
            ));
        }

        for (key, id) in self.flows.iter() {
            let Some(entry) = self.arena.get(*id) else {
                problems.push(format!("{} refers to a freed slot", key));
                continue;
            };
            if entry.key != *key {
                problems.push(format!("{} indexed under {}", entry.key, key));
            }
            if !self.sorted.contains(entry.counters.average_packets, *key) {
                problems.push(format!("{} missing from rate index", key));
            }
            if !self.bindings.is_source_of(entry.ingress, *id) {
                problems.push(format!("{} missing from {} source list", key, entry.ingress));
            }
            if !self.bindings.is_destination_of(entry.egress, *id) {
                problems.push(format!(
                    "{} missing from {} destination list",
                    key, entry.egress
                ));
            }
        }

        problems
    }
}

impl fmt::Debug for FlowManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowManager")
            .field("config", &self.config)
            .field("flows", &self.flows.len())
            .field("stats", &self.stats)
            .finish()
    }
}
