//! Flow manager for the bridge offload daemon.
//!
//! The datapath forwards bridged traffic in software until the control plane
//! installs an offload entry for a flow. This crate owns that control-plane
//! state:
//!
//! - [`FlowManager`]: validates pending flows against the bridge topology,
//!   keeps every admitted flow in a primary index, a rate index and the
//!   binding lists of its FDB entries, and refreshes traffic averages
//! - [`FlowScheduler`]: single task owning the manager, fed through a
//!   [`FlowHandle`] and driving the periodic maintenance pass
//! - [`DeviceRegistry`], [`FdbStore`], [`Datapath`]: the subsystems the
//!   manager depends on
//!
//! # Example
//!
//! ```ignore
//! use bridger_flow::{FlowManager, FlowManagerConfig, FlowScheduler};
//!
//! let manager = FlowManager::new(FlowManagerConfig::default(), registry, fdb, datapath)?;
//! let scheduler = FlowScheduler::spawn(manager);
//! let handle = scheduler.handle();
//!
//! handle.send_pending(pending).await?;
//! handle.shutdown().await?;
//! let stats = scheduler.join().await?;
//! ```

mod arena;
mod binding;
mod collaborators;
mod config;
mod entry;
mod error;
pub mod ewma;
mod index;
mod key;
mod manager;
mod scheduler;
pub mod sim;

pub use arena::FlowId;
pub use binding::FdbBindings;
pub use collaborators::{Datapath, Device, DeviceRegistry, FdbEntry, FdbId, FdbStore};
pub use config::FlowManagerConfig;
pub use entry::{FlowCounters, FlowEntry, FlowSummary, OffloadDescriptor};
pub use error::{FlowError, Result};
pub use index::RateKey;
pub use key::{FlowKey, PendingFlow};
pub use manager::{Admission, FlowManager, FlowManagerStats, Rejection};
pub use scheduler::{FlowEvent, FlowHandle, FlowScheduler};
