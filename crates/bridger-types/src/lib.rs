//! Common bridger types for the flow offload control plane.
//!
//! This crate provides type-safe representations of the link-layer
//! primitives shared by the flow manager and the daemon:
//!
//! - [`MacAddress`]: 48-bit Ethernet hardware addresses
//! - [`VlanTag`]: packed 802.1Q VLAN value as reported by the datapath

mod mac;
mod vlan;

pub use mac::MacAddress;
pub use vlan::VlanTag;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid VLAN ID: {0} (must be 0-4095)")]
    InvalidVlanId(u16),
}
