//! Packed VLAN tag as carried in datapath flow keys.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A VLAN value packed into 16 bits.
///
/// Layout:
///
/// ```text
///  15   14..12   11..0
/// +---+--------+---------+
/// | P |  PRIO  | VLAN ID |
/// +---+--------+---------+
/// ```
///
/// `P` marks a tag that was present on the wire. Equality and ordering use
/// the whole value, so two tags with the same VLAN ID but different metadata
/// bits are distinct. Display shows the VLAN ID only.
///
/// # Examples
///
/// ```
/// use bridger_types::VlanTag;
///
/// let vlan = VlanTag::tagged(10).unwrap();
/// assert_eq!(vlan.id(), 10);
/// assert!(vlan.is_tagged());
/// assert_eq!(vlan.to_string(), "10");
///
/// assert!(VlanTag::tagged(4096).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub struct VlanTag(u16);

impl VlanTag {
    /// Mask of the VLAN ID subfield.
    pub const ID_MASK: u16 = 0x0fff;

    /// Mask of the priority subfield.
    pub const PRIO_MASK: u16 = 0x7000;

    /// Bit set when the frame carried an 802.1Q tag.
    pub const PRESENT: u16 = 0x8000;

    const PRIO_SHIFT: u16 = 12;

    /// Highest encodable VLAN ID.
    pub const MAX_ID: u16 = 4095;

    /// Untagged traffic.
    pub const UNTAGGED: VlanTag = VlanTag(0);

    /// Wraps a raw packed value.
    pub const fn from_raw(raw: u16) -> Self {
        VlanTag(raw)
    }

    /// Creates a tag-present value for `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` does not fit the 12-bit subfield.
    pub const fn tagged(id: u16) -> Result<Self, ParseError> {
        if id > Self::MAX_ID {
            return Err(ParseError::InvalidVlanId(id));
        }
        Ok(VlanTag(Self::PRESENT | id))
    }

    /// Returns the raw packed value.
    pub const fn raw(&self) -> u16 {
        self.0
    }

    /// Returns the VLAN ID subfield.
    pub const fn id(&self) -> u16 {
        self.0 & Self::ID_MASK
    }

    pub const fn priority(&self) -> u8 {
        ((self.0 & Self::PRIO_MASK) >> Self::PRIO_SHIFT) as u8
    }

    pub const fn is_tagged(&self) -> bool {
        self.0 & Self::PRESENT != 0
    }

    /// Returns a copy with the VLAN ID replaced and metadata bits kept.
    pub const fn with_id(&self, id: u16) -> Self {
        VlanTag((self.0 & !Self::ID_MASK) | (id & Self::ID_MASK))
    }
}

impl fmt::Display for VlanTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl From<u16> for VlanTag {
    fn from(raw: u16) -> Self {
        VlanTag(raw)
    }
}

impl From<VlanTag> for u16 {
    fn from(vlan: VlanTag) -> u16 {
        vlan.0
    }
}
