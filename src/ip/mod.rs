//! IP address arithmetic and allocation.
//!
//! This module handles address conversion between textual, absolute and
//! network-relative form, uniformly for IPv4 and IPv6, plus the interval
//! freelist every network allocates from.

pub mod codec;
pub mod freelist;

use serde::{Deserialize, Serialize};

// Re-export commonly used types
pub use codec::IpVersion;
pub use freelist::AddressSpace;

/// One value per address family.
///
/// Dual-stack interfaces hold two independent slots keyed `4` and `6`;
/// a slot is `None` while nothing is bound or assigned for that family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyPair<T> {
    #[serde(rename = "4")]
    pub v4: Option<T>,
    #[serde(rename = "6")]
    pub v6: Option<T>,
}

impl<T> Default for FamilyPair<T> {
    fn default() -> Self {
        FamilyPair { v4: None, v6: None }
    }
}

impl<T> FamilyPair<T> {
    pub fn get(&self, version: IpVersion) -> Option<&T> {
        match version {
            IpVersion::V4 => self.v4.as_ref(),
            IpVersion::V6 => self.v6.as_ref(),
        }
    }

    /// Replace one family's slot, returning the previous value.
    pub fn set(&mut self, version: IpVersion, value: Option<T>) -> Option<T> {
        let slot = match version {
            IpVersion::V4 => &mut self.v4,
            IpVersion::V6 => &mut self.v6,
        };
        std::mem::replace(slot, value)
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_none() && self.v6.is_none()
    }

    /// The families currently holding a value, v4 first.
    pub fn versions(&self) -> Vec<IpVersion> {
        let mut versions = Vec::with_capacity(2);
        if self.v4.is_some() {
            versions.push(IpVersion::V4);
        }
        if self.v6.is_some() {
            versions.push(IpVersion::V6);
        }
        versions
    }
}
