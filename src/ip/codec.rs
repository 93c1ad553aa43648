//! Conversion between textual addresses, absolute integers and
//! network-relative offsets.
//!
//! All arithmetic runs on `u128` regardless of the address family; the
//! family only contributes its bit width. This keeps one implementation
//! serving any prefix length for both IPv4 and IPv6.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use crate::error::{LunaError, Result};

/// Address family, carrying the bit width used by every masking formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpVersion {
    #[serde(rename = "4")]
    V4,
    #[serde(rename = "6")]
    V6,
}

impl IpVersion {
    /// Width of an address of this family, in bits.
    pub fn width(&self) -> u32 {
        match self {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }

    /// Largest valid prefix length for this family.
    pub fn max_prefix(&self) -> u8 {
        match self {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }

    /// Number of usable host offsets under `prefix`: `2^(width-prefix) - 2`.
    ///
    /// Offset 0 (the network address) and `limit + 1` (broadcast) are never
    /// allocatable.
    pub fn host_limit(&self, prefix: u8) -> u128 {
        let host_bits = self.width() - u32::from(prefix);
        if host_bits >= 128 {
            u128::MAX - 1
        } else {
            (1u128 << host_bits) - 2
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => write!(f, "4"),
            IpVersion::V6 => write!(f, "6"),
        }
    }
}

fn check_prefix(prefix: u8, version: IpVersion) -> Result<()> {
    if prefix < 1 || prefix > version.max_prefix() {
        return Err(LunaError::Validation(format!(
            "prefix {} is outside [1, {}] for IPv{}",
            prefix,
            version.max_prefix(),
            version
        )));
    }
    Ok(())
}

/// Parse a textual address of the given family into an absolute integer.
pub fn parse(text: &str, version: IpVersion) -> Result<u128> {
    match version {
        IpVersion::V4 => text
            .parse::<Ipv4Addr>()
            .map(|a| u128::from(u32::from(a)))
            .map_err(|_| LunaError::InvalidAddress(text.to_string())),
        IpVersion::V6 => text
            .parse::<Ipv6Addr>()
            .map(u128::from)
            .map_err(|_| LunaError::InvalidAddress(text.to_string())),
    }
}

/// Format an absolute integer as a textual address of the given family.
pub fn format(num: u128, version: IpVersion) -> Result<String> {
    match version {
        IpVersion::V4 => {
            let v = u32::try_from(num).map_err(|_| LunaError::AddressOutOfRange {
                offset: num,
                limit: u128::from(u32::MAX),
            })?;
            Ok(Ipv4Addr::from(v).to_string())
        }
        IpVersion::V6 => Ok(Ipv6Addr::from(num).to_string()),
    }
}

/// Determine the family of a textual address by trial-parsing both.
pub fn version_of(text: &str) -> Option<IpVersion> {
    if parse(text, IpVersion::V4).is_ok() {
        Some(IpVersion::V4)
    } else if parse(text, IpVersion::V6).is_ok() {
        Some(IpVersion::V6)
    } else {
        None
    }
}

/// Mask `address` down to the base address of its `prefix`-sized network.
pub fn network_base(address: u128, prefix: u8, version: IpVersion) -> Result<u128> {
    check_prefix(prefix, version)?;
    Ok(address & prefix_mask(prefix, version))
}

/// The netmask of `prefix` as an absolute integer.
pub fn prefix_mask(prefix: u8, version: IpVersion) -> u128 {
    let width = version.width();
    let host_bits = width - u32::from(prefix);
    let all = if width == 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    };
    if host_bits >= 128 {
        0
    } else {
        all & !((1u128 << host_bits) - 1)
    }
}

/// Check whether `address` falls inside `base/prefix`.
pub fn in_network(address: u128, base: u128, prefix: u8, version: IpVersion) -> Result<bool> {
    Ok(network_base(address, prefix, version)? == network_base(base, prefix, version)?)
}

/// Convert an absolute address into an offset relative to `base`.
///
/// Fails with `NotInNetwork` if the address is not covered by
/// `base/prefix`.
pub fn to_relative(address: u128, base: u128, prefix: u8, version: IpVersion) -> Result<u128> {
    if !in_network(address, base, prefix, version)? {
        return Err(LunaError::NotInNetwork {
            address: format(address, version)?,
            network: format(base, version)?,
            prefix,
        });
    }
    Ok(address - network_base(base, prefix, version)?)
}

/// Convert a textual address into an offset relative to `base`.
pub fn text_to_relative(text: &str, base: u128, prefix: u8, version: IpVersion) -> Result<u128> {
    let num = parse(text, version)?;
    to_relative(num, base, prefix, version)
}

/// Convert a relative offset back into an absolute integer address.
pub fn to_absolute(base: u128, offset: u128) -> u128 {
    base + offset
}

/// Convert a relative offset into the textual address it represents.
pub fn relative_to_text(base: u128, offset: u128, version: IpVersion) -> Result<String> {
    format(to_absolute(base, offset), version)
}
