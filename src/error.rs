//! Error taxonomy shared across the crate.
//!
//! Single-entity operations fail fast and leave the entity unmodified.
//! Cascade operations accumulate per-node outcomes instead of aborting,
//! see [`crate::session::CascadeReport`].

use crate::store::Collection;

/// Errors produced by the entity layer and the address allocator.
#[derive(Debug, thiserror::Error)]
pub enum LunaError {
    #[error("{collection} '{key}' not found")]
    NotFound { collection: Collection, key: String },

    #[error("{collection} '{name}' already exists")]
    AlreadyExists { collection: Collection, name: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{collection} '{name}' is in use by {count} other object(s)")]
    ReferentialIntegrity {
        collection: Collection,
        name: String,
        count: usize,
    },

    #[error("no free addresses left in network")]
    AddressSpaceExhausted,

    #[error("offset {offset} is outside the usable range [1, {limit}]")]
    AddressOutOfRange { offset: u128, limit: u128 },

    #[error("range [{start}, {end}] is not entirely free")]
    AddressAlreadyAllocated { start: u128, end: u128 },

    #[error("address '{address}' does not belong to network {network}/{prefix}")]
    NotInNetwork {
        address: String,
        network: String,
        prefix: u8,
    },

    #[error("interface '{interface}' carries both families, specify IPv4 or IPv6")]
    AmbiguousVersion { interface: String },

    #[error("'{0}' is not a valid IP address")]
    InvalidAddress(String),

    #[error("datastore error: {0}")]
    Store(#[from] sled::Error),

    #[error("document error: {0}")]
    Document(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LunaError>;
