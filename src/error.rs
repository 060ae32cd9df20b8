//! Error types for the DHCP server.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants. Apart from construction failures,
//! every variant resolves to "send no reply" at the protocol boundary.

use std::net::Ipv4Addr;

/// Errors that can occur during DHCP server operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system or network I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config file or CLI output).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed DHCP packet received.
    #[error("Invalid DHCP packet: {0}")]
    InvalidPacket(String),

    /// Invalid server configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Socket creation or configuration error.
    #[error("Socket error: {0}")]
    Socket(String),

    /// The network specification could not be parsed or is too large to
    /// enumerate. Fatal to construction.
    #[error("Invalid CIDR '{cidr}': {reason}")]
    InvalidCidr { cidr: String, reason: String },

    /// No free address is left in the pool.
    #[error("No free IP addresses left in pool")]
    PoolEmpty,

    /// The requested address is not (or no longer) free.
    #[error("Address {0} is not available")]
    NotAvailable(Ipv4Addr),

    /// The address is already claimed by a different client.
    #[error("Address {ip} is already allocated to another client (requested by {client})")]
    AlreadyAllocated { client: String, ip: Ipv4Addr },

    /// The store holds a different address for this client than the one
    /// requested: a concurrent allocation won the race.
    #[error("Stored address {stored} for {client} does not match wanted address {wanted}")]
    Mismatch {
        client: String,
        stored: String,
        wanted: Ipv4Addr,
    },

    /// No lease is recorded for the client.
    #[error("No lease found for client {0}")]
    NotFound(String),

    /// The key-value store could not be reached or the per-message deadline
    /// elapsed before it answered.
    #[error("Lease store unavailable: {0}")]
    StoreUnavailable(String),

    /// A lease record whose value is not an IPv4 address.
    #[error("Lease record {key} holds unparsable address '{value}'")]
    CorruptLease { key: String, value: String },

    /// Attempt to return an address outside the configured network to the pool.
    #[error("Address {0} is outside the configured network")]
    OutOfRange(Ipv4Addr),
}

impl Error {
    /// Returns true for errors that hint at a store outage rather than a
    /// protocol-level race.
    pub fn is_store_outage(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }
}

/// A specialized Result type for DHCP operations.
pub type Result<T> = std::result::Result<T, Error>;
