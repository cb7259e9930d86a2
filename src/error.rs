//! Error types for the DHCP server.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants. The lease negotiation variants
//! ([`AllocationConflict`](Error::AllocationConflict),
//! [`NotLeased`](Error::NotLeased), [`OfferUnavailable`](Error::OfferUnavailable)
//! and [`ReplyAssemblyFailed`](Error::ReplyAssemblyFailed)) are consumed by the
//! protocol handler and turned into a NAK, a logged drop, or silence.

use std::net::Ipv4Addr;

use crate::packet::MacAddr;

/// Errors that can occur during DHCP server operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system or network I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config file).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed DHCP packet received.
    #[error("Invalid DHCP packet: {0}")]
    InvalidPacket(String),

    /// Invalid server configuration.
    ///
    /// Returned by [`Config::validate`](crate::Config::validate) when the
    /// configuration contains invalid values (e.g., an octet of range_from
    /// above the same octet of range_to).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Socket creation or configuration error.
    ///
    /// Typically occurs when binding to port 67 without administrator privileges,
    /// or when the requested network interface doesn't exist.
    #[error("Socket error: {0}")]
    Socket(String),

    /// The named network device does not exist or carries no IPv4 address.
    #[error("Interface {name} not found or has no IPv4 address")]
    InterfaceNotFound { name: String },

    /// The address is held by another client whose lease has not expired.
    #[error("Address {address} is already leased to {owner}")]
    AllocationConflict { address: Ipv4Addr, owner: MacAddr },

    /// A release named an address the client does not hold.
    #[error("Address {address} is not leased to {client}")]
    NotLeased { address: Ipv4Addr, client: MacAddr },

    /// Neither the random search nor the fallback scan found a free address.
    #[error("No free address available in the lease range")]
    OfferUnavailable,

    /// The reply could not be assembled from the builder and request fields.
    #[error("Failed to assemble reply: {0}")]
    ReplyAssemblyFailed(String),
}

/// A specialized Result type for DHCP operations.
pub type Result<T> = std::result::Result<T, Error>;
