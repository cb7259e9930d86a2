//! # dhcpdora
//!
//! The lease side of a DHCPv4 server (RFC 2131): it tracks which addresses
//! are leased to which clients and answers the DISCOVER / OFFER / REQUEST /
//! ACK exchange.
//!
//! ## Behaviour
//!
//! - DISCOVER is answered with an OFFER; nothing is reserved until REQUEST
//! - REQUEST is always answered: ACK on success, NAK on conflict
//! - RELEASE and DECLINE are never answered
//! - INFORM gets an ACK with configuration only
//! - Requested options (subnet mask, routers, name servers, lease time,
//!   server identifier) follow the client's parameter request list
//! - Leases live in memory only
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use dhcpdora::{Config, DhcpServer, Leases};
//!
//! #[tokio::main]
//! async fn main() -> dhcpdora::Result<()> {
//!     let config = Config::load_or_create("config.json")?;
//!     let leases = Arc::new(Leases::new(&config)?);
//!     let server = DhcpServer::new(&config, leases)?;
//!     server.run().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`AddressRange`] - Per-octet lease range and candidate generation
//! - [`LeaseStore`] / [`Leases`] - Lease bookkeeping behind a trait
//! - [`ReplyBuilder`] / [`ResponseBuilder`] - Reply accumulation
//! - [`DhcpHandler`] - Per-message protocol logic
//! - [`DhcpServer`] - UDP transport
//! - [`interface_ipv4`] - Server address lookup from a network device
//! - [`DhcpPacket`] / [`DhcpOption`] - Wire codec

pub mod address;
pub mod config;
pub mod error;
pub mod handler;
pub mod interface;
pub mod lease;
pub mod options;
pub mod packet;
pub mod reply;
pub mod server;

pub use address::{AddressRange, random_address};
pub use config::Config;
pub use error::{Error, Result};
pub use handler::DhcpHandler;
pub use interface::interface_ipv4;
pub use lease::{LeaseRecord, LeaseStore, Leases};
pub use options::{DhcpOption, MessageType};
pub use packet::{DhcpPacket, MacAddr};
pub use reply::{ReplyBuilder, ReplyField, ResponseBuilder};
pub use server::DhcpServer;
