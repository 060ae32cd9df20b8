//! # dhcpkv
//!
//! A DHCP server (RFC 2131) whose leases live in a transactional key-value
//! store, so several replicas can serve one IPv4 network without handing the
//! same address to two clients.
//!
//! ## Features
//!
//! - DISCOVER/OFFER, REQUEST/ACK, RELEASE and DECLINE
//! - Conditional store transactions decide every allocation
//! - Startup reconciliation of the free pool against the store
//! - Per-message processing deadline
//! - In-memory store for single instances and tests, etcd behind the `etcd`
//!   feature
//!
//! ## Quick Start
//!
//! ```no_run
//! use dhcpkv::{Config, DhcpServer};
//!
//! #[tokio::main]
//! async fn main() -> dhcpkv::Result<()> {
//!     let config = Config::load_or_create("config.json")?;
//!     let server = DhcpServer::new(config).await?;
//!     server.run().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`AddressPool`] - Free addresses of the network, ascending
//! - [`LeaseStore`] - Lease records on top of a [`KvStore`]
//! - [`ReverseIndex`] - Local address-to-client lookup
//! - [`ProtocolHandler`] - Drives the three from DHCP messages
//! - [`DhcpServer`] - UDP listener on port 67
//! - [`DhcpPacket`] - DHCP packet parsing and encoding

pub mod config;
pub mod error;
pub mod handler;
pub mod index;
pub mod kv;
pub mod options;
pub mod packet;
pub mod pool;
pub mod server;
pub mod store;

pub use config::{Config, StoreConfig};
pub use error::{Error, Result};
pub use handler::{HandlerConfig, ProtocolHandler};
pub use index::ReverseIndex;
pub use kv::{KvStore, MemoryKv};
pub use options::{MessageType, OptionCode, Options};
pub use packet::DhcpPacket;
pub use pool::AddressPool;
pub use server::DhcpServer;
pub use store::{Lease, LeaseStore};
