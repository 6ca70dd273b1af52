//! # socks5proxy - SOCKS5 Proxy Server
//!
//! A SOCKS5 proxy server (RFC 1928) restricted to the no-authentication
//! method. Clients connect over TCP, negotiate a method, and issue a
//! CONNECT or UDP ASSOCIATE request; the server then tunnels TCP bytes
//! bidirectionally or relays UDP datagrams through a per-association
//! socket.
//!
//! ## Features
//!
//! - **CONNECT**: bidirectional TCP tunnel with watermark backpressure
//!   and coordinated shutdown
//! - **UDP ASSOCIATE**: per-association relay with client endpoint
//!   learning and a process-wide DNS cache
//! - **Graceful shutdown**: one cancellation signal drains every
//!   connection within a bounded window
//! - **Friendly names**: configured IP-to-label mappings decorate logged
//!   endpoints, with no behavioural effect
//!
//! ## Usage
//!
//! ```rust,ignore
//! use socks5proxy::{load_config, FriendlyNames, Server};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("proxy.json")?;
//!     let names = Arc::new(FriendlyNames::from_mappings(&config.ip_address_mappings));
//!
//!     let server = Server::from_config(&config, names).await?;
//!     server.run(CancellationToken::new()).await
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod buffer;
pub mod config;
pub mod dns;
pub mod error;
pub mod names;
pub mod server;
pub mod socks;

// Re-export commonly used items
pub use config::{load_config, ProxyConfig};
pub use error::{ReplyCode, SocksError};
pub use names::FriendlyNames;
pub use server::Server;

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
