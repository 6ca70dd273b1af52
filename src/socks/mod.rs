//! SOCKS5 protocol implementation
//!
//! The codec (negotiation, request, reply, UDP wrapper), the
//! per-connection handler and the data planes it dispatches to: the
//! bidirectional TCP tunnel and the UDP relay.

pub mod consts;
mod handler;
mod handshake;
mod request;
mod reply;
pub mod tunnel;
mod types;
pub mod udp;

pub use consts::*;
pub use handler::{handle_connection, HandlerContext};
pub use handshake::negotiate;
pub use reply::{encode_reply, send_reply};
pub use request::{read_request, Request};
pub use types::{SocksCommand, TargetAddr};
