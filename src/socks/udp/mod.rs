//! UDP ASSOCIATE support
//!
//! The wrapper codec and the per-association relay loop.

mod packet;
mod relay;

pub use packet::{parse_datagram, put_response_header, DatagramHeader};
pub use relay::UdpAssociation;
