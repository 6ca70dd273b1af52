//! Error types for the proxy
//!
//! Defines the SOCKS5 protocol error taxonomy and the mapping from socket
//! errors to SOCKS5 reply codes.

use std::io;
use thiserror::Error;

/// SOCKS5 protocol errors
///
/// Every decode failure is a typed variant; malformed input never panics.
/// Each variant maps to the reply code sent to the client before the
/// connection is closed, via [`SocksError::reply_code`].
#[derive(Error, Debug)]
pub enum SocksError {
    /// IO error while reading or writing a protocol frame
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Unsupported SOCKS version byte
    #[error("Unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// Method negotiation offered zero methods
    #[error("No authentication methods offered")]
    NoMethodsOffered,

    /// None of the offered methods is acceptable
    #[error("No acceptable authentication method")]
    NoAcceptableMethod,

    /// Command not supported (BIND or unknown)
    #[error("Command not supported: {0:#04x}")]
    CommandNotSupported(u8),

    /// Address type not supported
    #[error("Address type not supported: {0:#04x}")]
    AddressTypeNotSupported(u8),

    /// Non-zero reserved byte in a request
    #[error("Non-zero reserved byte: {0:#04x}")]
    InvalidReserved(u8),

    /// Domain name with a zero length byte
    #[error("Empty domain name")]
    EmptyDomain,

    /// Domain name containing non-ASCII bytes
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),

    /// UDP datagram shorter than the minimum wrapper length
    #[error("UDP datagram too short: {0} bytes")]
    DatagramTooShort(usize),

    /// Non-zero reserved field in a UDP wrapper
    #[error("Non-zero UDP reserved field: {0:#06x}")]
    InvalidDatagramReserved(u16),

    /// Fragmented UDP datagram (FRAG != 0)
    #[error("Fragmented UDP datagram: frag={0}")]
    FragmentedDatagram(u8),

    /// UDP wrapper truncated inside the address field
    #[error("UDP datagram truncated in address field")]
    TruncatedDatagram,
}

impl SocksError {
    /// Reply code to send to the client for this error
    pub fn reply_code(&self) -> ReplyCode {
        match self {
            SocksError::CommandNotSupported(_) => ReplyCode::CommandNotSupported,
            SocksError::AddressTypeNotSupported(_) => ReplyCode::AddressTypeNotSupported,
            _ => ReplyCode::GeneralFailure,
        }
    }
}

/// Reply codes for the SOCKS5 REP field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyCode {
    /// Command succeeded
    Succeeded = 0x00,
    /// General SOCKS server failure
    GeneralFailure = 0x01,
    /// Connection not allowed by ruleset
    ConnectionNotAllowed = 0x02,
    /// Network unreachable
    NetworkUnreachable = 0x03,
    /// Host unreachable
    HostUnreachable = 0x04,
    /// Connection refused
    ConnectionRefused = 0x05,
    /// TTL expired
    TtlExpired = 0x06,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddressTypeNotSupported = 0x08,
}

impl From<ReplyCode> for u8 {
    fn from(code: ReplyCode) -> Self {
        code as u8
    }
}

impl From<&io::Error> for ReplyCode {
    /// Map a socket error from an upstream connect to a reply code.
    ///
    /// Unknown kinds fall back to [`ReplyCode::GeneralFailure`]; OS-specific
    /// codes never reach the client.
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ReplyCode::ConnectionRefused,
            io::ErrorKind::HostUnreachable => ReplyCode::HostUnreachable,
            io::ErrorKind::AddrNotAvailable => ReplyCode::HostUnreachable,
            io::ErrorKind::NetworkUnreachable => ReplyCode::NetworkUnreachable,
            io::ErrorKind::NetworkDown => ReplyCode::NetworkUnreachable,
            io::ErrorKind::TimedOut => ReplyCode::TtlExpired,
            _ => ReplyCode::GeneralFailure,
        }
    }
}
