//! SOCKS5 request parser
//!
//! Reads the framed request that follows method negotiation. The address
//! length depends on ATYP, so the reader loops (`read_exact`) until the
//! exact frame is obtained; EOF mid-frame is an error.
//!
//! ```text
//! +----+-----+-------+------+----------+----------+
//! |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
//! +----+-----+-------+------+----------+----------+
//! | 1  |  1  | X'00' |  1   | Variable |    2     |
//! +----+-----+-------+------+----------+----------+
//! ```

use super::consts::*;
use super::types::{SocksCommand, TargetAddr};
use crate::error::SocksError;
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt};

/// A parsed SOCKS5 request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Requested command
    pub command: SocksCommand,
    /// Destination address
    pub addr: TargetAddr,
}

/// Read and parse one request from the stream
///
/// Returns a typed error for every malformed frame; the caller maps it to
/// a reply code and closes the connection.
pub async fn read_request<S>(stream: &mut S) -> Result<Request, SocksError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;

    let version = header[0];
    if version != SOCKS5_VERSION {
        return Err(SocksError::UnsupportedVersion(version));
    }

    let command =
        SocksCommand::from_byte(header[1]).ok_or(SocksError::CommandNotSupported(header[1]))?;

    if header[2] != SOCKS5_RESERVED {
        return Err(SocksError::InvalidReserved(header[2]));
    }

    let addr = read_address(stream, header[3]).await?;

    Ok(Request { command, addr })
}

/// Read the ATYP-dependent address and trailing port
async fn read_address<S>(stream: &mut S, atyp: u8) -> Result<TargetAddr, SocksError>
where
    S: AsyncRead + Unpin,
{
    match atyp {
        SOCKS5_ATYP_IPV4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            let port = read_port(stream).await?;
            Ok(TargetAddr::ipv4(Ipv4Addr::from(addr), port))
        }

        SOCKS5_ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let domain_len = len[0] as usize;
            if domain_len == 0 {
                return Err(SocksError::EmptyDomain);
            }

            let mut domain = vec![0u8; domain_len];
            stream.read_exact(&mut domain).await?;
            let domain = match String::from_utf8(domain) {
                Ok(s) if s.is_ascii() => s,
                Ok(s) => return Err(SocksError::InvalidDomain(s)),
                Err(e) => {
                    return Err(SocksError::InvalidDomain(
                        String::from_utf8_lossy(e.as_bytes()).into_owned(),
                    ))
                }
            };

            let port = read_port(stream).await?;
            Ok(TargetAddr::domain(domain, port))
        }

        SOCKS5_ATYP_IPV6 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            let port = read_port(stream).await?;
            Ok(TargetAddr::ipv6(Ipv6Addr::from(addr), port))
        }

        _ => Err(SocksError::AddressTypeNotSupported(atyp)),
    }
}

async fn read_port<S>(stream: &mut S) -> Result<u16, SocksError>
where
    S: AsyncRead + Unpin,
{
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    Ok(u16::from_be_bytes(port))
}
