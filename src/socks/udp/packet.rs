//! UDP wrapper codec
//!
//! Every datagram relayed for a client carries a SOCKS5 header in front of
//! the payload:
//!
//! ```text
//! +----+------+------+----------+----------+----------+
//! |RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
//! +----+------+------+----------+----------+----------+
//! | 2  |  1   |  1   | Variable |    2     | Variable |
//! +----+------+------+----------+----------+----------+
//! ```
//!
//! Decoding is total: every malformed input is a typed error. The payload
//! is returned as a slice into the input buffer, so forwarding never
//! copies it.

use crate::error::SocksError;
use crate::socks::consts::*;
use crate::socks::types::TargetAddr;
use bytes::BufMut;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

/// Decoded UDP wrapper header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatagramHeader {
    /// Destination of the wrapped payload
    pub dst: TargetAddr,
}

/// Decode a client datagram into its header and payload slice
///
/// Rejects datagrams shorter than the minimum wrapper length, non-zero
/// reserved fields and any non-zero fragment number.
pub fn parse_datagram(buf: &[u8]) -> Result<(DatagramHeader, &[u8]), SocksError> {
    if buf.len() < MIN_UDP_WRAPPER_LEN {
        return Err(SocksError::DatagramTooShort(buf.len()));
    }

    let rsv = u16::from_be_bytes([buf[0], buf[1]]);
    if rsv != 0 {
        return Err(SocksError::InvalidDatagramReserved(rsv));
    }

    let frag = buf[2];
    if frag != 0 {
        return Err(SocksError::FragmentedDatagram(frag));
    }

    let atyp = buf[3];
    let rest = &buf[4..];

    let (dst, consumed) = match atyp {
        SOCKS5_ATYP_IPV4 => {
            // Guaranteed by the minimum-length check
            let ip = Ipv4Addr::new(rest[0], rest[1], rest[2], rest[3]);
            let port = u16::from_be_bytes([rest[4], rest[5]]);
            (TargetAddr::ipv4(ip, port), 6)
        }

        SOCKS5_ATYP_DOMAIN => {
            let len = rest[0] as usize;
            if len == 0 {
                return Err(SocksError::EmptyDomain);
            }
            if rest.len() < 1 + len + 2 {
                return Err(SocksError::TruncatedDatagram);
            }
            let domain = &rest[1..1 + len];
            let domain = match std::str::from_utf8(domain) {
                Ok(s) if s.is_ascii() => s.to_owned(),
                _ => {
                    return Err(SocksError::InvalidDomain(
                        String::from_utf8_lossy(domain).into_owned(),
                    ))
                }
            };
            let port = u16::from_be_bytes([rest[1 + len], rest[2 + len]]);
            (TargetAddr::domain(domain, port), 1 + len + 2)
        }

        SOCKS5_ATYP_IPV6 => {
            if rest.len() < 18 {
                return Err(SocksError::TruncatedDatagram);
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&rest[..16]);
            let port = u16::from_be_bytes([rest[16], rest[17]]);
            (TargetAddr::ipv6(Ipv6Addr::from(octets), port), 18)
        }

        _ => return Err(SocksError::AddressTypeNotSupported(atyp)),
    };

    Ok((DatagramHeader { dst }, &buf[4 + consumed..]))
}

/// Append a response wrapper header for a datagram received from `src`
///
/// The relay appends the payload after this; RSV and FRAG are zero and the
/// ATYP follows the source endpoint's family.
pub fn put_response_header(out: &mut Vec<u8>, src: SocketAddr) {
    out.put_u16(0); // RSV
    out.put_u8(0); // FRAG
    match src {
        SocketAddr::V4(addr) => {
            out.put_u8(SOCKS5_ATYP_IPV4);
            out.put_slice(&addr.ip().octets());
            out.put_u16(addr.port());
        }
        SocketAddr::V6(addr) => {
            out.put_u8(SOCKS5_ATYP_IPV6);
            out.put_slice(&addr.ip().octets());
            out.put_u16(addr.port());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_datagram(ip: [u8; 4], port: u16, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0, 0, 0, SOCKS5_ATYP_IPV4];
        buf.extend_from_slice(&ip);
        buf.extend_from_slice(&port.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    fn domain_datagram(domain: &[u8], port: u16, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0, 0, 0, SOCKS5_ATYP_DOMAIN, domain.len() as u8];
        buf.extend_from_slice(domain);
        buf.extend_from_slice(&port.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_parse_datagram_ipv4() {
        let buf = ipv4_datagram([8, 8, 8, 8], 53, b"query");

        let (header, payload) = parse_datagram(&buf).unwrap();

        assert_eq!(
            header.dst,
            TargetAddr::ipv4(Ipv4Addr::new(8, 8, 8, 8), 53)
        );
        assert_eq!(payload, b"query");
    }

    #[test]
    fn test_parse_datagram_ipv6() {
        let mut buf = vec![0, 0, 0, SOCKS5_ATYP_IPV6];
        buf.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        buf.extend_from_slice(&53u16.to_be_bytes());
        buf.extend_from_slice(b"data");

        let (header, payload) = parse_datagram(&buf).unwrap();

        assert_eq!(header.dst, TargetAddr::ipv6(Ipv6Addr::LOCALHOST, 53));
        assert_eq!(payload, b"data");
    }

    #[test]
    fn test_parse_datagram_domain() {
        let buf = domain_datagram(b"example.org", 53, b"payload");

        let (header, payload) = parse_datagram(&buf).unwrap();

        assert_eq!(
            header.dst,
            TargetAddr::domain("example.org".to_string(), 53)
        );
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn test_parse_datagram_empty_payload() {
        let buf = ipv4_datagram([127, 0, 0, 1], 1234, b"");

        let (_, payload) = parse_datagram(&buf).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn test_parse_datagram_too_short() {
        for len in 0..MIN_UDP_WRAPPER_LEN {
            let buf = vec![0u8; len];
            let err = parse_datagram(&buf).unwrap_err();
            assert!(matches!(err, SocksError::DatagramTooShort(_)), "len {}", len);
        }
    }

    #[test]
    fn test_parse_datagram_nonzero_reserved() {
        let mut buf = ipv4_datagram([8, 8, 8, 8], 53, b"x");
        buf[1] = 0x01;

        let err = parse_datagram(&buf).unwrap_err();
        assert!(matches!(err, SocksError::InvalidDatagramReserved(1)));
    }

    #[test]
    fn test_parse_datagram_fragmented() {
        let mut buf = ipv4_datagram([8, 8, 8, 8], 53, b"x");
        buf[2] = 0x01;

        let err = parse_datagram(&buf).unwrap_err();
        assert!(matches!(err, SocksError::FragmentedDatagram(1)));
    }

    #[test]
    fn test_parse_datagram_bad_atyp() {
        let mut buf = ipv4_datagram([8, 8, 8, 8], 53, b"x");
        buf[3] = 0x02;

        let err = parse_datagram(&buf).unwrap_err();
        assert!(matches!(err, SocksError::AddressTypeNotSupported(0x02)));
    }

    #[test]
    fn test_parse_datagram_truncated_domain() {
        // Length byte claims 20 but only 4 bytes follow
        let buf = domain_datagram(b"example.org", 53, b"");
        let mut truncated = buf.clone();
        truncated[4] = 20;

        let err = parse_datagram(&truncated).unwrap_err();
        assert!(matches!(err, SocksError::TruncatedDatagram));
    }

    #[test]
    fn test_parse_datagram_truncated_ipv6() {
        let buf = vec![0, 0, 0, SOCKS5_ATYP_IPV6, 1, 2, 3, 4, 5, 6];

        let err = parse_datagram(&buf).unwrap_err();
        assert!(matches!(err, SocksError::TruncatedDatagram));
    }

    #[test]
    fn test_put_response_header_ipv4() {
        let src: SocketAddr = "8.8.8.8:53".parse().unwrap();
        let mut out = Vec::new();

        put_response_header(&mut out, src);

        assert_eq!(out, vec![0, 0, 0, SOCKS5_ATYP_IPV4, 8, 8, 8, 8, 0, 53]);
    }

    #[test]
    fn test_put_response_header_ipv6() {
        let src = SocketAddr::new(Ipv6Addr::LOCALHOST.into(), 4242);
        let mut out = Vec::new();

        put_response_header(&mut out, src);

        assert_eq!(out.len(), 2 + 1 + 1 + 16 + 2);
        assert_eq!(out[3], SOCKS5_ATYP_IPV6);
        assert_eq!(&out[4..20], &Ipv6Addr::LOCALHOST.octets());
        assert_eq!(&out[20..22], &4242u16.to_be_bytes());
    }

    #[test]
    fn test_response_header_round_trip() {
        let src: SocketAddr = "93.184.216.34:8080".parse().unwrap();
        let mut out = Vec::new();

        put_response_header(&mut out, src);
        out.extend_from_slice(b"response");

        let (header, payload) = parse_datagram(&out).unwrap();
        assert_eq!(header.dst, TargetAddr::Ip(src));
        assert_eq!(payload, b"response");
    }
}
