//! SOCKS5 protocol constants

/// SOCKS5 protocol version
pub const SOCKS5_VERSION: u8 = 0x05;

// Authentication methods
/// No authentication required
pub const SOCKS5_METHOD_NO_AUTH: u8 = 0x00;
/// No acceptable methods
pub const SOCKS5_METHOD_NO_ACCEPTABLE: u8 = 0xFF;

// Commands
/// TCP CONNECT command
pub const SOCKS5_CMD_CONNECT: u8 = 0x01;
/// TCP BIND command (not implemented)
pub const SOCKS5_CMD_BIND: u8 = 0x02;
/// UDP ASSOCIATE command
pub const SOCKS5_CMD_UDP_ASSOCIATE: u8 = 0x03;

// Address types
/// IPv4 address
pub const SOCKS5_ATYP_IPV4: u8 = 0x01;
/// Domain name
pub const SOCKS5_ATYP_DOMAIN: u8 = 0x03;
/// IPv6 address
pub const SOCKS5_ATYP_IPV6: u8 = 0x04;

/// Reserved byte value (always 0x00)
pub const SOCKS5_RESERVED: u8 = 0x00;

/// Maximum domain name length in a request or UDP wrapper
pub const MAX_DOMAIN_LEN: usize = 255;

/// Minimum length of a UDP wrapper: RSV(2) + FRAG(1) + ATYP(1) + IPv4(4) + PORT(2)
pub const MIN_UDP_WRAPPER_LEN: usize = 10;
