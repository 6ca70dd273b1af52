//! Shared helpers for the end-to-end tests
//!
//! Spawns a proxy on an ephemeral port plus the TCP/UDP echo peers the
//! scenarios talk to, and builds raw protocol frames.

#![allow(dead_code)]

use socks5proxy::{FriendlyNames, Server};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;

/// Start a proxy on an ephemeral loopback port
pub async fn spawn_proxy() -> (
    SocketAddr,
    CancellationToken,
    tokio::task::JoinHandle<anyhow::Result<()>>,
) {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
    let server = Server::bind(addr, Arc::new(FriendlyNames::empty()))
        .await
        .unwrap();
    let local = server.local_addr();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(server.run(cancel.clone()));
    (local, cancel, task)
}

/// Start a TCP echo server on an ephemeral loopback port
pub async fn spawn_tcp_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 8192];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

/// Start a UDP echo server; returns its endpoint
pub async fn spawn_udp_echo() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = [0u8; 65535];
        while let Ok((len, from)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..len], from).await;
        }
    });

    addr
}

/// Connect to the proxy and complete a no-auth handshake
pub async fn connect_and_handshake(proxy: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x00]);

    stream
}

/// Build a CONNECT request for an IPv4 endpoint
pub fn connect_request(target: SocketAddr) -> Vec<u8> {
    request_bytes(0x01, target)
}

/// Build a UDP ASSOCIATE request (client endpoint all zeros)
pub fn associate_request() -> Vec<u8> {
    vec![0x05, 0x03, 0x00, 0x01, 0, 0, 0, 0, 0, 0]
}

/// Build a request frame with the given command byte
pub fn request_bytes(command: u8, target: SocketAddr) -> Vec<u8> {
    let mut request = vec![0x05, command, 0x00];
    match target {
        SocketAddr::V4(addr) => {
            request.push(0x01);
            request.extend_from_slice(&addr.ip().octets());
        }
        SocketAddr::V6(addr) => {
            request.push(0x04);
            request.extend_from_slice(&addr.ip().octets());
        }
    }
    request.extend_from_slice(&target.port().to_be_bytes());
    request
}

/// Build a CONNECT request for a domain destination
pub fn connect_request_domain(domain: &str, port: u16) -> Vec<u8> {
    let mut request = vec![0x05, 0x01, 0x00, 0x03, domain.len() as u8];
    request.extend_from_slice(domain.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    request
}

/// Read a reply frame; returns the REP code and the bound endpoint
pub async fn read_reply(stream: &mut TcpStream) -> (u8, SocketAddr) {
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.unwrap();
    assert_eq!(head[0], 0x05, "reply version");
    assert_eq!(head[2], 0x00, "reply reserved byte");

    let addr = match head[3] {
        0x01 => {
            let mut body = [0u8; 6];
            stream.read_exact(&mut body).await.unwrap();
            let ip = Ipv4Addr::new(body[0], body[1], body[2], body[3]);
            SocketAddr::new(IpAddr::V4(ip), u16::from_be_bytes([body[4], body[5]]))
        }
        0x04 => {
            let mut body = [0u8; 18];
            stream.read_exact(&mut body).await.unwrap();
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&body[..16]);
            SocketAddr::new(
                IpAddr::V6(octets.into()),
                u16::from_be_bytes([body[16], body[17]]),
            )
        }
        other => panic!("unexpected reply ATYP: {:#04x}", other),
    };

    (head[1], addr)
}

/// Wrap a payload in a UDP request header for an IPv4 destination
pub fn wrap_udp(dst: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut datagram = vec![0x00, 0x00, 0x00];
    match dst {
        SocketAddr::V4(addr) => {
            datagram.push(0x01);
            datagram.extend_from_slice(&addr.ip().octets());
        }
        SocketAddr::V6(addr) => {
            datagram.push(0x04);
            datagram.extend_from_slice(&addr.ip().octets());
        }
    }
    datagram.extend_from_slice(&dst.port().to_be_bytes());
    datagram.extend_from_slice(payload);
    datagram
}
