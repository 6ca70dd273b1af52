//! UDP ASSOCIATE relay
//!
//! One UDP socket per association, bound on an ephemeral port of the
//! address the client reached us on. The receive loop classifies every
//! datagram by source: wrapped client datagrams are unwrapped and
//! forwarded to their destination, everything else is wrapped and sent
//! back to the client's learned UDP endpoint.
//!
//! The client's UDP source port is usually not its TCP source port, so the
//! client is authenticated by IP address: the first datagram whose source
//! IP matches the TCP peer is adopted as the learned endpoint, and from
//! then on only that exact endpoint counts as the client.

use super::packet::{parse_datagram, put_response_header};
use crate::buffer::BufferPool;
use crate::dns::DnsCache;
use crate::error::SocksError;
use crate::names::FriendlyNames;
use crate::socks::types::TargetAddr;
use anyhow::{Context, Result};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// UDP relay bound for one client association
pub struct UdpAssociation {
    socket: UdpSocket,
    local_addr: SocketAddr,
    client_ip: IpAddr,
    learned_client: Option<SocketAddr>,
    dns: Arc<DnsCache>,
    buffers: Arc<BufferPool>,
    names: Arc<FriendlyNames>,
    cancel: CancellationToken,
}

impl UdpAssociation {
    /// Bind the relay socket on an ephemeral port of `relay_ip`
    ///
    /// `relay_ip` is the local address of the client's TCP connection, so
    /// the endpoint reported in the reply is one the client can reach.
    /// `client_ip` is the TCP peer address used to authorise datagrams.
    pub async fn bind(
        relay_ip: IpAddr,
        client_ip: IpAddr,
        dns: Arc<DnsCache>,
        buffers: Arc<BufferPool>,
        names: Arc<FriendlyNames>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(relay_ip, 0))
            .await
            .context("Failed to bind UDP relay socket")?;
        let local_addr = socket
            .local_addr()
            .context("Failed to read UDP relay socket address")?;

        Ok(UdpAssociation {
            socket,
            local_addr,
            client_ip,
            learned_client: None,
            dns,
            buffers,
            names,
            cancel,
        })
    }

    /// Local endpoint of the relay socket, reported in the reply
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the receive loop until cancelled
    ///
    /// Malformed, fragmented or unresolvable datagrams are dropped with a
    /// warning and the loop continues; only cancellation ends it.
    pub async fn run(mut self) -> Result<()> {
        let mut recv_buf = self.buffers.acquire();

        loop {
            let (len, src) = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(relay = %self.local_addr, "UDP relay cancelled");
                    return Ok(());
                }
                received = self.socket.recv_from(&mut recv_buf[..]) => match received {
                    Ok(received) => received,
                    Err(err) => {
                        warn!(relay = %self.local_addr, error = %err, "UDP receive failed");
                        continue;
                    }
                },
            };

            if self.is_from_client(src) {
                self.forward_to_remote(&recv_buf[..len]).await;
            } else {
                self.forward_to_client(&recv_buf[..len], src).await;
            }
        }
    }

    /// Classify a datagram source, adopting the first endpoint whose IP
    /// matches the client's TCP address
    fn is_from_client(&mut self, src: SocketAddr) -> bool {
        match self.learned_client {
            Some(learned) => src == learned,
            None => {
                if src.ip() == self.client_ip {
                    debug!(client_udp = %src, "Learned client UDP endpoint");
                    self.learned_client = Some(src);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Unwrap a client datagram and forward its payload to the destination
    async fn forward_to_remote(&self, datagram: &[u8]) {
        let (header, payload) = match parse_datagram(datagram) {
            Ok(decoded) => decoded,
            Err(SocksError::FragmentedDatagram(frag)) => {
                warn!(frag, "Dropping fragmented UDP datagram");
                return;
            }
            Err(err) => {
                warn!(error = %err, "Dropping malformed UDP datagram");
                return;
            }
        };

        let target = match header.dst {
            TargetAddr::Ip(addr) => addr,
            TargetAddr::Domain(ref host, port) => {
                match self.dns.resolve(host, port, &self.cancel).await {
                    Ok(addr) => addr,
                    Err(err) => {
                        warn!(host = %host, error = %err, "Dropping datagram, destination resolution failed");
                        return;
                    }
                }
            }
        };

        match self.socket.send_to(payload, target).await {
            Ok(_) => {
                debug!(
                    bytes = payload.len(),
                    destination = %format!("{}{}", target, self.names.suffix_for_addr(target)),
                    "Forwarded client datagram"
                );
            }
            Err(err) => {
                warn!(destination = %target, error = %err, "UDP forward failed");
            }
        }
    }

    /// Wrap a remote datagram and send it to the learned client endpoint
    ///
    /// Datagrams arriving before any client endpoint has been learned are
    /// dropped: the client's TCP source port is not a reliable UDP target.
    async fn forward_to_client(&self, payload: &[u8], src: SocketAddr) {
        let Some(client) = self.learned_client else {
            debug!(source = %src, "Dropping remote datagram, client UDP endpoint not yet learned");
            return;
        };

        debug!(
            source = %format!("{}{}", src, self.names.suffix_for_addr(src)),
            bytes = payload.len(),
            "Relaying remote datagram to client"
        );

        let mut wrapped = self.buffers.acquire();
        wrapped.clear();
        put_response_header(&mut wrapped, src);
        wrapped.extend_from_slice(payload);

        if let Err(err) = self.socket.send_to(&wrapped, client).await {
            warn!(client = %client, error = %err, "UDP send to client failed");
        }
    }
}
