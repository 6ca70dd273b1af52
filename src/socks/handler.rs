//! Per-connection handler
//!
//! Drives one accepted client socket through the protocol phases:
//! method negotiation, request parsing, then either a TCP tunnel or a UDP
//! association watchdog. Phases are strictly sequential; no tunnel byte is
//! read before the reply has been written.

use super::handshake;
use super::reply::send_reply;
use super::request::{self, Request};
use super::tunnel;
use super::types::{SocksCommand, TargetAddr};
use super::udp::UdpAssociation;
use crate::buffer::BufferPool;
use crate::dns::DnsCache;
use crate::error::ReplyCode;
use crate::names::FriendlyNames;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Idle timeout for control-plane reads (handshake and request)
///
/// Tunnel and relay data paths have no read timeout; an established tunnel
/// may stay idle arbitrarily long.
const CONTROL_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the upstream TCP connect
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared dependencies handed to every connection handler
#[derive(Clone)]
pub struct HandlerContext {
    /// Friendly-name lookup for log decoration
    pub names: Arc<FriendlyNames>,
    /// Process-wide DNS cache
    pub dns: Arc<DnsCache>,
    /// Process-wide buffer pool
    pub buffers: Arc<BufferPool>,
}

/// Handle one accepted client connection to completion
///
/// Every exit path closes the client socket and whatever upstream
/// resource the connection acquired. Cancellation is a silent normal
/// closure; protocol and socket errors are returned for the per-connection
/// log scope.
pub async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: HandlerContext,
    cancel: CancellationToken,
) -> Result<()> {
    let negotiated = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        negotiated = timeout(CONTROL_READ_TIMEOUT, handshake::negotiate(&mut stream)) => negotiated,
    };
    match negotiated {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(err).context("Method negotiation failed"),
        Err(_elapsed) => {
            debug!("Handshake timed out");
            return Ok(());
        }
    }

    let parsed = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        parsed = timeout(CONTROL_READ_TIMEOUT, request::read_request(&mut stream)) => parsed,
    };
    let request = match parsed {
        Ok(Ok(request)) => request,
        Ok(Err(err)) => {
            // Exactly one reply, then close.
            let _ = send_reply(&mut stream, err.reply_code(), None).await;
            return Err(err).context("Request parsing failed");
        }
        Err(_elapsed) => {
            debug!("Request read timed out");
            return Ok(());
        }
    };

    info!(
        command = %request.command,
        destination = %decorate_target(&request.addr, &ctx.names),
        "Request received"
    );

    match request.command {
        SocksCommand::Connect => handle_connect(stream, request, &ctx, &cancel).await,
        SocksCommand::UdpAssociate => handle_udp_associate(stream, peer, &ctx, &cancel).await,
        SocksCommand::Bind => {
            warn!("BIND command not supported");
            send_reply(&mut stream, ReplyCode::CommandNotSupported, None)
                .await
                .context("Failed to send reply")?;
            Ok(())
        }
    }
}

/// CONNECT: open the upstream, reply, then tunnel
async fn handle_connect(
    mut stream: TcpStream,
    request: Request,
    ctx: &HandlerContext,
    cancel: &CancellationToken,
) -> Result<()> {
    let target = match request.addr {
        TargetAddr::Ip(addr) => addr,
        TargetAddr::Domain(ref host, port) => {
            match ctx.dns.resolve(host, port, cancel).await {
                Ok(addr) => addr,
                Err(err) => {
                    send_reply(&mut stream, ReplyCode::HostUnreachable, None)
                        .await
                        .context("Failed to send reply")?;
                    return Err(err).context("Destination resolution failed");
                }
            }
        }
    };

    let connected = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        connected = timeout(CONNECT_TIMEOUT, TcpStream::connect(target)) => connected,
    };
    let upstream = match connected {
        Ok(Ok(upstream)) => upstream,
        Ok(Err(err)) => {
            let code = ReplyCode::from(&err);
            debug!(destination = %target, reply = ?code, error = %err, "Upstream connect failed");
            send_reply(&mut stream, code, None)
                .await
                .context("Failed to send reply")?;
            return Err(err).context("Upstream connect failed");
        }
        Err(_elapsed) => {
            debug!(destination = %target, "Upstream connect timed out");
            send_reply(&mut stream, ReplyCode::TtlExpired, None)
                .await
                .context("Failed to send reply")?;
            return Ok(());
        }
    };

    if let Err(err) = upstream.set_nodelay(true) {
        debug!(error = %err, "Failed to disable Nagle on upstream socket");
    }

    let bound = upstream
        .local_addr()
        .context("Failed to read upstream local address")?;
    send_reply(&mut stream, ReplyCode::Succeeded, Some(bound))
        .await
        .context("Failed to send reply")?;

    info!(
        destination = %format!("{}{}", target, ctx.names.suffix_for_addr(target)),
        "Tunnel established"
    );

    let stats = tunnel::run(stream, upstream, cancel.child_token()).await;

    info!(
        sent = stats.client_to_upstream,
        received = stats.upstream_to_client,
        "Tunnel closed"
    );

    Ok(())
}

/// UDP ASSOCIATE: bind a relay, reply, then watch the TCP socket
///
/// The association lives exactly as long as this TCP connection: when the
/// client closes it (or the server shuts down), the relay is cancelled and
/// awaited before the handler returns.
async fn handle_udp_associate(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: &HandlerContext,
    cancel: &CancellationToken,
) -> Result<()> {
    let relay_ip = stream
        .local_addr()
        .context("Failed to read connection local address")?
        .ip();

    let relay_cancel = cancel.child_token();
    let association = match UdpAssociation::bind(
        relay_ip,
        peer.ip(),
        ctx.dns.clone(),
        ctx.buffers.clone(),
        ctx.names.clone(),
        relay_cancel.clone(),
    )
    .await
    {
        Ok(association) => association,
        Err(err) => {
            send_reply(&mut stream, ReplyCode::GeneralFailure, None)
                .await
                .context("Failed to send reply")?;
            return Err(err).context("UDP relay bind failed");
        }
    };

    let relay_addr = association.local_addr();
    send_reply(&mut stream, ReplyCode::Succeeded, Some(relay_addr))
        .await
        .context("Failed to send reply")?;

    info!(relay = %relay_addr, "UDP association established");

    let relay_task = tokio::spawn(
        async move {
            if let Err(err) = association.run().await {
                warn!(error = %err, "UDP relay failed");
            }
        }
        .in_current_span(),
    );

    // Watchdog: the TCP connection only signals lifetime now. Stray bytes
    // are discarded; EOF or error tears the association down.
    let mut sink = [0u8; 64];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            read = stream.read(&mut sink) => match read {
                Ok(0) => {
                    debug!("Client closed the association connection");
                    break;
                }
                Ok(_) => continue,
                Err(err) => {
                    debug!(error = %err, "Association connection failed");
                    break;
                }
            },
        }
    }

    relay_cancel.cancel();
    if relay_task.await.is_err() {
        warn!("UDP relay task panicked");
    }

    info!(relay = %relay_addr, "UDP association closed");

    Ok(())
}

fn decorate_target(addr: &TargetAddr, names: &FriendlyNames) -> String {
    match addr {
        TargetAddr::Ip(socket_addr) => {
            format!("{}{}", socket_addr, names.suffix_for_addr(*socket_addr))
        }
        TargetAddr::Domain(_, _) => addr.to_string(),
    }
}
