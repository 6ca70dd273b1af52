//! Acceptor and connection supervisor
//!
//! Binds the listening socket, spawns one handler task per accepted
//! connection, tracks them in a concurrent registry, and coordinates
//! graceful shutdown: cancel children, close the listener, wait a bounded
//! drain window, then abort whatever is left.

use crate::buffer::BufferPool;
use crate::config::ProxyConfig;
use crate::dns::DnsCache;
use crate::names::FriendlyNames;
use crate::socks::{handle_connection, HandlerContext};
use anyhow::{Context, Result};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Backoff after a failed accept, so a persistent error cannot spin
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// How long shutdown waits for handlers before force-closing them
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The listening SOCKS5 server
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    ctx: HandlerContext,
}

impl Server {
    /// Bind the listener from a validated configuration
    ///
    /// A bind failure is fatal and surfaces to the entry point.
    pub async fn from_config(config: &ProxyConfig, names: Arc<FriendlyNames>) -> Result<Self> {
        Self::bind(config.listen_addr()?, names).await
    }

    /// Bind the listener on an explicit address
    pub async fn bind(addr: SocketAddr, names: Arc<FriendlyNames>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind listener on {}", addr))?;
        let local_addr = listener
            .local_addr()
            .context("Failed to read listener address")?;

        Ok(Server {
            listener,
            local_addr,
            ctx: HandlerContext {
                names,
                dns: Arc::new(DnsCache::with_defaults()),
                buffers: BufferPool::with_defaults(),
            },
        })
    }

    /// Local endpoint of the listener
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until cancelled, then drain and return
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let Server {
            listener,
            local_addr,
            ctx,
        } = self;

        info!(
            listen = %format!("{}{}", local_addr, ctx.names.suffix_for_addr(local_addr)),
            "SOCKS5 proxy listening"
        );

        let registry: Arc<DashMap<u64, SocketAddr>> = Arc::new(DashMap::new());
        let mut handlers = JoinSet::new();
        let mut next_id: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutdown requested, stopping listener");
                    break;
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(err) = stream.set_nodelay(true) {
                            debug!(error = %err, "Failed to disable Nagle on client socket");
                        }

                        next_id += 1;
                        let id = next_id;
                        registry.insert(id, peer);

                        let client = format!("{}{}", peer, ctx.names.suffix_for_addr(peer));
                        let span = info_span!("conn", id, client = %client);
                        let ctx = ctx.clone();
                        let token = cancel.child_token();
                        let guard = ConnGuard {
                            registry: registry.clone(),
                            id,
                        };

                        handlers.spawn(
                            async move {
                                let _guard = guard;
                                info!("Connection accepted");
                                match handle_connection(stream, peer, ctx, token).await {
                                    Ok(()) => debug!("Connection closed"),
                                    Err(err) => debug!(error = %format!("{:#}", err), "Connection closed with error"),
                                }
                            }
                            .instrument(span),
                        );
                    }
                    Err(err) => {
                        warn!(error = %err, "Accept failed, backing off");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                        }
                    }
                },

                // Reap finished handlers as we go; a panic is logged and
                // never takes the process down.
                Some(finished) = handlers.join_next(), if !handlers.is_empty() => {
                    reap_handler(finished);
                }
            }
        }

        // Stop accepting before draining.
        drop(listener);

        let drained = tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, async {
            while let Some(finished) = handlers.join_next().await {
                reap_handler(finished);
            }
        })
        .await;

        if drained.is_err() {
            let remaining: Vec<SocketAddr> =
                registry.iter().map(|entry| *entry.value()).collect();
            warn!(
                count = remaining.len(),
                clients = ?remaining,
                "Handlers still running after drain timeout, force-closing"
            );
            handlers.abort_all();
            while let Some(finished) = handlers.join_next().await {
                reap_handler(finished);
            }
        }

        info!("All connections closed");
        Ok(())
    }
}

fn reap_handler(finished: Result<(), tokio::task::JoinError>) {
    if let Err(err) = finished {
        if err.is_panic() {
            error!(error = %err, "Connection handler panicked");
        }
    }
}

/// Removes the registry entry on every handler exit path, panics included
struct ConnGuard {
    registry: Arc<DashMap<u64, SocketAddr>>,
    id: u64,
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}
