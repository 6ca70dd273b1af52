//! Bidirectional TCP tunnel
//!
//! After a successful CONNECT the handler hands both sockets to this
//! module, which pumps bytes in both directions until either side closes.
//! Each direction is an independent reader/writer pair joined by an
//! in-order chunk queue with a byte gauge: the reader pauses once too many
//! bytes are pending downstream and resumes when the writer has drained
//! them, so a slow peer cannot make the proxy buffer without bound.

use bytes::{Bytes, BytesMut};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, Instrument};

/// Pending-byte level at which a direction's reader pauses
pub const PAUSE_PENDING_BYTES: usize = 64 * 1024;

/// Pending-byte level at which a paused reader resumes
pub const RESUME_PENDING_BYTES: usize = 32 * 1024;

/// Read segment size
const READ_SEGMENT: usize = 4 * 1024;

/// How long to wait for the second direction after the first one ends
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Byte totals moved through a finished tunnel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelStats {
    /// Bytes forwarded from the client to the upstream peer
    pub client_to_upstream: u64,
    /// Bytes forwarded from the upstream peer to the client
    pub upstream_to_client: u64,
}

/// Pump bytes between the client and the upstream until one side closes
///
/// Either direction finishing naturally (EOF or a socket error) cancels
/// `cancel`, which winds down the other direction. If the other direction
/// has not completed within the grace window its task is aborted, which
/// drops and thereby closes the socket halves.
pub async fn run(client: TcpStream, upstream: TcpStream, cancel: CancellationToken) -> TunnelStats {
    let (client_read, client_write) = client.into_split();
    let (upstream_read, upstream_write) = upstream.into_split();

    let mut client_to_upstream = tokio::spawn(
        run_direction(
            "client->upstream",
            client_read,
            upstream_write,
            cancel.clone(),
        )
        .in_current_span(),
    );
    let mut upstream_to_client = tokio::spawn(
        run_direction(
            "upstream->client",
            upstream_read,
            client_write,
            cancel.clone(),
        )
        .in_current_span(),
    );

    let mut stats = TunnelStats::default();

    // Wait for the first direction to finish, then give the other one a
    // bounded grace window before closing its sockets out from under it.
    tokio::select! {
        finished = &mut client_to_upstream => {
            stats.client_to_upstream = reap("client->upstream", finished);
            stats.upstream_to_client =
                reap_with_grace("upstream->client", upstream_to_client).await;
        }
        finished = &mut upstream_to_client => {
            stats.upstream_to_client = reap("upstream->client", finished);
            stats.client_to_upstream =
                reap_with_grace("client->upstream", client_to_upstream).await;
        }
    }

    stats
}

fn reap(label: &str, finished: Result<u64, tokio::task::JoinError>) -> u64 {
    match finished {
        Ok(bytes) => bytes,
        Err(join_err) => {
            error!(direction = label, error = %join_err, "Tunnel direction task failed");
            0
        }
    }
}

async fn reap_with_grace(label: &str, mut handle: tokio::task::JoinHandle<u64>) -> u64 {
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
        Ok(finished) => reap(label, finished),
        Err(_elapsed) => {
            debug!(direction = label, "Tunnel direction did not stop within grace, aborting");
            handle.abort();
            match handle.await {
                Ok(bytes) => bytes,
                Err(_) => 0,
            }
        }
    }
}

/// One direction of the tunnel: a reader and a writer pump joined by an
/// in-order chunk queue.
///
/// Returns the number of bytes moved. Completing for any reason other
/// than cancellation cancels the shared token so the opposite direction
/// winds down too.
async fn run_direction(
    label: &'static str,
    read_half: OwnedReadHalf,
    write_half: OwnedWriteHalf,
    cancel: CancellationToken,
) -> u64 {
    let gauge = Arc::new(Gauge::new());
    let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();

    let reader = pump_reader(read_half, chunk_tx, gauge.clone(), cancel.clone());
    let writer = pump_writer(write_half, chunk_rx, gauge, cancel.clone());
    let ((bytes, read_result), write_result) = tokio::join!(reader, writer);

    match read_result {
        Ok(()) => debug!(direction = label, bytes, "Tunnel direction finished"),
        Err(err) => debug!(direction = label, bytes, error = %err, "Tunnel read side ended"),
    }
    if let Err(err) = write_result {
        debug!(direction = label, error = %err, "Tunnel write side ended");
    }

    cancel.cancel();
    bytes
}

/// Pending-byte gauge shared by a direction's two pumps
struct Gauge {
    pending: AtomicUsize,
    resume: Notify,
}

impl Gauge {
    fn new() -> Self {
        Gauge {
            pending: AtomicUsize::new(0),
            resume: Notify::new(),
        }
    }
}

async fn pump_reader(
    mut read_half: OwnedReadHalf,
    chunk_tx: mpsc::UnboundedSender<Bytes>,
    gauge: Arc<Gauge>,
    cancel: CancellationToken,
) -> (u64, io::Result<()>) {
    let mut total = 0u64;

    loop {
        // Pause while the writer is behind. The notified future is armed
        // before the re-check so a concurrent drain cannot be missed.
        while gauge.pending.load(Ordering::Acquire) >= PAUSE_PENDING_BYTES {
            let resumed = gauge.resume.notified();
            tokio::pin!(resumed);
            resumed.as_mut().enable();
            if gauge.pending.load(Ordering::Acquire) < PAUSE_PENDING_BYTES {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => return (total, Ok(())),
                _ = &mut resumed => {}
            }
        }

        let mut chunk = BytesMut::with_capacity(READ_SEGMENT);
        let read = tokio::select! {
            _ = cancel.cancelled() => return (total, Ok(())),
            read = read_half.read_buf(&mut chunk) => read,
        };

        match read {
            Ok(0) => return (total, Ok(())),
            Ok(n) => {
                total += n as u64;
                gauge.pending.fetch_add(n, Ordering::AcqRel);
                if chunk_tx.send(chunk.freeze()).is_err() {
                    // Writer gone; nothing left to feed.
                    return (total, Ok(()));
                }
            }
            Err(err) => return (total, Err(err)),
        }
    }
}

async fn pump_writer(
    mut write_half: OwnedWriteHalf,
    mut chunk_rx: mpsc::UnboundedReceiver<Bytes>,
    gauge: Arc<Gauge>,
    cancel: CancellationToken,
) -> io::Result<()> {
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = chunk_rx.recv() => match chunk {
                Some(chunk) => chunk,
                // Reader finished; queue fully drained.
                None => break,
            },
        };

        let written = write_half.write_all(&chunk).await;

        let drained = gauge.pending.fetch_sub(chunk.len(), Ordering::AcqRel) - chunk.len();
        if drained <= RESUME_PENDING_BYTES {
            gauge.resume.notify_waiters();
        }

        if let Err(err) = written {
            // Wake a reader paused at the watermark; this direction is dead.
            cancel.cancel();
            return Err(err);
        }
    }

    // Propagate the close downstream.
    let _ = write_half.shutdown().await;
    Ok(())
}
