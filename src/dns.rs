//! DNS cache for UDP relay destinations
//!
//! Domain destinations in UDP wrappers are resolved through a process-wide
//! cache so a burst of datagrams to the same name does one lookup. Entries
//! expire by TTL and the cache is bounded by an LRU policy.

use anyhow::{bail, Context, Result};
use lru::LruCache;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default maximum number of cached names
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Default time-to-live for a cached resolution
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    addrs: Vec<IpAddr>,
    expires_at: Instant,
}

/// Bounded name-to-address cache with time-based expiry
///
/// Shared across all UDP associations as `Arc<DnsCache>`. The inner lock
/// is only held for map operations, never across an await.
pub struct DnsCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl DnsCache {
    /// Create a cache with the given capacity and TTL
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least one");
        DnsCache {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Create a cache with the default capacity and TTL
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }

    /// Resolve `host` to a socket address with the given port
    ///
    /// Serves from the cache when a live entry exists; otherwise performs
    /// an asynchronous lookup, cancellable through `cancel`, and caches the
    /// full result set. IPv4 results are preferred, falling back to the
    /// first address of any family.
    pub async fn resolve(
        &self,
        host: &str,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<SocketAddr> {
        let key = host.to_ascii_lowercase();

        if let Some(ip) = self.cached(&key) {
            return Ok(SocketAddr::new(ip, port));
        }

        let addrs: Vec<IpAddr> = tokio::select! {
            _ = cancel.cancelled() => bail!("resolution of {} cancelled", host),
            resolved = tokio::net::lookup_host((host, port)) => resolved
                .with_context(|| format!("Failed to resolve domain: {}", host))?
                .map(|addr| addr.ip())
                .collect(),
        };

        let Some(ip) = pick_address(&addrs) else {
            bail!("No addresses found for domain: {}", host);
        };

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.put(
            key,
            CacheEntry {
                addrs,
                expires_at: Instant::now() + self.ttl,
            },
        );

        Ok(SocketAddr::new(ip, port))
    }

    fn cached(&self, key: &str) -> Option<IpAddr> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => pick_address(&entry.addrs),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }
}

/// Prefer the first IPv4 address, else the first of any family
fn pick_address(addrs: &[IpAddr]) -> Option<IpAddr> {
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}
