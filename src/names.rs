//! Friendly names for logged endpoints
//!
//! The configuration may map IP literals to human-readable labels. Every
//! log site that prints an endpoint appends ` (Label)` when the address is
//! mapped. This module is the only place that logic lives; it has no
//! behavioural effect on proxying.

use crate::config::IpMapping;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use tracing::warn;

/// Longest accepted friendly name
const MAX_LABEL_LEN: usize = 64;

/// Read-only IP-to-label lookup
///
/// Built once at startup and shared as `Arc<FriendlyNames>`; never mutated
/// afterwards, so it is readable from any task without synchronisation.
#[derive(Debug, Default)]
pub struct FriendlyNames {
    labels: HashMap<IpAddr, String>,
}

impl FriendlyNames {
    /// An empty map; every query yields an empty suffix
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the map from configured mappings
    ///
    /// Entries with unparseable IP literals or labels outside 1..=64
    /// characters are dropped, summarised in one warning. Duplicate
    /// literals resolve last-wins, also summarised in one warning. Keys
    /// are the parsed addresses, so textual variants of the same IPv6
    /// address collapse onto one entry.
    pub fn from_mappings(mappings: &[IpMapping]) -> Self {
        let mut labels = HashMap::new();
        let mut invalid = Vec::new();
        let mut duplicates = Vec::new();

        for mapping in mappings {
            let label_len = mapping.friendly_name.chars().count();
            let parsed = mapping.ip_address.parse::<IpAddr>();

            match parsed {
                Ok(ip) if (1..=MAX_LABEL_LEN).contains(&label_len) => {
                    if labels.insert(ip, mapping.friendly_name.clone()).is_some() {
                        duplicates.push(mapping.ip_address.clone());
                    }
                }
                _ => invalid.push(mapping.ip_address.clone()),
            }
        }

        if !invalid.is_empty() {
            warn!(entries = ?invalid, "Dropping invalid IP address mappings");
        }
        if !duplicates.is_empty() {
            warn!(entries = ?duplicates, "Duplicate IP address mappings, last entry wins");
        }

        FriendlyNames { labels }
    }

    /// Suffix for an IP address: `" (Label)"` or the empty string
    pub fn suffix_for(&self, ip: IpAddr) -> String {
        self.labels
            .get(&ip)
            .map(|label| format!(" ({})", label))
            .unwrap_or_default()
    }

    /// Suffix for an endpoint, keyed by its address part
    pub fn suffix_for_addr(&self, addr: SocketAddr) -> String {
        self.suffix_for(addr.ip())
    }

    /// Suffix for a textual address; unparseable input yields the empty
    /// string, so domain names are never decorated
    pub fn suffix_for_str(&self, text: &str) -> String {
        text.parse::<IpAddr>()
            .map(|ip| self.suffix_for(ip))
            .unwrap_or_default()
    }
}
