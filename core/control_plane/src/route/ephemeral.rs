//! Expiry-ordered table of time-limited routes
//!
//! Entries are kept sorted by ascending `expires_at` so the eviction loop
//! only ever has to look at the front. Matching ignores expiry: an entry
//! stays matchable until the eviction loop actually removes it.

use std::time::Instant;

use ipnet::IpNet;

use super::EphemeralItem;

/// Ephemeral entries, soonest expiry first
#[derive(Debug, Clone, Default)]
pub struct EphemeralTable {
    items: Vec<EphemeralItem>,
}

impl EphemeralTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping ascending expiry order (after equal expiries)
    pub fn add(&mut self, item: EphemeralItem) {
        let idx = self
            .items
            .partition_point(|e| e.expires_at <= item.expires_at);
        self.items.insert(idx, item);
    }

    /// The earliest-expiring entry
    pub fn front(&self) -> Option<&EphemeralItem> {
        self.items.first()
    }

    /// Remove and return the front entry if it has expired at `now`
    pub fn pop_expired(&mut self, now: Instant) -> Option<EphemeralItem> {
        if self.items.first()?.is_expired(now) {
            Some(self.items.remove(0))
        } else {
            None
        }
    }

    /// Remove the entry whose canonical CIDR equals `cidr`
    pub fn remove(&mut self, cidr: &str) -> Option<EphemeralItem> {
        let idx = self.items.iter().position(|e| e.cidr() == cidr)?;
        Some(self.items.remove(idx))
    }

    /// First held entry that contains or is contained by `target`
    pub fn match_net(&self, target: &IpNet) -> Option<&EphemeralItem> {
        self.items.iter().find(|e| e.item.matches(target))
    }

    pub fn iter(&self) -> impl Iterator<Item = &EphemeralItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
