//! Replay and flood-loop suppression.
//!
//! Broadcast-with-exclude floods the mesh, so every frame must be
//! idempotent under retransmission; this cache makes retransmissions
//! invisible. Keyed by SHA-256 of the signal payload, entries evict
//! themselves after the TTL. Purely advisory state: it does not survive
//! restart and does not need to.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sha2::{Digest, Sha256};

#[derive(Clone)]
pub(crate) struct DedupCache {
    ttl: Duration,
    seen: Arc<Mutex<HashSet<[u8; 32]>>>,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Check-and-insert. `true` means this payload is fresh and now claimed
    /// by the caller; concurrent workers racing on the same frame agree on
    /// exactly one winner.
    pub fn first_seen(&self, payload: &[u8]) -> bool {
        let hash: [u8; 32] = Sha256::digest(payload).into();
        if !self.seen.lock().unwrap().insert(hash) {
            return false;
        }

        let seen = Arc::clone(&self.seen);
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            seen.lock().unwrap().remove(&hash);
        });
        true
    }

    /// Read-only probe used by slot drains to drop duplicates early,
    /// before they occupy inbox capacity.
    pub fn contains(&self, payload: &[u8]) -> bool {
        let hash: [u8; 32] = Sha256::digest(payload).into();
        self.seen.lock().unwrap().contains(&hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_sighting_is_suppressed() {
        let cache = DedupCache::new(Duration::from_secs(10));
        assert!(cache.first_seen(b"payload"));
        assert!(!cache.first_seen(b"payload"));
        assert!(cache.first_seen(b"other payload"));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_evict_after_the_ttl() {
        let cache = DedupCache::new(Duration::from_secs(10));
        assert!(cache.first_seen(b"payload"));
        assert!(cache.contains(b"payload"));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!cache.contains(b"payload"));
        assert!(cache.first_seen(b"payload"));
    }

    #[tokio::test]
    async fn probe_does_not_claim() {
        let cache = DedupCache::new(Duration::from_secs(10));
        assert!(!cache.contains(b"payload"));
        assert!(cache.first_seen(b"payload"));
    }
}
