//! Node configuration and the authoritative timeout table.

use std::time::Duration;

/// Tunables for a mesh node. The defaults are the protocol constants; tests
/// shrink the timeouts to keep scenarios fast.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Maximum simultaneous peers.
    pub slot_capacity: usize,
    /// Dispatcher worker count.
    pub workers: usize,
    /// Per-slot outbound queue depth; overflow is read as a hung peer.
    pub outbox_capacity: usize,
    /// Global inbox depth shared by all slots.
    pub inbox_capacity: usize,
    /// ICE servers handed to the WebRTC connector.
    pub stun_urls: Vec<String>,
    /// Ceiling on brokered channels per admission.
    pub max_brokered: usize,

    /// How long a replayed payload hash keeps suppressing frames.
    pub dedup_ttl: Duration,
    /// Verifier's wait for the echoed challenge.
    pub challenge_timeout: Duration,
    /// Orchestrator's window for collecting broker invites.
    pub invite_collect_timeout: Duration,
    /// Per-broker wait for the collection latch before abandoning.
    pub broker_latch_timeout: Duration,
    /// Per-required-connection unit of the offer/answer/confirm budget.
    pub settle_unit: Duration,
    /// Broker's wait for the newcomer's offer.
    pub broker_offer_timeout: Duration,
    /// Newcomer's wait for a broker's answer.
    pub answer_timeout: Duration,
    /// Newcomer's wait for the connection secret on a fresh channel.
    pub secret_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            slot_capacity: 10,
            workers: std::thread::available_parallelism().map_or(4, |n| n.get()),
            outbox_capacity: 256,
            inbox_capacity: 1024,
            stun_urls: vec!["stun:stun.l.google.com:19302".to_string()],
            max_brokered: 5,
            dedup_ttl: Duration::from_secs(10),
            challenge_timeout: Duration::from_secs(3),
            invite_collect_timeout: Duration::from_secs(30),
            broker_latch_timeout: Duration::from_secs(30),
            settle_unit: Duration::from_secs(10),
            broker_offer_timeout: Duration::from_secs(20),
            answer_timeout: Duration::from_secs(10),
            secret_timeout: Duration::from_secs(5),
        }
    }
}

impl NodeConfig {
    /// Total budget for the offer/answer/confirm phase of one admission.
    pub fn settle_budget(&self, min_required: usize) -> Duration {
        self.settle_unit * min_required.max(1) as u32
    }
}
