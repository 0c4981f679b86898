//! The slotted connection table.
//!
//! At most `slot_capacity` peers, each in exactly one state with monotonic
//! upgrades. The table owns each slot's bounded outbox sender; removing the
//! entry is the single close of that queue, which is what tears the
//! transport down. Reads (send, broadcast, lookups) share the lock;
//! mutations take it exclusively. Nothing awaits while holding it.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;

use veil_crypto::{MeshHash, MeshId};
use veil_signal::Signal;

use crate::MeshError;

/// Lifecycle of a peer slot. Upgrades only ever move right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PeerState {
    /// Attached but unproven; the drain admits only `TestChallenge`.
    Init,
    /// Passed the challenge; awaiting topology establishment.
    Verified,
    /// Full member: broadcast destination and eligible broker.
    Trusted,
}

struct Slot {
    mesh: MeshId,
    state: PeerState,
    outbox: mpsc::Sender<Signal>,
}

/// Outcome of a non-blocking enqueue.
pub(crate) enum SendOutcome {
    Sent,
    NoSlot,
    /// The queue is full; the peer is presumed hung.
    Overflow,
}

pub(crate) struct ConnectionTable {
    capacity: usize,
    outbox_capacity: usize,
    slots: RwLock<HashMap<MeshHash, Slot>>,
}

impl ConnectionTable {
    pub fn new(capacity: usize, outbox_capacity: usize) -> Self {
        Self {
            capacity,
            outbox_capacity,
            slots: RwLock::new(HashMap::with_capacity(capacity)),
        }
    }

    /// Book a slot for `mesh`. Returns the peer's hash and the receiver the
    /// link will drain.
    pub fn insert(
        &self,
        mesh: MeshId,
        trusted: bool,
    ) -> Result<(MeshHash, mpsc::Receiver<Signal>), MeshError> {
        let hash = mesh.hash();
        let mut slots = self.slots.write().unwrap();
        if slots.contains_key(&hash) {
            return Err(MeshError::AlreadyConnected);
        }
        if slots.len() >= self.capacity {
            return Err(MeshError::BusySlots);
        }
        let (outbox_tx, outbox_rx) = mpsc::channel(self.outbox_capacity);
        let state = if trusted {
            PeerState::Trusted
        } else {
            PeerState::Init
        };
        slots.insert(
            hash.clone(),
            Slot {
                mesh,
                state,
                outbox: outbox_tx,
            },
        );
        Ok((hash, outbox_rx))
    }

    /// Remove a slot, dropping its outbox sender. Idempotent.
    pub fn remove(&self, hash: &MeshHash) -> bool {
        self.slots.write().unwrap().remove(hash).is_some()
    }

    /// Drop every slot at once (shutdown).
    pub fn clear(&self) {
        self.slots.write().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.slots.read().unwrap().len()
    }

    pub fn state_of(&self, hash: &MeshHash) -> Option<PeerState> {
        self.slots.read().unwrap().get(hash).map(|s| s.state)
    }

    pub fn mesh_by_hash(&self, hash: &MeshHash) -> Option<MeshId> {
        self.slots.read().unwrap().get(hash).map(|s| s.mesh.clone())
    }

    /// Raise a slot's state. Downgrades are ignored.
    pub fn upgrade(&self, hash: &MeshHash, state: PeerState) -> bool {
        let mut slots = self.slots.write().unwrap();
        match slots.get_mut(hash) {
            Some(slot) if state > slot.state => {
                slot.state = state;
                true
            }
            _ => false,
        }
    }

    pub fn send(&self, hash: &MeshHash, signal: Signal) -> SendOutcome {
        let slots = self.slots.read().unwrap();
        let Some(slot) = slots.get(hash) else {
            return SendOutcome::NoSlot;
        };
        match slot.outbox.try_send(signal) {
            Ok(()) => SendOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::Overflow,
            // Receiver already gone: the link is mid-teardown.
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::NoSlot,
        }
    }

    /// Enqueue on every Trusted slot not listed in `exclude`. Returns the
    /// peers whose queues overflowed so the caller can disconnect them.
    pub fn broadcast(&self, signal: &Signal, exclude: &[&MeshHash]) -> Vec<MeshHash> {
        let slots = self.slots.read().unwrap();
        let mut overflowed = Vec::new();
        for (hash, slot) in slots.iter() {
            if slot.state < PeerState::Trusted || exclude.contains(&hash) {
                continue;
            }
            if let Err(mpsc::error::TrySendError::Full(_)) = slot.outbox.try_send(signal.clone()) {
                overflowed.push(hash.clone());
            }
        }
        overflowed
    }
}
