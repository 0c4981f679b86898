//! The node value everything hangs off.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use veil_crypto::{Identity, MeshHash, MeshId};
use veil_signal::{Income, Signal, SignalKind};
use veil_transport::{LinkContext, LinkFactory, RtcConnector};

use crate::dedup::DedupCache;
use crate::dispatcher;
use crate::reactions::{ReactionRegistry, ReactionToken};
use crate::table::{ConnectionTable, PeerState, SendOutcome};
use crate::{bootstrap, MeshError, NodeConfig};

/// One mesh node: identity, connection table, reaction registry, dedup
/// cache, and the dispatcher inbox. Constructed once, shared as an `Arc`,
/// and passed explicitly; tests run several nodes in one process.
pub struct MeshNode {
    pub(crate) identity: Identity,
    pub(crate) config: NodeConfig,
    pub(crate) table: ConnectionTable,
    pub(crate) reactions: ReactionRegistry,
    pub(crate) dedup: DedupCache,
    pub(crate) inbox_tx: async_channel::Sender<Income>,
    pub(crate) inbox_rx: async_channel::Receiver<Income>,
    pub(crate) connector: Arc<dyn RtcConnector>,
    pub(crate) shutdown: CancellationToken,
}

impl MeshNode {
    pub fn new(identity: Identity, config: NodeConfig, connector: Arc<dyn RtcConnector>) -> Arc<Self> {
        let (inbox_tx, inbox_rx) = async_channel::bounded(config.inbox_capacity);
        Arc::new(Self {
            table: ConnectionTable::new(config.slot_capacity, config.outbox_capacity),
            reactions: ReactionRegistry::new(),
            dedup: DedupCache::new(config.dedup_ttl),
            inbox_tx,
            inbox_rx,
            identity,
            config,
            connector,
            shutdown: CancellationToken::new(),
        })
    }

    /// Spawn the dispatcher workers. Call once.
    pub fn start(self: &Arc<Self>) {
        dispatcher::spawn_workers(self);
        tracing::info!(mesh = %self.hash(), workers = self.config.workers, "node started");
    }

    /// Cancel everything: workers stop, slots drop, transports tear down.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.inbox_tx.close();
        self.table.clear();
        tracing::info!(mesh = %self.hash(), "node stopped");
    }

    pub fn mesh(&self) -> &MeshId {
        self.identity.mesh()
    }

    pub fn hash(&self) -> &MeshHash {
        self.identity.hash()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn peer_count(&self) -> usize {
        self.table.len()
    }

    pub fn peer_state(&self, hash: &MeshHash) -> Option<PeerState> {
        self.table.state_of(hash)
    }

    pub fn peer_mesh(&self, hash: &MeshHash) -> Option<MeshId> {
        self.table.mesh_by_hash(hash)
    }

    /// Connect to an existing member at `host:port` and join the mesh
    /// through it.
    pub async fn attach(self: &Arc<Self>, entrypoint: &str) -> Result<MeshHash, MeshError> {
        bootstrap::attach(self, entrypoint).await
    }

    /// Book a slot for `mesh` and bring its link up. For untrusted peers a
    /// `Challenge` income is synthesised so admission starts immediately;
    /// its payload is the peer's hash, which keeps concurrent admissions
    /// distinct in the dedup cache.
    pub async fn add_peer(
        self: &Arc<Self>,
        mesh: MeshId,
        trusted: bool,
        factory: LinkFactory,
    ) -> Result<MeshHash, MeshError> {
        let (hash, outbox) = self.table.insert(mesh, trusted)?;
        let mut inbox = factory(LinkContext {
            peer: hash.clone(),
            outbox,
        });
        tracing::info!(peer = %hash, trusted, "peer attached");

        if !trusted {
            let challenge = Income::new(
                hash.clone(),
                Signal::new(SignalKind::Challenge, hash.as_str().as_bytes().to_vec()),
            );
            // A closed inbox means the node is shutting down; the drain
            // below will notice and reclaim the slot.
            let _ = self.inbox_tx.send(challenge).await;
        }

        let node = Arc::clone(self);
        let drained = hash.clone();
        tokio::spawn(async move {
            while let Some(income) = inbox.recv().await {
                match node.table.state_of(&income.from) {
                    // Slot already reclaimed; stop pumping.
                    None => break,
                    Some(PeerState::Init) if income.kind() != SignalKind::TestChallenge => {
                        tracing::warn!(
                            peer = %income.from,
                            kind = %income.kind(),
                            "unverified peer spoke out of turn"
                        );
                        break;
                    }
                    Some(_) => {}
                }
                if node.dedup.contains(&income.signal.payload) {
                    tracing::trace!(peer = %income.from, "dropping duplicate before enqueue");
                    continue;
                }
                if node.inbox_tx.send(income).await.is_err() {
                    break;
                }
            }
            node.disconnect(&drained);
        });

        Ok(hash)
    }

    /// Unicast; silently dropped when no slot holds `to`. A full outbox
    /// means the peer stopped draining and costs it the slot.
    pub fn send(&self, to: &MeshHash, signal: Signal) {
        match self.table.send(to, signal) {
            SendOutcome::Sent => {}
            SendOutcome::NoSlot => {
                tracing::trace!(peer = %to, "send to absent peer dropped");
            }
            SendOutcome::Overflow => {
                tracing::warn!(peer = %to, "outbound queue overflow");
                self.disconnect(to);
            }
        }
    }

    /// Enqueue on every Trusted peer except `exclude`.
    pub fn broadcast(&self, signal: Signal, exclude: &[&MeshHash]) {
        for hung in self.table.broadcast(&signal, exclude) {
            tracing::warn!(peer = %hung, "outbound queue overflow during broadcast");
            self.disconnect(&hung);
        }
    }

    /// Reclaim a peer's slot. Idempotent; the drop of the outbox sender is
    /// what actually tears the transport down.
    pub fn disconnect(&self, hash: &MeshHash) {
        if self.table.remove(hash) {
            tracing::info!(peer = %hash, "peer disconnected");
        }
    }

    pub(crate) fn upgrade(&self, hash: &MeshHash, state: PeerState) {
        if self.table.upgrade(hash, state) {
            tracing::debug!(peer = %hash, state = ?state, "peer state raised");
        }
    }

    /// Register a one-shot reaction against future inbound frames.
    pub fn add_reaction(
        &self,
        ttl: std::time::Duration,
        predicate: impl FnMut(&Income) -> bool + Send + 'static,
    ) -> ReactionToken {
        self.reactions.register(ttl, predicate)
    }

    /// As [`Self::add_reaction`], with a callback that runs if the deadline
    /// beats the match.
    pub fn add_reaction_with_callback(
        &self,
        ttl: std::time::Duration,
        predicate: impl FnMut(&Income) -> bool + Send + 'static,
        on_expiry: impl FnOnce() + Send + 'static,
    ) -> ReactionToken {
        self.reactions.register_with_callback(ttl, predicate, on_expiry)
    }
}
