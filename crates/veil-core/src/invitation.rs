//! The invitation protocol: brokered topology establishment.
//!
//! After a newcomer passes the challenge, its verifier becomes the
//! *orchestrator*: it solicits invites from the mesh, relays the newcomer's
//! WebRTC offers and the brokers' answers (both opaque sealed blobs to
//! everyone but their addressee), and demands a per-broker connection
//! secret back before promoting the newcomer to Trusted. Brokers learn the
//! orchestrator's identity from the solicitation payload and seal their
//! invite and answer envelopes for it; the newcomer only ever sees invites
//! with the secret stripped.
//!
//! Every step is a one-shot reaction with a deadline; a stalled admission
//! converges to a disconnect, never to a half-member.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rand::RngCore;
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use veil_crypto::{open, public_key_of, seal, MeshHash, MeshId};
use veil_signal::{
    Answer, ConnectionProof, Income, Invite, NeedInvite, Offer, Signal, SignalKind, SECRET_LEN,
};
use veil_transport::AcceptAnswer;

use crate::node::MeshNode;
use crate::table::PeerState;

/// Shared state of one orchestration (one newcomer's admission).
struct Orchestration {
    newcomer: MeshHash,
    newcomer_mesh: MeshId,
    newcomer_pub: RsaPublicKey,
    min_required: usize,
    /// Brokers that responded, with the secret each disclosed to us.
    invites: Mutex<HashMap<MeshHash, [u8; SECRET_LEN]>>,
    invites_received: AtomicUsize,
    confirmed: AtomicUsize,
    invites_done: CancellationToken,
    connections_done: CancellationToken,
    /// Frames already relayed by some live relay reaction; makes each
    /// distinct offer/answer claim exactly one reaction instance.
    relayed: Mutex<HashSet<[u8; 32]>>,
}

impl Orchestration {
    fn claim(&self, frame: &[u8]) -> bool {
        self.relayed.lock().unwrap().insert(Sha256::digest(frame).into())
    }
}

fn random_run() -> [u8; 32] {
    let mut run = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut run);
    run
}

// ---------------------------------------------------------------------------
// Orchestrator side
// ---------------------------------------------------------------------------

/// Solicit `min_required` brokers for a freshly verified newcomer and hold
/// its promotion hostage to their connection proofs.
pub(crate) fn start_orchestration(
    node: &Arc<MeshNode>,
    newcomer: MeshHash,
    newcomer_mesh: MeshId,
    newcomer_pub: RsaPublicKey,
    min_required: usize,
) {
    let state = Arc::new(Orchestration {
        newcomer,
        newcomer_mesh,
        newcomer_pub,
        min_required,
        invites: Mutex::new(HashMap::with_capacity(min_required)),
        invites_received: AtomicUsize::new(0),
        confirmed: AtomicUsize::new(0),
        invites_done: CancellationToken::new(),
        connections_done: CancellationToken::new(),
        relayed: Mutex::new(HashSet::new()),
    });
    tracing::info!(
        newcomer = %state.newcomer,
        min_required,
        "orchestrating admission"
    );

    collect_invites(node, &state);

    let solicitation = NeedInvite {
        token: random_run(),
        orchestrator: node.mesh().clone(),
    };
    node.broadcast(
        Signal::new(SignalKind::NeedInviteForNewbie, solicitation.encode()),
        &[&state.newcomer],
    );
}

/// Reaction collecting broker invites until quorum or the deadline.
fn collect_invites(node: &Arc<MeshNode>, state: &Arc<Orchestration>) {
    let reacting = Arc::clone(node);
    let st = Arc::clone(state);
    let expiring = Arc::clone(node);
    let expired = Arc::clone(state);
    node.add_reaction_with_callback(
        node.config.invite_collect_timeout,
        move |invite_msg| {
            if invite_msg.kind() != SignalKind::InviteForNewbie {
                return false;
            }
            let Ok(plaintext) = open(&invite_msg.signal.payload, reacting.identity.private())
            else {
                // Sealed for some other orchestrator.
                return false;
            };
            let Ok(invite) = Invite::decode(&plaintext) else {
                return false;
            };
            if invite.to != *reacting.mesh() {
                return false;
            }
            let Some(secret) = invite.secret else {
                return false;
            };
            let broker = invite.from.hash();
            if broker == st.newcomer {
                return false;
            }
            {
                let mut invites = st.invites.lock().unwrap();
                if invites.contains_key(&broker) {
                    return false;
                }
                invites.insert(broker.clone(), secret);
            }
            tracing::debug!(newcomer = %st.newcomer, broker = %broker, "invite collected");

            forward_when_quorate(&reacting, &st, invite);

            let received = st.invites_received.fetch_add(1, Ordering::SeqCst) + 1;
            if received < st.min_required {
                return false;
            }
            st.invites_done.cancel();
            confirm_connections(&reacting, &st);
            watch_settlement(&reacting, &st);
            true
        },
        move || {
            if !expired.invites_done.is_cancelled() {
                tracing::warn!(newcomer = %expired.newcomer, "too few brokers answered");
                expiring.disconnect(&expired.newcomer);
            }
        },
    );
}

/// Per-broker task: wait for the quorum latch, then forward the
/// secret-stripped invite to the newcomer and arm the relay reactions.
fn forward_when_quorate(node: &Arc<MeshNode>, state: &Arc<Orchestration>, invite: Invite) {
    let node = Arc::clone(node);
    let state = Arc::clone(state);
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(node.config.broker_latch_timeout) => {
                tracing::debug!(newcomer = %state.newcomer, "quorum never formed; invite abandoned");
                return;
            }
            _ = state.invites_done.cancelled() => {}
        }

        relay_offer(&node, &state);
        relay_answer(&node, &state);

        let stripped = invite.stripped();
        match seal(
            &stripped.encode(),
            &state.newcomer_pub,
            node.identity.private(),
        ) {
            Ok(sealed) => {
                node.send(
                    &state.newcomer,
                    Signal::new(SignalKind::InviteForNewbie, sealed),
                );
                tracing::debug!(newcomer = %state.newcomer, "stripped invite forwarded");
            }
            Err(e) => {
                tracing::error!(newcomer = %state.newcomer, error = %e, "could not seal invite");
            }
        }
    });
}

/// Relay one of the newcomer's offers out to the mesh.
fn relay_offer(node: &Arc<MeshNode>, state: &Arc<Orchestration>) {
    let relaying = Arc::clone(node);
    let st = Arc::clone(state);
    node.add_reaction(
        node.config.settle_budget(state.min_required),
        move |offer_msg| {
            if offer_msg.kind() != SignalKind::NewbieOffer || offer_msg.from != st.newcomer {
                return false;
            }
            if !st.claim(&offer_msg.signal.payload) {
                // A sibling relay already took this one.
                return false;
            }
            relaying.broadcast(offer_msg.signal.clone(), &[&st.newcomer]);
            true
        },
    );
}

/// Relay one broker answer back down to the newcomer, re-sealed for it.
fn relay_answer(node: &Arc<MeshNode>, state: &Arc<Orchestration>) {
    let relaying = Arc::clone(node);
    let st = Arc::clone(state);
    node.add_reaction(
        node.config.settle_budget(state.min_required),
        move |answer_msg| {
            if answer_msg.kind() != SignalKind::AnswerForNewbie {
                return false;
            }
            let Ok(plaintext) = open(&answer_msg.signal.payload, relaying.identity.private())
            else {
                return false;
            };
            let Ok(answer) = Answer::decode(&plaintext) else {
                return false;
            };
            if answer.to != st.newcomer_mesh {
                // A concurrent orchestration's traffic.
                return false;
            }
            if !st.claim(&answer_msg.signal.payload) {
                return false;
            }
            match seal(&plaintext, &st.newcomer_pub, relaying.identity.private()) {
                Ok(resealed) => {
                    relaying.send(
                        &st.newcomer,
                        Signal::new(SignalKind::AnswerForNewbie, resealed),
                    );
                }
                Err(e) => {
                    tracing::error!(newcomer = %st.newcomer, error = %e, "could not re-seal answer");
                }
            }
            true
        },
    );
}

/// Count the newcomer's connection proofs; any malformed or unverifiable
/// proof ends the admission.
fn confirm_connections(node: &Arc<MeshNode>, state: &Arc<Orchestration>) {
    let judging = Arc::clone(node);
    let st = Arc::clone(state);
    node.add_reaction(
        node.config.settle_budget(state.min_required),
        move |proof_msg| {
            if proof_msg.kind() != SignalKind::ConnectionEstablished
                || proof_msg.from != st.newcomer
            {
                return false;
            }
            let proof = match ConnectionProof::decode(&proof_msg.signal.payload) {
                Ok(proof) => proof,
                Err(e) => {
                    tracing::warn!(newcomer = %st.newcomer, error = %e, "malformed connection proof");
                    judging.disconnect(&st.newcomer);
                    return true;
                }
            };
            let expected = st.invites.lock().unwrap().get(&proof.broker.hash()).copied();
            match expected {
                None => {
                    tracing::warn!(newcomer = %st.newcomer, "proof names an unknown broker");
                    judging.disconnect(&st.newcomer);
                    true
                }
                Some(secret) if secret != proof.secret => {
                    tracing::warn!(newcomer = %st.newcomer, "connection secret mismatch");
                    judging.disconnect(&st.newcomer);
                    true
                }
                Some(_) => {
                    let confirmed = st.confirmed.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::debug!(
                        newcomer = %st.newcomer,
                        confirmed,
                        required = st.min_required,
                        "connection confirmed"
                    );
                    if confirmed >= st.min_required {
                        st.connections_done.cancel();
                        true
                    } else {
                        false
                    }
                }
            }
        },
    );
}

/// The admission's endgame: all proofs in time promotes the newcomer;
/// anything else reclaims its slot.
fn watch_settlement(node: &Arc<MeshNode>, state: &Arc<Orchestration>) {
    let node = Arc::clone(node);
    let state = Arc::clone(state);
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(node.config.settle_budget(state.min_required)) => {
                tracing::warn!(newcomer = %state.newcomer, "admission timed out");
                node.disconnect(&state.newcomer);
            }
            _ = state.connections_done.cancelled() => {
                node.upgrade(&state.newcomer, PeerState::Trusted);
                tracing::info!(newcomer = %state.newcomer, "admission complete");
                // A heavily brokered newcomer does not need us as a
                // neighbour; free the slot for the next one.
                if state.min_required > 4 {
                    node.disconnect(&state.newcomer);
                }
            }
        }
    });
}

// ---------------------------------------------------------------------------
// Broker side
// ---------------------------------------------------------------------------

/// Static handler for `NeedInviteForNewbie`: volunteer as a broker, or pass
/// the request along when full.
pub(crate) fn handle_need_invite(node: &Arc<MeshNode>, income: &Income) {
    let request = match NeedInvite::decode(&income.signal.payload) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(peer = %income.from, error = %e, "unparseable solicitation");
            return;
        }
    };
    if request.orchestrator == *node.mesh() {
        // Our own solicitation flooded back around.
        return;
    }
    if node.table.len() >= node.config.slot_capacity {
        tracing::debug!(peer = %income.from, "slots full; forwarding solicitation");
        node.broadcast(income.signal.clone(), &[&income.from]);
        return;
    }
    let orchestrator_pub = match public_key_of(&request.orchestrator) {
        Ok(key) => key,
        Err(e) => {
            tracing::debug!(peer = %income.from, error = %e, "solicitation names no key");
            return;
        }
    };

    let sign = random_run();
    let secret = random_run();
    let invite = Invite {
        to: request.orchestrator.clone(),
        from: node.mesh().clone(),
        sign,
        secret: Some(secret),
    };
    let sealed = match seal(&invite.encode(), &orchestrator_pub, node.identity.private()) {
        Ok(sealed) => sealed,
        Err(e) => {
            tracing::error!(error = %e, "could not seal invite");
            return;
        }
    };

    let answering = Arc::clone(node);
    node.add_reaction(node.config.broker_offer_timeout, move |offer_msg| {
        if offer_msg.kind() != SignalKind::NewbieOffer {
            return false;
        }
        let Ok(plaintext) = open(&offer_msg.signal.payload, answering.identity.private()) else {
            // Not addressed to this broker.
            return false;
        };
        let Ok(offer) = Offer::decode(&plaintext) else {
            return false;
        };
        if offer.sign != sign {
            // Another admission round we are also brokering.
            return false;
        }
        tracing::debug!(newcomer = %offer.from, "offer received; answering");
        answer_offer(&answering, orchestrator_pub.clone(), offer, secret);
        true
    });

    node.broadcast(Signal::new(SignalKind::InviteForNewbie, sealed), &[]);
    tracing::debug!("invite issued");
}

/// Build the WebRTC answer, send it toward the orchestrator, and once the
/// channel opens adopt the newcomer and disclose the secret to it.
fn answer_offer(
    node: &Arc<MeshNode>,
    orchestrator_pub: RsaPublicKey,
    offer: Offer,
    secret: [u8; SECRET_LEN],
) {
    let node = Arc::clone(node);
    tokio::spawn(async move {
        let newcomer_mesh = offer.from.clone();
        let (sdp, opened) = match node.connector.answer(&offer.sdp).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "could not answer offer");
                return;
            }
        };
        let answer = Answer {
            from: node.mesh().clone(),
            to: newcomer_mesh.clone(),
            sdp,
        };
        let sealed = match seal(&answer.encode(), &orchestrator_pub, node.identity.private()) {
            Ok(sealed) => sealed,
            Err(e) => {
                tracing::error!(error = %e, "could not seal answer");
                return;
            }
        };
        node.broadcast(Signal::new(SignalKind::AnswerForNewbie, sealed), &[]);

        let opened = tokio::time::timeout(node.config.broker_offer_timeout, opened);
        match opened.await {
            Ok(Ok(factory)) => {
                match node.add_peer(newcomer_mesh, true, factory).await {
                    Ok(newcomer) => {
                        node.send(
                            &newcomer,
                            Signal::new(SignalKind::ConnectionSecret, secret.to_vec()),
                        );
                        tracing::info!(newcomer = %newcomer, "brokered channel open");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "could not adopt newcomer");
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "brokered channel failed");
            }
            Err(_) => {
                tracing::debug!("brokered channel never opened");
            }
        }
    });
}

// ---------------------------------------------------------------------------
// Newcomer side
// ---------------------------------------------------------------------------

/// Static handler for `InviteForNewbie`: only the secret-stripped copy the
/// orchestrator forwards is for us; everything else fails to open or still
/// carries a secret.
pub(crate) fn handle_invite(node: &Arc<MeshNode>, income: &Income) {
    let Ok(plaintext) = open(&income.signal.payload, node.identity.private()) else {
        tracing::trace!(peer = %income.from, "invite sealed for someone else");
        return;
    };
    let invite = match Invite::decode(&plaintext) {
        Ok(invite) => invite,
        Err(e) => {
            tracing::debug!(peer = %income.from, error = %e, "unparseable invite");
            return;
        }
    };
    if invite.secret.is_some() {
        // The full copy is orchestration input, not an instruction to us.
        return;
    }
    let broker_pub = match public_key_of(&invite.from) {
        Ok(key) => key,
        Err(e) => {
            tracing::debug!(error = %e, "invite from no valid key");
            return;
        }
    };
    if node.table.len() >= node.config.slot_capacity {
        tracing::warn!("no room for a brokered channel");
        return;
    }

    make_offer(node, invite.from, broker_pub, invite.sign, income.from.clone());
}

/// Create the WebRTC offer for one broker and arm the answer reaction.
fn make_offer(
    node: &Arc<MeshNode>,
    broker_mesh: MeshId,
    broker_pub: RsaPublicKey,
    sign: [u8; 32],
    orchestrator: MeshHash,
) {
    let node = Arc::clone(node);
    tokio::spawn(async move {
        let (sdp, pending) = match node.connector.offer().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "could not create offer");
                return;
            }
        };
        let offer = Offer {
            from: node.mesh().clone(),
            sign,
            sdp,
        };
        let sealed = match seal(&offer.encode(), &broker_pub, node.identity.private()) {
            Ok(sealed) => sealed,
            Err(e) => {
                tracing::error!(error = %e, "could not seal offer");
                return;
            }
        };

        let mut pending = Some(pending);
        let reacting = Arc::clone(&node);
        let broker = broker_mesh.clone();
        node.add_reaction(node.config.answer_timeout, move |answer_msg| {
            if answer_msg.kind() != SignalKind::AnswerForNewbie {
                return false;
            }
            let Ok(plaintext) = open(&answer_msg.signal.payload, reacting.identity.private())
            else {
                return false;
            };
            let Ok(answer) = Answer::decode(&plaintext) else {
                return false;
            };
            if answer.from != broker {
                // Another broker's answer; its own reaction will take it.
                return false;
            }
            let Some(pending) = pending.take() else {
                return false;
            };
            settle_channel(
                &reacting,
                pending,
                answer,
                broker.clone(),
                orchestrator.clone(),
            );
            true
        });

        node.broadcast(Signal::new(SignalKind::NewbieOffer, sealed), &[]);
        tracing::debug!(broker = %broker_mesh.hash(), "offer sent");
    });
}

/// Apply the answer, adopt the broker once the channel opens, and prove the
/// connection back to the orchestrator when the secret arrives.
fn settle_channel(
    node: &Arc<MeshNode>,
    pending: Box<dyn AcceptAnswer>,
    answer: Answer,
    broker_mesh: MeshId,
    orchestrator: MeshHash,
) {
    let node = Arc::clone(node);
    tokio::spawn(async move {
        let accepted = tokio::time::timeout(
            node.config.broker_offer_timeout,
            pending.accept(&answer.sdp),
        );
        let factory = match accepted.await {
            Ok(Ok(factory)) => factory,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "brokered channel failed");
                return;
            }
            Err(_) => {
                tracing::debug!("brokered channel never opened");
                return;
            }
        };
        // Armed before the slot exists so a prompt broker cannot slip the
        // secret past us.
        let expected = broker_mesh.hash();
        let proving = Arc::clone(&node);
        let proven = broker_mesh.clone();
        node.add_reaction(node.config.secret_timeout, move |secret_msg| {
            if secret_msg.kind() != SignalKind::ConnectionSecret || secret_msg.from != expected {
                return false;
            }
            if secret_msg.signal.payload.len() != SECRET_LEN {
                return false;
            }
            let mut secret = [0u8; SECRET_LEN];
            secret.copy_from_slice(&secret_msg.signal.payload);
            let proof = ConnectionProof {
                secret,
                broker: proven.clone(),
            };
            proving.send(
                &orchestrator,
                Signal::new(SignalKind::ConnectionEstablished, proof.encode()),
            );
            true
        });

        match node.add_peer(broker_mesh, true, factory).await {
            Ok(broker) => {
                tracing::info!(broker = %broker, "brokered channel open");
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not adopt broker");
            }
        }
    });
}
