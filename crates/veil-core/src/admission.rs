//! The challenge protocol: proving possession of the private key behind a
//! claimed mesh identifier.
//!
//! The verifier wraps 32 random bytes with the claimed public key and waits
//! 3 seconds for the plaintext to come back. A wrong echo or a missed
//! deadline costs the newcomer its slot; a correct one raises it to
//! Verified and, unless the mesh is too small to broker anything, starts
//! the invitation protocol.

use std::sync::Arc;

use rand::RngCore;

use veil_crypto::{public_key_of, unwrap_challenge, wrap_challenge};
use veil_signal::{Income, Signal, SignalKind};

use crate::invitation;
use crate::node::MeshNode;
use crate::table::PeerState;

/// Static handler for the synthesised `Challenge`: the verifier side.
pub(crate) fn issue_challenge(node: &Arc<MeshNode>, income: &Income) {
    let newcomer = income.from.clone();
    let Some(mesh) = node.table.mesh_by_hash(&newcomer) else {
        tracing::warn!(peer = %newcomer, "challenge for a peer that is already gone");
        return;
    };
    let newcomer_pub = match public_key_of(&mesh) {
        Ok(key) => key,
        Err(e) => {
            tracing::warn!(peer = %newcomer, error = %e, "claimed identifier is not a key");
            node.disconnect(&newcomer);
            return;
        }
    };

    let mut value = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut value);
    let wrapped = match wrap_challenge(&value, &newcomer_pub) {
        Ok(wrapped) => wrapped,
        Err(e) => {
            tracing::error!(peer = %newcomer, error = %e, "could not wrap challenge");
            node.disconnect(&newcomer);
            return;
        }
    };

    let reacting = Arc::clone(node);
    let expected_from = newcomer.clone();
    let expiring = Arc::clone(node);
    let expired_peer = newcomer.clone();
    node.add_reaction_with_callback(
        node.config.challenge_timeout,
        move |echo| {
            if echo.kind() != SignalKind::TestChallenge || echo.from != expected_from {
                return false;
            }
            let node = &reacting;
            if echo.signal.payload != value {
                tracing::warn!(peer = %expected_from, "challenge failed");
                node.disconnect(&expected_from);
                return true;
            }

            node.upgrade(&expected_from, PeerState::Verified);
            tracing::info!(peer = %expected_from, "challenge passed");

            // Tiny-network special case: nothing to broker against.
            if node.table.len() < 2 {
                node.upgrade(&expected_from, PeerState::Trusted);
                return true;
            }

            let min_required = (node.table.len() - 1).min(node.config.max_brokered);
            invitation::start_orchestration(
                node,
                expected_from.clone(),
                mesh.clone(),
                newcomer_pub.clone(),
                min_required,
            );
            true
        },
        move || {
            if expiring.table.state_of(&expired_peer) == Some(PeerState::Init) {
                tracing::warn!(peer = %expired_peer, "challenge timed out");
                expiring.disconnect(&expired_peer);
            }
        },
    );

    node.send(&newcomer, Signal::new(SignalKind::SolveChallenge, wrapped));
    tracing::debug!(peer = %newcomer, "challenge sent");
}

/// Static handler for `SolveChallenge`: the newcomer side.
pub(crate) fn solve_challenge(node: &Arc<MeshNode>, income: &Income) {
    match unwrap_challenge(&income.signal.payload, node.identity.private()) {
        Ok(plaintext) => {
            node.send(&income.from, Signal::new(SignalKind::TestChallenge, plaintext));
        }
        Err(e) => {
            // Not for us, or garbage; either way the frame dies here.
            tracing::debug!(peer = %income.from, error = %e, "challenge block did not open");
        }
    }
}
