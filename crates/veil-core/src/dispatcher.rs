//! The worker pool that consumes the global inbox.
//!
//! Per frame, in order: the dedup check-and-insert (the authority deciding
//! which worker owns a frame both saw), the sweep over live reactions, then
//! the static handler for the signal kind. Handlers are synchronous and
//! never block; anything that needs to wait spawns.

use std::sync::Arc;

use veil_signal::{Income, SignalKind};

use crate::node::MeshNode;
use crate::{admission, invitation};

pub(crate) fn spawn_workers(node: &Arc<MeshNode>) {
    for worker in 0..node.config.workers {
        let node = Arc::clone(node);
        let inbox = node.inbox_rx.clone();
        tokio::spawn(async move {
            loop {
                let income = tokio::select! {
                    _ = node.shutdown.cancelled() => break,
                    received = inbox.recv() => match received {
                        Ok(income) => income,
                        Err(_) => break,
                    },
                };
                dispatch(&node, income);
            }
            tracing::debug!(worker, "dispatcher worker stopped");
        });
    }
}

fn dispatch(node: &Arc<MeshNode>, income: Income) {
    if !node.dedup.first_seen(&income.signal.payload) {
        tracing::trace!(peer = %income.from, kind = %income.kind(), "replayed frame dropped");
        return;
    }

    tracing::debug!(peer = %income.from, kind = %income.kind(), "dispatching");
    node.reactions.sweep(&income);

    match income.kind() {
        SignalKind::Challenge => admission::issue_challenge(node, &income),
        SignalKind::SolveChallenge => admission::solve_challenge(node, &income),
        SignalKind::NeedInviteForNewbie => invitation::handle_need_invite(node, &income),
        SignalKind::InviteForNewbie => invitation::handle_invite(node, &income),
        // Reaction-only kinds; anything left over here is noise.
        other => {
            tracing::trace!(peer = %income.from, kind = %other, "no static handler");
        }
    }
}
