//! In-process links for tests and local simulation.
//!
//! [`memory_link_pair`] produces two link factories whose frames cross over
//! bounded channels, with the same encode/decode and teardown behaviour as
//! the network backings. [`MemoryRtc`] is an in-process signalling hub
//! implementing [`RtcConnector`], so multi-node admission scenarios run
//! without ICE.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use veil_signal::{Income, Signal};

use crate::rtc::{AcceptAnswer, OpenWait, RtcConnector};
use crate::{LinkContext, LinkFactory, TransportError, INBOUND_BUFFER};

/// Two crossed in-process links. Dropping either side's outbox sender tears
/// both directions down, mirroring a closing transport.
pub fn memory_link_pair() -> (LinkFactory, LinkFactory) {
    let (left_tx, left_rx) = mpsc::channel::<Vec<u8>>(INBOUND_BUFFER);
    let (right_tx, right_rx) = mpsc::channel::<Vec<u8>>(INBOUND_BUFFER);
    (half(left_tx, right_rx), half(right_tx, left_rx))
}

fn half(wire_tx: mpsc::Sender<Vec<u8>>, mut wire_rx: mpsc::Receiver<Vec<u8>>) -> LinkFactory {
    Box::new(move |ctx| {
        let LinkContext { peer, mut outbox } = ctx;
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOUND_BUFFER);

        tokio::spawn(async move {
            while let Some(signal) = outbox.recv().await {
                if wire_tx.send(signal.encode()).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(frame) = wire_rx.recv().await {
                let signal = match Signal::decode(&frame) {
                    Ok(signal) => signal,
                    Err(_) => continue,
                };
                if inbox_tx
                    .send(Income::new(peer.clone(), signal))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        inbox_rx
    })
}

/// In-process stand-in for WebRTC signalling: offers park a ready link half
/// in the hub, answers collect it.
#[derive(Default)]
pub struct MemoryRtc {
    next_session: AtomicU64,
    parked: Mutex<HashMap<u64, LinkFactory>>,
}

impl MemoryRtc {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

const SDP_PREFIX: &str = "memory-session:";

fn session_of(sdp: &[u8]) -> Result<u64, TransportError> {
    std::str::from_utf8(sdp)
        .ok()
        .and_then(|s| s.strip_prefix(SDP_PREFIX))
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| TransportError::Signalling("not a memory session description".into()))
}

#[async_trait]
impl RtcConnector for MemoryRtc {
    async fn offer(&self) -> Result<(Vec<u8>, Box<dyn AcceptAnswer>), TransportError> {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (local, remote) = memory_link_pair();
        self.parked.lock().unwrap().insert(session, remote);
        let sdp = format!("{SDP_PREFIX}{session}").into_bytes();
        Ok((
            sdp,
            Box::new(MemoryPendingOffer {
                session,
                local: Some(local),
            }),
        ))
    }

    async fn answer(&self, remote_sdp: &[u8]) -> Result<(Vec<u8>, OpenWait), TransportError> {
        let session = session_of(remote_sdp)?;
        let link = self
            .parked
            .lock()
            .unwrap()
            .remove(&session)
            .ok_or(TransportError::ClosedDuringSetup)?;
        let sdp = format!("{SDP_PREFIX}{session}").into_bytes();
        let wait: OpenWait = Box::pin(async move { Ok(link) });
        Ok((sdp, wait))
    }
}

struct MemoryPendingOffer {
    session: u64,
    local: Option<LinkFactory>,
}

#[async_trait]
impl AcceptAnswer for MemoryPendingOffer {
    async fn accept(
        mut self: Box<Self>,
        remote_sdp: &[u8],
    ) -> Result<LinkFactory, TransportError> {
        if session_of(remote_sdp)? != self.session {
            return Err(TransportError::Signalling("answer for another session".into()));
        }
        self.local.take().ok_or(TransportError::ClosedDuringSetup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_crypto::MeshId;
    use veil_signal::SignalKind;

    fn ctx(tag: &str) -> (mpsc::Sender<Signal>, LinkContext) {
        let (outbox_tx, outbox_rx) = mpsc::channel(8);
        let ctx = LinkContext {
            peer: MeshId::new(tag.to_string()).hash(),
            outbox: outbox_rx,
        };
        (outbox_tx, ctx)
    }

    #[tokio::test]
    async fn pair_delivers_in_both_directions() {
        let (left, right) = memory_link_pair();
        let (left_out, left_ctx) = ctx("right-peer");
        let (right_out, right_ctx) = ctx("left-peer");
        let mut left_inbox = left(left_ctx);
        let mut right_inbox = right(right_ctx);

        left_out
            .send(Signal::new(SignalKind::TestChallenge, vec![1, 2, 3]))
            .await
            .unwrap();
        let income = right_inbox.recv().await.expect("delivered");
        assert_eq!(income.kind(), SignalKind::TestChallenge);
        assert_eq!(income.signal.payload, vec![1, 2, 3]);
        assert_eq!(income.from, MeshId::new("left-peer".to_string()).hash());

        right_out
            .send(Signal::new(SignalKind::ConnectionSecret, vec![9]))
            .await
            .unwrap();
        assert_eq!(
            left_inbox.recv().await.expect("delivered").kind(),
            SignalKind::ConnectionSecret
        );
    }

    #[tokio::test]
    async fn closing_one_side_ends_the_other() {
        let (left, right) = memory_link_pair();
        let (left_out, left_ctx) = ctx("right-peer");
        let (_right_out, right_ctx) = ctx("left-peer");
        let _left_inbox = left(left_ctx);
        let mut right_inbox = right(right_ctx);

        drop(left_out);
        assert!(right_inbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn hub_brokers_a_session() {
        let hub = MemoryRtc::new();
        let (offer_sdp, pending) = hub.offer().await.unwrap();
        let (answer_sdp, wait) = hub.answer(&offer_sdp).await.unwrap();
        let broker_link = wait.await.unwrap();
        let newcomer_link = pending.accept(&answer_sdp).await.unwrap();

        let (newcomer_out, newcomer_ctx) = ctx("broker");
        let (_broker_out, broker_ctx) = ctx("newcomer");
        let _newcomer_inbox = newcomer_link(newcomer_ctx);
        let mut broker_inbox = broker_link(broker_ctx);

        newcomer_out
            .send(Signal::new(SignalKind::ConnectionEstablished, vec![7]))
            .await
            .unwrap();
        assert_eq!(
            broker_inbox.recv().await.unwrap().kind(),
            SignalKind::ConnectionEstablished
        );
    }

    #[tokio::test]
    async fn hub_rejects_unknown_sessions() {
        let hub = MemoryRtc::new();
        assert!(hub.answer(b"memory-session:42").await.is_err());
        assert!(hub.answer(b"garbage").await.is_err());
    }
}
