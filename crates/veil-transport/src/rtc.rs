//! WebRTC data-channel links and the connector seam.
//!
//! The overlay depends on five WebRTC notions only: create-offer,
//! set-local, wait-for-gathering, create-answer, set-remote, plus one data
//! channel's open/message/close hooks. [`RtcConnector`] captures exactly
//! that surface so the protocols never touch the `webrtc` crate directly
//! and tests can substitute the in-memory hub from [`crate::memory`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use veil_signal::{Income, Signal};

use crate::{LinkContext, LinkFactory, TransportError, INBOUND_BUFFER};

/// Label of the single data channel every pair of peers shares.
pub const DATA_CHANNEL_LABEL: &str = "network";

/// Resolves to a ready link once the answerer's data channel opens.
pub type OpenWait = BoxFuture<'static, Result<LinkFactory, TransportError>>;

/// The offerer's half-open session: feed it the remote answer and wait for
/// the channel to open.
#[async_trait]
pub trait AcceptAnswer: Send {
    async fn accept(self: Box<Self>, remote_sdp: &[u8]) -> Result<LinkFactory, TransportError>;
}

/// Session establishment seam over WebRTC.
#[async_trait]
pub trait RtcConnector: Send + Sync {
    /// Offerer side: returns the local session description (JSON) and the
    /// handle that completes the session.
    async fn offer(&self) -> Result<(Vec<u8>, Box<dyn AcceptAnswer>), TransportError>;

    /// Answerer side: applies a remote offer and returns the local answer
    /// (JSON) plus a future resolving when the channel opens.
    async fn answer(&self, remote_sdp: &[u8]) -> Result<(Vec<u8>, OpenWait), TransportError>;
}

/// Production connector backed by the `webrtc` crate and a STUN-only ICE
/// configuration.
pub struct WebRtcConnector {
    api: API,
    stun_urls: Vec<String>,
}

impl WebRtcConnector {
    pub fn new(stun_urls: Vec<String>) -> Self {
        Self {
            api: APIBuilder::new().build(),
            stun_urls,
        }
    }

    fn configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.stun_urls.clone(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    async fn local_description_json(
        pc: &Arc<RTCPeerConnection>,
    ) -> Result<Vec<u8>, TransportError> {
        let local = pc
            .local_description()
            .await
            .ok_or(TransportError::ClosedDuringSetup)?;
        Ok(serde_json::to_vec(&local)?)
    }
}

#[async_trait]
impl RtcConnector for WebRtcConnector {
    async fn offer(&self) -> Result<(Vec<u8>, Box<dyn AcceptAnswer>), TransportError> {
        let pc = Arc::new(self.api.new_peer_connection(self.configuration()).await?);
        let dc = pc.create_data_channel(DATA_CHANNEL_LABEL, None).await?;

        let offer = pc.create_offer(None).await?;
        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(offer).await?;
        let _ = gathered.recv().await;

        let sdp = Self::local_description_json(&pc).await?;
        Ok((sdp, Box::new(PendingOffer { pc, dc })))
    }

    async fn answer(&self, remote_sdp: &[u8]) -> Result<(Vec<u8>, OpenWait), TransportError> {
        let remote: RTCSessionDescription = serde_json::from_slice(remote_sdp)?;
        let pc = Arc::new(self.api.new_peer_connection(self.configuration()).await?);

        let (open_tx, mut open_rx) = mpsc::channel::<Arc<RTCDataChannel>>(1);
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let open_tx = open_tx.clone();
            Box::pin(async move {
                let channel = dc.clone();
                dc.on_open(Box::new(move || {
                    let open_tx = open_tx.clone();
                    let channel = channel.clone();
                    Box::pin(async move {
                        let _ = open_tx.try_send(channel);
                    })
                }));
            })
        }));
        let failed = watch_failure(&pc);

        pc.set_remote_description(remote).await?;
        let answer = pc.create_answer(None).await?;
        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(answer).await?;
        let _ = gathered.recv().await;

        let sdp = Self::local_description_json(&pc).await?;
        let wait_pc = pc.clone();
        let wait: OpenWait = Box::pin(async move {
            let mut failed = failed;
            tokio::select! {
                maybe = open_rx.recv() => match maybe {
                    Some(dc) => Ok(data_channel_link(wait_pc, dc)),
                    None => Err(TransportError::ClosedDuringSetup),
                },
                _ = failed.recv() => Err(TransportError::ClosedDuringSetup),
            }
        });
        Ok((sdp, wait))
    }
}

struct PendingOffer {
    pc: Arc<RTCPeerConnection>,
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl AcceptAnswer for PendingOffer {
    async fn accept(self: Box<Self>, remote_sdp: &[u8]) -> Result<LinkFactory, TransportError> {
        let remote: RTCSessionDescription = serde_json::from_slice(remote_sdp)?;

        let (open_tx, mut open_rx) = mpsc::channel::<()>(1);
        self.dc.on_open(Box::new(move || {
            let open_tx = open_tx.clone();
            Box::pin(async move {
                let _ = open_tx.try_send(());
            })
        }));
        let mut failed = watch_failure(&self.pc);

        self.pc.set_remote_description(remote).await?;

        tokio::select! {
            maybe = open_rx.recv() => match maybe {
                Some(()) => Ok(data_channel_link(self.pc, self.dc)),
                None => Err(TransportError::ClosedDuringSetup),
            },
            _ = failed.recv() => Err(TransportError::ClosedDuringSetup),
        }
    }
}

/// Fires once when the peer connection reaches a terminal state.
fn watch_failure(pc: &Arc<RTCPeerConnection>) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(1);
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let tx = tx.clone();
        Box::pin(async move {
            if matches!(
                state,
                RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Closed
                    | RTCPeerConnectionState::Disconnected
            ) {
                let _ = tx.try_send(());
            }
        })
    }));
    rx
}

/// Wrap an open data channel into the unified link shape.
fn data_channel_link(pc: Arc<RTCPeerConnection>, dc: Arc<RTCDataChannel>) -> LinkFactory {
    Box::new(move |ctx| {
        let LinkContext { peer, mut outbox } = ctx;
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOUND_BUFFER);

        let reader_peer = peer.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let inbox_tx = inbox_tx.clone();
            let peer = reader_peer.clone();
            Box::pin(async move {
                match Signal::decode(&msg.data) {
                    Ok(signal) => {
                        let _ = inbox_tx.send(Income::new(peer, signal)).await;
                    }
                    Err(e) => {
                        tracing::debug!(peer = %peer, error = %e, "dropping unparseable frame");
                    }
                }
            })
        }));

        // Replacing the message handler on close drops its inbox sender,
        // which ends the slot's drain task.
        let close_dc = dc.clone();
        dc.on_close(Box::new(move || {
            let dc = close_dc.clone();
            Box::pin(async move {
                dc.on_message(Box::new(|_| Box::pin(async {})));
            })
        }));

        let writer_dc = dc.clone();
        let writer_peer = peer;
        tokio::spawn(async move {
            while let Some(signal) = outbox.recv().await {
                if let Err(e) = writer_dc.send(&Bytes::from(signal.encode())).await {
                    tracing::debug!(peer = %writer_peer, error = %e, "data channel write failed");
                    break;
                }
            }
            let _ = pc.close().await;
        });

        inbox_rx
    })
}
