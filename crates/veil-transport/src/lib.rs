//! Transport backings for the veil overlay.
//!
//! Every backing reduces to the same duplex contract: the connection table
//! hands a [`LinkContext`] (the remote peer's mesh hash plus the bounded
//! outbox it will drain) to a [`LinkFactory`], which spawns the writer and
//! reader tasks and returns the inbound stream of [`Income`]s. The inbound
//! stream ends when the transport closes in either direction; dropping the
//! outbox sender is the one and only way the rest of the node tears a link
//! down.
//!
//! Three backings exist: WebSocket (the bootstrap hop, server- and
//! client-side), WebRTC data channels (every subsequent hop), and an
//! in-process memory pair used by tests and local simulation.

mod error;
pub mod memory;
pub mod rtc;
pub mod websocket;

use tokio::sync::mpsc;

use veil_crypto::MeshHash;
use veil_signal::{Income, Signal};

pub use error::TransportError;
pub use rtc::{AcceptAnswer, OpenWait, RtcConnector, WebRtcConnector};

/// What a link needs from the slot that owns it.
pub struct LinkContext {
    /// Mesh hash inbound frames are tagged with.
    pub peer: MeshHash,
    /// Bounded queue of outbound signals; closed when the slot is removed.
    pub outbox: mpsc::Receiver<Signal>,
}

/// Spawns a link's pump tasks and yields its inbound stream.
pub type LinkFactory = Box<dyn FnOnce(LinkContext) -> mpsc::Receiver<Income> + Send + 'static>;

/// Capacity of a link's inbound buffer before backpressure reaches the
/// transport reader.
pub(crate) const INBOUND_BUFFER: usize = 64;
