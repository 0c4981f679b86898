use veil_crypto::CryptoError;
use veil_signal::CodecError;
use veil_transport::TransportError;

/// Failures surfaced to callers of the core API.
///
/// Frame-level trouble (bad envelopes, unparseable tuples) never appears
/// here: those frames are logged and dropped where they arrive.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// Every connection slot is occupied.
    #[error("no free connection slot")]
    BusySlots,

    /// A live slot already holds this peer.
    #[error("peer already connected")]
    AlreadyConnected,

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Fetching the entrypoint identity or dialling its WebSocket failed.
    #[error("bootstrap: {0}")]
    Bootstrap(String),

    /// The HTTP gateway could not bind or serve.
    #[error("gateway: {0}")]
    Gateway(#[from] std::io::Error),
}
