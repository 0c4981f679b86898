/// Transport-layer failures surfaced to the caller (signalling and link
/// setup); in-flight pump errors only terminate the link's tasks.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// WebRTC session establishment failed.
    #[error("webrtc signalling: {0}")]
    Signalling(String),

    /// A session description could not be parsed.
    #[error("session description: {0}")]
    BadDescription(#[from] serde_json::Error),

    /// The remote side went away before the link came up.
    #[error("transport closed during setup")]
    ClosedDuringSetup,
}

impl From<::webrtc::Error> for TransportError {
    fn from(e: ::webrtc::Error) -> Self {
        Self::Signalling(e.to_string())
    }
}
