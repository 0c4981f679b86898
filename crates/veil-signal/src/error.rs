/// Decoding failures for signals and handshake tuples.
///
/// Framing failures are never fatal: the receiver logs and drops the frame.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The frame is shorter than its fixed-length sections require.
    #[error("frame too short while reading {0}")]
    Truncated(&'static str),

    /// The leading type byte names no known signal.
    #[error("unknown signal type {0:#04x}")]
    UnknownKind(u8),

    /// A `|` separator expected between fields is absent.
    #[error("missing separator before {0}")]
    MissingSeparator(&'static str),

    /// A fixed 32-byte field has the wrong length.
    #[error("{0} must be exactly 32 bytes")]
    BadLength(&'static str),

    /// A mesh-identifier field is not valid UTF-8.
    #[error("{0} is not a valid mesh identifier")]
    BadMeshId(&'static str),
}
