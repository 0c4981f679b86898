//! Error taxonomy for identity and envelope operations.

/// Failures produced by key handling and envelope processing.
///
/// Callers at the frame boundary treat every variant the same way (log and
/// drop the frame); the distinctions exist for logging and for tests.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Key material could not be parsed or re-encoded.
    #[error("malformed key material: {0}")]
    MalformedKey(String),

    /// An RSA primitive (keygen, OAEP, PSS) failed.
    #[error("rsa operation failed: {0}")]
    Rsa(#[from] rsa::Error),

    /// AES-GCM refused the payload (bad key, nonce, or tag).
    #[error("symmetric cipher failure")]
    Cipher,

    /// A sealed packet is shorter than its fixed-length sections.
    #[error("sealed packet too short")]
    Truncated,

    /// The embedded sender signature does not verify against the embedded
    /// modulus.
    #[error("sender signature does not verify")]
    BadSignature,

    /// Reading or writing persisted key files failed.
    #[error("key storage: {0}")]
    Io(#[from] std::io::Error),
}
