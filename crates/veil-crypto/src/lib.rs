//! Identity and envelope primitives for the veil overlay.
//!
//! A node's long-term identity is an RSA-2048 key pair. Peers address each
//! other by *mesh identifier* (base64 of the PEM-encoded public key) or by
//! its *mesh hash* (hex SHA-256 of the identifier), never by network
//! address. Two envelope flavours travel over the wire: a raw RSA-OAEP block
//! for the admission challenge, and a hybrid sealed+signed packet for
//! everything that must be both confidential and attributable.

mod envelope;
mod error;
mod identity;

pub use envelope::{open, seal, unwrap_challenge, wrap_challenge};
pub use error::CryptoError;
pub use identity::{public_key_of, Identity, MeshHash, MeshId};

/// Convenience alias used throughout the crate.
pub type CryptoResult<T> = Result<T, CryptoError>;
