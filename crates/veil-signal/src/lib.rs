//! Wire formats for the veil overlay.
//!
//! Every transport frame carries exactly one [`Signal`]: a 1-byte type tag
//! followed by an opaque payload, self-delimiting because the transport
//! frames it. The invitation protocol additionally nests `|`-delimited
//! tuples ([`Invite`], [`Offer`], [`Answer`]) and two fixed-prefix payloads
//! ([`NeedInvite`], [`ConnectionProof`]) inside sealed envelopes.

mod error;
mod handshake;
mod signal;

pub use error::CodecError;
pub use handshake::{Answer, ConnectionProof, Invite, NeedInvite, Offer, SECRET_LEN, SIGN_LEN};
pub use signal::{Income, Signal, SignalKind};
