//! The 1-byte-tag signal framing and the dispatcher's inbound unit.

use std::fmt;

use veil_crypto::MeshHash;

use crate::CodecError;

/// Every message class that travels the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SignalKind {
    /// Synthesised locally when an unverified peer attaches; never sent.
    Challenge = 0x00,
    /// Verifier → newcomer: OAEP-wrapped random value to prove key possession.
    SolveChallenge = 0x01,
    /// Newcomer → verifier: the recovered challenge plaintext.
    TestChallenge = 0x02,
    /// Orchestrator → mesh: solicit brokers for a freshly verified newcomer.
    NeedInviteForNewbie = 0x03,
    /// Broker → orchestrator → newcomer: sealed invite tuple.
    InviteForNewbie = 0x04,
    /// Newcomer → mesh: sealed WebRTC offer for one broker.
    NewbieOffer = 0x05,
    /// Broker → orchestrator → newcomer: sealed WebRTC answer.
    AnswerForNewbie = 0x06,
    /// Broker → newcomer, over the fresh data channel: the connection secret.
    ConnectionSecret = 0x07,
    /// Newcomer → orchestrator: proof that a brokered channel exists.
    ConnectionEstablished = 0x08,
}

impl SignalKind {
    pub fn from_byte(b: u8) -> Result<Self, CodecError> {
        Ok(match b {
            0x00 => Self::Challenge,
            0x01 => Self::SolveChallenge,
            0x02 => Self::TestChallenge,
            0x03 => Self::NeedInviteForNewbie,
            0x04 => Self::InviteForNewbie,
            0x05 => Self::NewbieOffer,
            0x06 => Self::AnswerForNewbie,
            0x07 => Self::ConnectionSecret,
            0x08 => Self::ConnectionEstablished,
            other => return Err(CodecError::UnknownKind(other)),
        })
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Challenge => "Challenge",
            Self::SolveChallenge => "SolveChallenge",
            Self::TestChallenge => "TestChallenge",
            Self::NeedInviteForNewbie => "NeedInviteForNewbie",
            Self::InviteForNewbie => "InviteForNewbie",
            Self::NewbieOffer => "NewbieOffer",
            Self::AnswerForNewbie => "AnswerForNewbie",
            Self::ConnectionSecret => "ConnectionSecret",
            Self::ConnectionEstablished => "ConnectionEstablished",
        };
        f.write_str(name)
    }
}

/// One wire frame: type tag plus opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub kind: SignalKind,
    pub payload: Vec<u8>,
}

impl Signal {
    pub fn new(kind: SignalKind, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.payload.len());
        out.push(self.kind as u8);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        let (&tag, payload) = frame.split_first().ok_or(CodecError::Truncated("type tag"))?;
        Ok(Self {
            kind: SignalKind::from_byte(tag)?,
            payload: payload.to_vec(),
        })
    }
}

/// The unit the dispatcher consumes: a signal tagged with the mesh hash of
/// the slot it arrived on.
#[derive(Debug, Clone)]
pub struct Income {
    pub from: MeshHash,
    pub signal: Signal,
}

impl Income {
    pub fn new(from: MeshHash, signal: Signal) -> Self {
        Self { from, signal }
    }

    pub fn kind(&self) -> SignalKind {
        self.signal.kind
    }
}
