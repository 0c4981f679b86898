//! `|`-delimited handshake tuples and fixed-prefix payloads.
//!
//! Mesh identifiers are base64 and therefore `|`-free, so the first fields
//! of each tuple are located by separator search. The 32-byte `sign` and
//! `secret` runs are raw binary: they are read by length, never by
//! separator, and the SDP is always the trailing field.

use veil_crypto::MeshId;

use crate::CodecError;

/// Length of the broker's identity proof inside an invite/offer.
pub const SIGN_LEN: usize = 32;
/// Length of the connection secret a broker discloses over the channel.
pub const SECRET_LEN: usize = 32;

const SEP: u8 = b'|';

/// A broker's sealed response to a `NeedInviteForNewbie`.
///
/// The copy the orchestrator caches carries the secret; the copy forwarded
/// to the newcomer has it stripped (`secret == None`, marshalled as an
/// empty trailing field).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invite {
    pub to: MeshId,
    pub from: MeshId,
    pub sign: [u8; SIGN_LEN],
    pub secret: Option<[u8; SECRET_LEN]>,
}

impl Invite {
    pub fn encode(&self) -> Vec<u8> {
        let secret_len = self.secret.map_or(0, |s| s.len());
        let mut out = Vec::with_capacity(
            self.to.as_bytes().len() + self.from.as_bytes().len() + SIGN_LEN + secret_len + 3,
        );
        out.extend_from_slice(self.to.as_bytes());
        out.push(SEP);
        out.extend_from_slice(self.from.as_bytes());
        out.push(SEP);
        out.extend_from_slice(&self.sign);
        out.push(SEP);
        if let Some(secret) = &self.secret {
            out.extend_from_slice(secret);
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let (to, rest) = split_mesh_field(data, "invite.to")?;
        let (from, rest) = split_mesh_field(rest, "invite.from")?;
        let (sign, rest) = split_fixed_run(rest, "invite.sign")?;
        let secret = match rest.len() {
            0 => None,
            SECRET_LEN => {
                let mut secret = [0u8; SECRET_LEN];
                secret.copy_from_slice(rest);
                Some(secret)
            }
            _ => return Err(CodecError::BadLength("invite.secret")),
        };
        Ok(Self {
            to,
            from,
            sign,
            secret,
        })
    }

    /// The newcomer-bound rendition: same tuple, secret withheld.
    pub fn stripped(&self) -> Self {
        Self {
            secret: None,
            ..self.clone()
        }
    }
}

/// The newcomer's sealed WebRTC offer toward one broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub from: MeshId,
    pub sign: [u8; SIGN_LEN],
    pub sdp: Vec<u8>,
}

impl Offer {
    pub fn encode(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(self.from.as_bytes().len() + SIGN_LEN + self.sdp.len() + 2);
        out.extend_from_slice(self.from.as_bytes());
        out.push(SEP);
        out.extend_from_slice(&self.sign);
        out.push(SEP);
        out.extend_from_slice(&self.sdp);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let (from, rest) = split_mesh_field(data, "offer.from")?;
        let (sign, sdp) = split_fixed_run(rest, "offer.sign")?;
        Ok(Self {
            from,
            sign,
            sdp: sdp.to_vec(),
        })
    }
}

/// A broker's sealed WebRTC answer, relayed through the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub from: MeshId,
    pub to: MeshId,
    pub sdp: Vec<u8>,
}

impl Answer {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.from.as_bytes().len() + self.to.as_bytes().len() + self.sdp.len() + 2,
        );
        out.extend_from_slice(self.from.as_bytes());
        out.push(SEP);
        out.extend_from_slice(self.to.as_bytes());
        out.push(SEP);
        out.extend_from_slice(&self.sdp);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let (from, rest) = split_mesh_field(data, "answer.from")?;
        let (to, sdp) = split_mesh_field(rest, "answer.to")?;
        Ok(Self {
            from,
            to,
            sdp: sdp.to_vec(),
        })
    }
}

/// Payload of `NeedInviteForNewbie`: a fresh 32-byte token (dedup entropy)
/// followed by the orchestrator's mesh identifier, which brokers use as the
/// sealing target for their invite and answer envelopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeedInvite {
    pub token: [u8; 32],
    pub orchestrator: MeshId,
}

impl NeedInvite {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.orchestrator.as_bytes().len());
        out.extend_from_slice(&self.token);
        out.extend_from_slice(self.orchestrator.as_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let (token, mesh) = split_prefix(data, "need-invite token")?;
        Ok(Self {
            token,
            orchestrator: mesh_from_bytes(mesh, "need-invite mesh")?,
        })
    }
}

/// Payload of `ConnectionEstablished`: the broker's disclosed secret
/// followed by the broker's mesh identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProof {
    pub secret: [u8; SECRET_LEN],
    pub broker: MeshId,
}

impl ConnectionProof {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SECRET_LEN + self.broker.as_bytes().len());
        out.extend_from_slice(&self.secret);
        out.extend_from_slice(self.broker.as_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let (secret, mesh) = split_prefix(data, "connection secret")?;
        Ok(Self {
            secret,
            broker: mesh_from_bytes(mesh, "connection broker")?,
        })
    }
}

fn split_mesh_field<'a>(
    data: &'a [u8],
    field: &'static str,
) -> Result<(MeshId, &'a [u8]), CodecError> {
    let sep = data
        .iter()
        .position(|&b| b == SEP)
        .ok_or(CodecError::MissingSeparator(field))?;
    let mesh = mesh_from_bytes(&data[..sep], field)?;
    Ok((mesh, &data[sep + 1..]))
}

fn split_fixed_run<'a>(
    data: &'a [u8],
    field: &'static str,
) -> Result<([u8; 32], &'a [u8]), CodecError> {
    if data.len() < 32 {
        return Err(CodecError::Truncated(field));
    }
    let mut run = [0u8; 32];
    run.copy_from_slice(&data[..32]);
    let rest = &data[32..];
    let (&sep, rest) = rest.split_first().ok_or(CodecError::Truncated(field))?;
    if sep != SEP {
        return Err(CodecError::MissingSeparator(field));
    }
    Ok((run, rest))
}

fn split_prefix<'a>(
    data: &'a [u8],
    field: &'static str,
) -> Result<([u8; 32], &'a [u8]), CodecError> {
    if data.len() <= 32 {
        return Err(CodecError::Truncated(field));
    }
    let mut prefix = [0u8; 32];
    prefix.copy_from_slice(&data[..32]);
    Ok((prefix, &data[32..]))
}

fn mesh_from_bytes(bytes: &[u8], field: &'static str) -> Result<MeshId, CodecError> {
    let s = std::str::from_utf8(bytes).map_err(|_| CodecError::BadMeshId(field))?;
    Ok(MeshId::new(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh(tag: &str) -> MeshId {
        MeshId::new(format!("bWVzaC1pZC17e30t{tag}"))
    }

    #[test]
    fn invite_round_trips_with_secret() {
        let invite = Invite {
            to: mesh("orch"),
            from: mesh("broker"),
            sign: [7u8; 32],
            secret: Some([9u8; 32]),
        };
        assert_eq!(Invite::decode(&invite.encode()).unwrap(), invite);
    }

    #[test]
    fn invite_round_trips_without_secret() {
        let invite = Invite {
            to: mesh("orch"),
            from: mesh("broker"),
            sign: [7u8; 32],
            secret: None,
        };
        let decoded = Invite::decode(&invite.encode()).unwrap();
        assert_eq!(decoded, invite);
        assert!(decoded.secret.is_none());
    }

    #[test]
    fn stripped_invite_drops_only_the_secret() {
        let invite = Invite {
            to: mesh("orch"),
            from: mesh("broker"),
            sign: [1u8; 32],
            secret: Some([2u8; 32]),
        };
        let stripped = invite.stripped();
        assert_eq!(stripped.sign, invite.sign);
        assert!(stripped.secret.is_none());
    }

    #[test]
    fn sign_containing_separator_bytes_round_trips() {
        // 0x7c is '|'; a fixed-length run must not be split on it.
        let invite = Invite {
            to: mesh("orch"),
            from: mesh("broker"),
            sign: [b'|'; 32],
            secret: Some([b'|'; 32]),
        };
        assert_eq!(Invite::decode(&invite.encode()).unwrap(), invite);
    }

    #[test]
    fn short_secret_is_rejected() {
        let mut data = Invite {
            to: mesh("orch"),
            from: mesh("broker"),
            sign: [0u8; 32],
            secret: Some([3u8; 32]),
        }
        .encode();
        data.truncate(data.len() - 6);
        assert_eq!(
            Invite::decode(&data),
            Err(CodecError::BadLength("invite.secret"))
        );
    }

    #[test]
    fn offer_sdp_may_contain_separators() {
        let offer = Offer {
            from: mesh("newbie"),
            sign: [b'|'; 32],
            sdp: br#"{"type":"offer","sdp":"a=candidate|pipe"}"#.to_vec(),
        };
        assert_eq!(Offer::decode(&offer.encode()).unwrap(), offer);
    }

    #[test]
    fn answer_round_trips() {
        let answer = Answer {
            from: mesh("broker"),
            to: mesh("newbie"),
            sdp: br#"{"type":"answer","sdp":"v=0|m=application"}"#.to_vec(),
        };
        assert_eq!(Answer::decode(&answer.encode()).unwrap(), answer);
    }

    #[test]
    fn truncated_offer_is_rejected() {
        let offer = Offer {
            from: mesh("newbie"),
            sign: [5u8; 32],
            sdp: b"{}".to_vec(),
        };
        let data = offer.encode();
        let cut = mesh("newbie").as_bytes().len() + 10;
        assert_eq!(
            Offer::decode(&data[..cut]),
            Err(CodecError::Truncated("offer.sign"))
        );
    }

    #[test]
    fn need_invite_round_trips() {
        let req = NeedInvite {
            token: [0xaa; 32],
            orchestrator: mesh("orch"),
        };
        assert_eq!(NeedInvite::decode(&req.encode()).unwrap(), req);
    }

    #[test]
    fn connection_proof_round_trips_and_rejects_short_secret() {
        let proof = ConnectionProof {
            secret: [0x55; 32],
            broker: mesh("broker"),
        };
        assert_eq!(ConnectionProof::decode(&proof.encode()).unwrap(), proof);
        assert_eq!(
            ConnectionProof::decode(&proof.encode()[..20]),
            Err(CodecError::Truncated("connection secret"))
        );
    }
}
