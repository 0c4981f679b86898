//! Wire envelopes: raw OAEP challenge wrapping and the hybrid
//! sealed+signed packet.
//!
//! Sealed packet layout, all lengths fixed by the RSA-2048 identity scheme:
//!
//! ```text
//! enc_key(256) || nonce(12) || enc_msg(..) || sig(256) || sender_modulus(256)
//! ```
//!
//! `enc_key` is the fresh AES-256 key wrapped with RSA-OAEP-SHA256 for the
//! recipient, `enc_msg` is the AES-256-GCM ciphertext, `sig` is an
//! RSA-PSS-SHA256 signature over the SHA-256 of the plaintext, and the
//! trailing section is the sender's raw big-endian modulus (public exponent
//! fixed at 65537). Opening verifies the signature before releasing the
//! plaintext.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Oaep, Pss, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::{CryptoError, CryptoResult};

const AES_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const SIG_LEN: usize = 256;
const MODULUS_LEN: usize = 256;
const GCM_TAG_LEN: usize = 16;

const PUBLIC_EXPONENT: u64 = 65537;

/// Wrap a short secret (the 32-byte admission challenge) in a single raw
/// RSA-OAEP block for `recipient`.
pub fn wrap_challenge(secret: &[u8], recipient: &RsaPublicKey) -> CryptoResult<Vec<u8>> {
    let mut rng = rand::thread_rng();
    Ok(recipient.encrypt(&mut rng, Oaep::new::<Sha256>(), secret)?)
}

/// Recover a secret wrapped with [`wrap_challenge`].
pub fn unwrap_challenge(block: &[u8], private: &RsaPrivateKey) -> CryptoResult<Vec<u8>> {
    Ok(private.decrypt(Oaep::new::<Sha256>(), block)?)
}

/// Seal `plaintext` for `recipient`, signed by `sender`.
pub fn seal(
    plaintext: &[u8],
    recipient: &RsaPublicKey,
    sender: &RsaPrivateKey,
) -> CryptoResult<Vec<u8>> {
    let mut rng = rand::thread_rng();

    let mut aes_key = [0u8; AES_KEY_LEN];
    rng.fill_bytes(&mut aes_key);
    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce);

    let cipher = Aes256Gcm::new_from_slice(&aes_key).map_err(|_| CryptoError::Cipher)?;
    let enc_msg = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Cipher)?;

    let enc_key = recipient.encrypt(&mut rng, Oaep::new::<Sha256>(), &aes_key)?;

    let digest = Sha256::digest(plaintext);
    let sig = sender.sign_with_rng(&mut rng, Pss::new::<Sha256>(), &digest)?;

    let modulus = left_pad(&sender.n().to_bytes_be(), MODULUS_LEN);

    let mut packet =
        Vec::with_capacity(enc_key.len() + NONCE_LEN + enc_msg.len() + SIG_LEN + MODULUS_LEN);
    packet.extend_from_slice(&enc_key);
    packet.extend_from_slice(&nonce);
    packet.extend_from_slice(&enc_msg);
    packet.extend_from_slice(&sig);
    packet.extend_from_slice(&modulus);
    Ok(packet)
}

/// Open a packet produced by [`seal`], verifying the embedded sender
/// signature. Returns the plaintext only when both the GCM tag and the PSS
/// signature check out.
pub fn open(packet: &[u8], recipient: &RsaPrivateKey) -> CryptoResult<Vec<u8>> {
    let key_len = recipient.size();
    let min_len = key_len + NONCE_LEN + GCM_TAG_LEN + SIG_LEN + MODULUS_LEN;
    if packet.len() < min_len {
        return Err(CryptoError::Truncated);
    }

    let (enc_key, rest) = packet.split_at(key_len);
    let (nonce, rest) = rest.split_at(NONCE_LEN);
    let (enc_msg, rest) = rest.split_at(rest.len() - SIG_LEN - MODULUS_LEN);
    let (sig, modulus) = rest.split_at(SIG_LEN);

    let aes_key = recipient.decrypt(Oaep::new::<Sha256>(), enc_key)?;
    let cipher = Aes256Gcm::new_from_slice(&aes_key).map_err(|_| CryptoError::Cipher)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), enc_msg)
        .map_err(|_| CryptoError::Cipher)?;

    let sender = RsaPublicKey::new(
        BigUint::from_bytes_be(modulus),
        BigUint::from(PUBLIC_EXPONENT),
    )
    .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
    let digest = Sha256::digest(&plaintext);
    sender
        .verify(Pss::new::<Sha256>(), &digest, sig)
        .map_err(|_| CryptoError::BadSignature)?;

    Ok(plaintext)
}

fn left_pad(bytes: &[u8], width: usize) -> Vec<u8> {
    let mut out = vec![0u8; width.saturating_sub(bytes.len())];
    out.extend_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Identity;
    use std::sync::OnceLock;

    // RSA keygen dominates test time; share a small pool across tests.
    fn identities() -> &'static (Identity, Identity) {
        static POOL: OnceLock<(Identity, Identity)> = OnceLock::new();
        POOL.get_or_init(|| {
            (
                Identity::generate().expect("keygen"),
                Identity::generate().expect("keygen"),
            )
        })
    }

    #[test]
    fn seal_open_round_trip() {
        let (alice, bob) = identities();
        let msg = b"the quick brown fox | with a separator";
        let packet = seal(msg, bob.public(), alice.private()).expect("seal");
        let opened = open(&packet, bob.private()).expect("open");
        assert_eq!(opened, msg);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let (alice, bob) = identities();
        let mut packet = seal(b"payload", bob.public(), alice.private()).expect("seal");
        let sig_start = packet.len() - MODULUS_LEN - SIG_LEN;
        packet[sig_start] ^= 0xff;
        assert!(matches!(
            open(&packet, bob.private()),
            Err(CryptoError::BadSignature)
        ));
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let (alice, bob) = identities();
        let mut packet = seal(b"payload", bob.public(), alice.private()).expect("seal");
        let key_len = bob.private().size();
        packet[key_len + NONCE_LEN] ^= 0xff;
        assert!(matches!(
            open(&packet, bob.private()),
            Err(CryptoError::Cipher)
        ));
    }

    #[test]
    fn wrong_recipient_cannot_open() {
        let (alice, bob) = identities();
        let packet = seal(b"payload", bob.public(), alice.private()).expect("seal");
        assert!(open(&packet, alice.private()).is_err());
    }

    #[test]
    fn truncated_packet_is_rejected() {
        let (alice, bob) = identities();
        let packet = seal(b"payload", bob.public(), alice.private()).expect("seal");
        assert!(matches!(
            open(&packet[..200], bob.private()),
            Err(CryptoError::Truncated)
        ));
    }

    #[test]
    fn challenge_round_trip() {
        let (alice, _) = identities();
        let secret: Vec<u8> = (0u8..32).collect();
        let block = wrap_challenge(&secret, alice.public()).expect("wrap");
        assert_eq!(block.len(), alice.private().size());
        let recovered = unwrap_challenge(&block, alice.private()).expect("unwrap");
        assert_eq!(recovered, secret);
    }

    #[test]
    fn oversized_challenge_is_refused() {
        let (alice, _) = identities();
        // OAEP with SHA-256 over a 2048-bit key caps plaintext at 190 bytes.
        assert!(wrap_challenge(&[0u8; 200], alice.public()).is_err());
    }
}
