//! Node identity: RSA-2048 key pair and mesh addressing.

use std::fmt;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{CryptoError, CryptoResult};

/// RSA key length used for every identity on the mesh.
pub const KEY_BITS: usize = 2048;

/// A node's public identity: base64 of its PEM-encoded public key.
///
/// This is the only name peers ever exchange; it doubles as the key material
/// needed to seal envelopes toward its owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeshId(String);

/// Short routing key: hex SHA-256 of the mesh identifier bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeshHash(String);

impl MeshId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the routing hash for this identifier.
    pub fn hash(&self) -> MeshHash {
        let digest = Sha256::digest(self.0.as_bytes());
        MeshHash(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl MeshHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The full identifier is a kilobyte of base64; keep log lines sane.
        write!(f, "{}…", &self.0[..self.0.len().min(12)])
    }
}

impl fmt::Display for MeshHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MeshId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<String> for MeshHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Recover the RSA public key a mesh identifier encodes.
pub fn public_key_of(mesh: &MeshId) -> CryptoResult<RsaPublicKey> {
    let pem = BASE64
        .decode(mesh.as_bytes())
        .map_err(|e| CryptoError::MalformedKey(format!("identifier is not base64: {e}")))?;
    let pem = std::str::from_utf8(&pem)
        .map_err(|e| CryptoError::MalformedKey(format!("identifier is not utf-8 pem: {e}")))?;
    RsaPublicKey::from_public_key_pem(pem)
        .map_err(|e| CryptoError::MalformedKey(format!("identifier is not a public key: {e}")))
}

/// A node's long-term key pair together with its derived mesh addresses.
pub struct Identity {
    private: RsaPrivateKey,
    public: RsaPublicKey,
    mesh: MeshId,
    hash: MeshHash,
}

impl Identity {
    /// Generate a fresh RSA-2048 identity.
    pub fn generate() -> CryptoResult<Self> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, KEY_BITS)?;
        Self::from_private(private)
    }

    /// Build the derived addresses for an existing private key.
    pub fn from_private(private: RsaPrivateKey) -> CryptoResult<Self> {
        let public = private.to_public_key();
        let pem = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        let mesh = MeshId::new(BASE64.encode(pem.as_bytes()));
        let hash = mesh.hash();
        Ok(Self {
            private,
            public,
            mesh,
            hash,
        })
    }

    /// Load the key pair from `private_path`/`public_path`, generating and
    /// persisting a fresh pair when both files are absent.
    pub fn load_or_generate(
        private_path: impl AsRef<Path>,
        public_path: impl AsRef<Path>,
    ) -> CryptoResult<Self> {
        let private_path = private_path.as_ref();
        let public_path = public_path.as_ref();

        if private_path.exists() && public_path.exists() {
            let pem = std::fs::read_to_string(private_path)?;
            let private = RsaPrivateKey::from_pkcs1_pem(&pem)
                .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
            return Self::from_private(private);
        }

        tracing::info!(
            private = %private_path.display(),
            public = %public_path.display(),
            "generating node key pair"
        );
        let identity = Self::generate()?;
        let private_pem = identity
            .private
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        std::fs::write(private_path, private_pem.as_bytes())?;
        let public_pem = identity
            .public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        std::fs::write(public_path, public_pem.as_bytes())?;
        Ok(identity)
    }

    pub fn mesh(&self) -> &MeshId {
        &self.mesh
    }

    pub fn hash(&self) -> &MeshHash {
        &self.hash
    }

    pub fn public(&self) -> &RsaPublicKey {
        &self.public
    }

    pub fn private(&self) -> &RsaPrivateKey {
        &self.private
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity").field("hash", &self.hash).finish()
    }
}
