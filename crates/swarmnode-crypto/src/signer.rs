//! Request and certificate signing
//!
//! Nodes authenticate inter-node requests with detached Ed25519
//! signatures, carried base64-encoded in transport. The signed payload
//! is always the SHA-512 of the data in question: the request body for
//! push batches, or the PEM certificate for the TLS attestation header.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};

use crate::constants::SIGNATURE_SIZE;
use crate::error::{CryptoError, CryptoResult};
use crate::keys::Ed25519Pubkey;

/// A detached Ed25519 signature
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse the base64 transport form
    pub fn from_base64(s: &str) -> CryptoResult<Self> {
        let bytes = BASE64.decode(s).map_err(|_| CryptoError::InvalidSignature)?;
        if bytes.len() != SIGNATURE_SIZE {
            return Err(CryptoError::InvalidSignature);
        }
        let mut out = [0u8; SIGNATURE_SIZE];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }

    /// The base64 transport form
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}..)", &self.to_base64()[..8])
    }
}

/// SHA-512 of a request body or certificate, the value actually signed
pub fn hash_data(data: &[u8]) -> [u8; 64] {
    let mut hash = [0u8; 64];
    hash.copy_from_slice(&Sha512::digest(data));
    hash
}

/// This node's signing half
pub struct RequestSigner {
    signing_key: SigningKey,
}

impl RequestSigner {
    /// Generate a fresh signing key
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore from the 32-byte seed held in the keystore
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Our Ed25519 public key
    pub fn public_key(&self) -> Ed25519Pubkey {
        Ed25519Pubkey::from_bytes(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a request body
    pub fn sign(&self, body: &[u8]) -> Signature {
        let sig = self.signing_key.sign(&hash_data(body));
        Signature::from_bytes(sig.to_bytes())
    }

    /// Sign our TLS certificate (PEM bytes) for the attestation header
    pub fn sign_cert(&self, cert_pem: &[u8]) -> Signature {
        self.sign(cert_pem)
    }

    /// Export the seed for the keystore
    pub fn to_seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

/// Verify a detached signature over `body` from `signer`
pub fn verify(signer: &Ed25519Pubkey, body: &[u8], sig: &Signature) -> CryptoResult<()> {
    let key = VerifyingKey::from_bytes(signer.as_bytes())
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig = ed25519_dalek::Signature::from_bytes(sig.as_bytes());

    key.verify(&hash_data(body), &sig)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Verify the transport form of a signature.
///
/// `signer` is the result of looking the sender up in the node tables;
/// `None` means the sender is not a node we know about.
pub fn verify_base64(
    signer: Option<&Ed25519Pubkey>,
    body: &[u8],
    sig_b64: &str,
) -> CryptoResult<()> {
    let signer = signer.ok_or(CryptoError::UnknownSigner)?;
    let sig = Signature::from_base64(sig_b64)?;
    verify(signer, body, &sig)
}
