//! Cryptographic error types

use thiserror::Error;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid key length provided
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Key string is not valid lowercase hex
    #[error("Invalid hex in key material")]
    InvalidHex,

    /// Ciphertext failed to decrypt: too short, bad tag, bad padding,
    /// or a degenerate key exchange
    #[error("Invalid ciphertext")]
    InvalidCiphertext,

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// The named encryption type is not recognized
    #[error("Invalid encryption type: {0}")]
    InvalidEncType(String),

    /// Signature does not verify against the signer's key
    #[error("Invalid signature")]
    InvalidSignature,

    /// Signer is not a known node
    #[error("Unknown signer")]
    UnknownSigner,

    /// Invalid public key bytes (e.g. not a valid Ed25519 point)
    #[error("Invalid public key")]
    InvalidPublicKey,
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;
