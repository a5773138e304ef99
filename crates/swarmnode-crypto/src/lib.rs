//! Swarmnode Cryptographic Primitives
//!
//! This crate provides the cryptographic operations used by a storage
//! service node:
//! - Fixed-width key types with hex / z-base-32 codecs
//! - Hybrid channel encryption (X25519 + AES-GCM / AES-CBC / XChaCha20)
//! - Ed25519 request and certificate signing

pub mod channel;
pub mod error;
pub mod keys;
pub mod signer;

pub use channel::{ChannelCipher, EncType};
pub use error::{CryptoError, CryptoResult};
pub use keys::{Ed25519Pubkey, LegacyPubkey, X25519Pubkey, X25519Seckey};
pub use signer::{RequestSigner, Signature};

/// Protocol constants
pub mod constants {
    /// Width of every node public key (legacy, Ed25519, X25519)
    pub const PUBKEY_SIZE: usize = 32;

    /// AES-256-GCM nonce size
    pub const GCM_NONCE_SIZE: usize = 12;

    /// AES-256-CBC initialization vector size
    pub const CBC_IV_SIZE: usize = 16;

    /// XChaCha20-Poly1305 nonce size
    pub const XCHACHA_NONCE_SIZE: usize = 24;

    /// Poly1305 / GCM authentication tag size
    pub const AUTH_TAG_SIZE: usize = 16;

    /// Ed25519 signature size
    pub const SIGNATURE_SIZE: usize = 64;
}
