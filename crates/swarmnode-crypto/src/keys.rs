//! Node key types
//!
//! Every node is reachable under three 32-byte public keys: the legacy
//! key it registered with, an Ed25519 key used for signatures, and the
//! X25519 key used for channel encryption. The types are deliberately
//! distinct so one kind can never be passed where another is expected.

use std::fmt;

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as DalekPublic, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::constants::PUBKEY_SIZE;
use crate::error::{CryptoError, CryptoResult};

macro_rules! fixed_pubkey {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name([u8; PUBKEY_SIZE]);

        impl $name {
            /// Create from raw bytes
            pub fn from_bytes(bytes: [u8; PUBKEY_SIZE]) -> Self {
                Self(bytes)
            }

            /// Try to create from a slice
            pub fn try_from_slice(slice: &[u8]) -> CryptoResult<Self> {
                if slice.len() != PUBKEY_SIZE {
                    return Err(CryptoError::InvalidKeyLength {
                        expected: PUBKEY_SIZE,
                        actual: slice.len(),
                    });
                }
                let mut bytes = [0u8; PUBKEY_SIZE];
                bytes.copy_from_slice(slice);
                Ok(Self(bytes))
            }

            /// Parse from an unprefixed hex string
            pub fn from_hex(s: &str) -> CryptoResult<Self> {
                if s.len() != PUBKEY_SIZE * 2 {
                    return Err(CryptoError::InvalidKeyLength {
                        expected: PUBKEY_SIZE * 2,
                        actual: s.len(),
                    });
                }
                let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidHex)?;
                Self::try_from_slice(&bytes)
            }

            /// Lowercase hex form, no prefix
            pub fn hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Get raw bytes
            pub fn as_bytes(&self) -> &[u8; PUBKEY_SIZE] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({}..)"), &self.hex()[..8])
            }
        }
    };
}

fixed_pubkey! {
    /// The key a node registered on-chain with
    LegacyPubkey
}

fixed_pubkey! {
    /// Ed25519 signing key of a node
    Ed25519Pubkey
}

fixed_pubkey! {
    /// X25519 channel-encryption key of a node
    X25519Pubkey
}

impl LegacyPubkey {
    /// The `<zbase32>.snode` address form used in client-facing node lists
    pub fn snode_address(&self) -> String {
        format!("{}.snode", to_base32z(&self.0))
    }
}

/// An X25519 secret key, zeroized on drop
#[derive(ZeroizeOnDrop)]
pub struct X25519Seckey {
    inner: StaticSecret,
}

impl X25519Seckey {
    /// Generate a fresh secret key
    pub fn generate() -> Self {
        Self {
            inner: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; PUBKEY_SIZE]) -> Self {
        Self {
            inner: StaticSecret::from(bytes),
        }
    }

    /// Try to create from a slice
    pub fn try_from_slice(slice: &[u8]) -> CryptoResult<Self> {
        if slice.len() != PUBKEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: PUBKEY_SIZE,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; PUBKEY_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self::from_bytes(bytes))
    }

    /// The corresponding public key
    pub fn public_key(&self) -> X25519Pubkey {
        X25519Pubkey::from_bytes(DalekPublic::from(&self.inner).to_bytes())
    }

    /// Curve25519 scalar multiplication with the peer's public key.
    ///
    /// Rejects degenerate exchanges (all-zero shared point), which a
    /// malicious peer can force with a small-order public key.
    pub fn diffie_hellman(&self, their_public: &X25519Pubkey) -> CryptoResult<[u8; 32]> {
        let shared = self
            .inner
            .diffie_hellman(&DalekPublic::from(*their_public.as_bytes()));
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidCiphertext);
        }
        Ok(shared.to_bytes())
    }

    /// Export raw bytes (for the keystore only)
    pub fn to_bytes(&self) -> [u8; PUBKEY_SIZE] {
        self.inner.to_bytes()
    }
}

impl Clone for X25519Seckey {
    fn clone(&self) -> Self {
        Self::from_bytes(self.to_bytes())
    }
}

impl fmt::Debug for X25519Seckey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519Seckey(..)")
    }
}

const ZBASE32_ALPHABET: &[u8; 32] = b"ybndrfg8ejkmcpqxot1uwisza345h769";

/// Encode bytes as z-base-32 (the alphabet used for `.snode` addresses)
pub fn to_base32z(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8).div_ceil(5));
    let mut buf: u32 = 0;
    let mut bits = 0;

    for &byte in data {
        buf = (buf << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ZBASE32_ALPHABET[((buf >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(ZBASE32_ALPHABET[((buf << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

/// Decode a z-base-32 string; trailing partial bits are discarded
pub fn from_base32z(s: &str) -> CryptoResult<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    let mut buf: u32 = 0;
    let mut bits = 0;

    for c in s.bytes() {
        let val = ZBASE32_ALPHABET
            .iter()
            .position(|&a| a == c)
            .ok_or(CryptoError::InvalidHex)?;
        buf = (buf << 5) | val as u32;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((buf >> bits) & 0xff) as u8);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let hex = "ffffeeeeddddccccbbbbaaaa9999888877776666555544443333222211110000";
        let pk = Ed25519Pubkey::from_hex(hex).unwrap();
        assert_eq!(pk.hex(), hex);
    }

    #[test]
    fn test_hex_rejects_wrong_length() {
        assert!(matches!(
            Ed25519Pubkey::from_hex("abcd"),
            Err(CryptoError::InvalidKeyLength { .. })
        ));
    }

    #[test]
    fn test_hex_rejects_non_hex() {
        let s = "zz".repeat(32);
        assert!(matches!(
            X25519Pubkey::from_hex(&s),
            Err(CryptoError::InvalidHex)
        ));
    }

    #[test]
    fn test_no_cross_kind_equality() {
        // The types don't unify; this is a compile-time property, but we
        // at least check the byte-level accessors agree.
        let bytes = [7u8; 32];
        assert_eq!(
            LegacyPubkey::from_bytes(bytes).as_bytes(),
            Ed25519Pubkey::from_bytes(bytes).as_bytes()
        );
    }

    #[test]
    fn test_seckey_public_matches_dalek() {
        let sk = X25519Seckey::generate();
        let pk = sk.public_key();
        let again = sk.public_key();
        assert_eq!(pk, again);
    }

    #[test]
    fn test_diffie_hellman_agreement() {
        let a = X25519Seckey::generate();
        let b = X25519Seckey::generate();

        let ab = a.diffie_hellman(&b.public_key()).unwrap();
        let ba = b.diffie_hellman(&a.public_key()).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_diffie_hellman_rejects_zero_point() {
        let a = X25519Seckey::generate();
        let zero = X25519Pubkey::from_bytes([0u8; 32]);
        assert!(matches!(
            a.diffie_hellman(&zero),
            Err(CryptoError::InvalidCiphertext)
        ));
    }

    #[test]
    fn test_base32z_round_trip() {
        let data = [0xde, 0xad, 0xbe, 0xef, 0x01, 0x23];
        let encoded = to_base32z(&data);
        let decoded = from_base32z(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_snode_address_shape() {
        let pk = LegacyPubkey::from_bytes([0xab; 32]);
        let addr = pk.snode_address();
        assert!(addr.ends_with(".snode"));
        // 32 bytes -> ceil(256 / 5) = 52 characters
        assert_eq!(addr.len(), 52 + ".snode".len());
    }

    #[test]
    fn test_base32z_rejects_bad_alphabet() {
        assert!(from_base32z("not~valid").is_err());
    }
}
