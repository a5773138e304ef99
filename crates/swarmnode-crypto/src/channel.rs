//! Channel encryption
//!
//! Hybrid encryption between a node and the holder of an ephemeral
//! X25519 key: derive a symmetric key from ECDH, then apply one of three
//! interchangeable symmetric ciphers. All three prepend their nonce/IV
//! to the ciphertext.
//!
//! AES-CBC carries no authentication tag and is kept only so that
//! legacy inbound traffic keeps decrypting; a successful CBC decrypt is
//! not proof of integrity and must never be relied on for new messages.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use blake2::Blake2bVar;
use chacha20poly1305::XChaCha20Poly1305;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::constants::{AUTH_TAG_SIZE, CBC_IV_SIZE, GCM_NONCE_SIZE, XCHACHA_NONCE_SIZE};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::{X25519Pubkey, X25519Seckey};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Domain-separation key for the legacy AES-GCM key derivation
const GCM_KDF_SALT: &[u8] = b"LOKI";

/// The symmetric cipher applied on top of the key exchange
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EncType {
    /// AES-256-GCM with an HMAC-SHA256 derived key (the legacy default)
    #[default]
    AesGcm,
    /// AES-256-CBC over the raw shared secret; unauthenticated
    AesCbc,
    /// XChaCha20-Poly1305 with a BLAKE2b derived, direction-bound key
    XChaCha20,
}

impl EncType {
    /// Parse the wire names, including the short legacy aliases
    pub fn parse(s: &str) -> CryptoResult<Self> {
        match s {
            "aes-gcm" | "gcm" => Ok(EncType::AesGcm),
            "aes-cbc" | "cbc" => Ok(EncType::AesCbc),
            "xchacha20" => Ok(EncType::XChaCha20),
            other => Err(CryptoError::InvalidEncType(other.to_string())),
        }
    }
}

impl fmt::Display for EncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EncType::AesGcm => "aes-gcm",
            EncType::AesCbc => "aes-cbc",
            EncType::XChaCha20 => "xchacha20",
        };
        write!(f, "{name}")
    }
}

/// A node's end of the encrypted channel.
///
/// Holds the long-lived X25519 keypair; immutable once constructed and
/// safe to share by reference across request tasks.
pub struct ChannelCipher {
    private_key: X25519Seckey,
    public_key: X25519Pubkey,
}

impl ChannelCipher {
    /// Build from an existing secret key (normally from the keystore)
    pub fn new(private_key: X25519Seckey) -> Self {
        let public_key = private_key.public_key();
        Self {
            private_key,
            public_key,
        }
    }

    /// Generate a throwaway keypair
    pub fn generate() -> Self {
        Self::new(X25519Seckey::generate())
    }

    /// Our public key, as handed out to clients
    pub fn public_key(&self) -> X25519Pubkey {
        self.public_key
    }

    /// Encrypt `plaintext` for the holder of `peer` using `enc_type`
    pub fn encrypt(
        &self,
        enc_type: EncType,
        plaintext: &[u8],
        peer: &X25519Pubkey,
    ) -> CryptoResult<Vec<u8>> {
        match enc_type {
            EncType::AesGcm => self.encrypt_gcm(plaintext, peer),
            EncType::AesCbc => self.encrypt_cbc(plaintext, peer),
            EncType::XChaCha20 => self.encrypt_xchacha20(plaintext, peer),
        }
    }

    /// Decrypt `ciphertext` that the holder of `peer` encrypted for us
    pub fn decrypt(
        &self,
        enc_type: EncType,
        ciphertext: &[u8],
        peer: &X25519Pubkey,
    ) -> CryptoResult<Vec<u8>> {
        match enc_type {
            EncType::AesGcm => self.decrypt_gcm(ciphertext, peer),
            EncType::AesCbc => self.decrypt_cbc(ciphertext, peer),
            EncType::XChaCha20 => self.decrypt_xchacha20(ciphertext, peer),
        }
    }

    /// Symmetric key for GCM: HMAC-SHA256 keyed with "LOKI" over the
    /// shared secret
    fn gcm_key(&self, peer: &X25519Pubkey) -> CryptoResult<[u8; 32]> {
        let shared = self.private_key.diffie_hellman(peer)?;
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(GCM_KDF_SALT)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        mac.update(&shared);
        let mut key = [0u8; 32];
        key.copy_from_slice(&mac.finalize().into_bytes());
        Ok(key)
    }

    /// Symmetric key for XChaCha20: BLAKE2b-32 over the shared secret
    /// followed by sender then receiver public keys
    fn xchacha20_key(&self, peer: &X25519Pubkey, sending: bool) -> CryptoResult<[u8; 32]> {
        use blake2::digest::{Update, VariableOutput};

        let shared = self.private_key.diffie_hellman(peer)?;

        let (first, second) = if sending {
            (&self.public_key, peer)
        } else {
            (peer, &self.public_key)
        };

        let mut hasher =
            Blake2bVar::new(32).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        hasher.update(&shared);
        hasher.update(first.as_bytes());
        hasher.update(second.as_bytes());

        let mut key = [0u8; 32];
        hasher
            .finalize_variable(&mut key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        Ok(key)
    }

    fn encrypt_gcm(&self, plaintext: &[u8], peer: &X25519Pubkey) -> CryptoResult<Vec<u8>> {
        let key = self.gcm_key(peer)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut nonce = [0u8; GCM_NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(aes_gcm::Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed("AES-GCM".into()))?;

        // nonce(12) || ciphertext || tag(16)
        let mut out = Vec::with_capacity(GCM_NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt_gcm(&self, ciphertext: &[u8], peer: &X25519Pubkey) -> CryptoResult<Vec<u8>> {
        if ciphertext.len() < GCM_NONCE_SIZE + AUTH_TAG_SIZE {
            return Err(CryptoError::InvalidCiphertext);
        }
        let key = self.gcm_key(peer)?;
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::InvalidCiphertext)?;

        let (nonce, body) = ciphertext.split_at(GCM_NONCE_SIZE);
        cipher
            .decrypt(aes_gcm::Nonce::from_slice(nonce), body)
            .map_err(|_| CryptoError::InvalidCiphertext)
    }

    fn encrypt_cbc(&self, plaintext: &[u8], peer: &X25519Pubkey) -> CryptoResult<Vec<u8>> {
        use aes::cipher::block_padding::Pkcs7;
        use aes::cipher::{BlockEncryptMut, KeyIvInit};

        // CBC keys the cipher with the raw shared secret, not a hash of it
        let key = self.private_key.diffie_hellman(peer)?;

        let mut iv = [0u8; CBC_IV_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut iv);

        let ciphertext = Aes256CbcEnc::new_from_slices(&key, &iv)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        // iv(16) || ciphertext
        let mut out = Vec::with_capacity(CBC_IV_SIZE + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt_cbc(&self, ciphertext: &[u8], peer: &X25519Pubkey) -> CryptoResult<Vec<u8>> {
        use aes::cipher::block_padding::Pkcs7;
        use aes::cipher::{BlockDecryptMut, KeyIvInit};

        if ciphertext.len() <= CBC_IV_SIZE {
            return Err(CryptoError::InvalidCiphertext);
        }
        let key = self.private_key.diffie_hellman(peer)?;

        let (iv, body) = ciphertext.split_at(CBC_IV_SIZE);
        Aes256CbcDec::new_from_slices(&key, iv)
            .map_err(|_| CryptoError::InvalidCiphertext)?
            .decrypt_padded_vec_mut::<Pkcs7>(body)
            .map_err(|_| CryptoError::InvalidCiphertext)
    }

    fn encrypt_xchacha20(&self, plaintext: &[u8], peer: &X25519Pubkey) -> CryptoResult<Vec<u8>> {
        let key = self.xchacha20_key(peer, true)?;
        let cipher = XChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut nonce = [0u8; XCHACHA_NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(chacha20poly1305::XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed("XChaCha20-Poly1305".into()))?;

        // nonce(24) || ciphertext || tag(16)
        let mut out = Vec::with_capacity(XCHACHA_NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt_xchacha20(&self, ciphertext: &[u8], peer: &X25519Pubkey) -> CryptoResult<Vec<u8>> {
        if ciphertext.len() < XCHACHA_NONCE_SIZE + AUTH_TAG_SIZE {
            return Err(CryptoError::InvalidCiphertext);
        }
        let key = self.xchacha20_key(peer, false)?;
        let cipher =
            XChaCha20Poly1305::new_from_slice(&key).map_err(|_| CryptoError::InvalidCiphertext)?;

        let (nonce, body) = ciphertext.split_at(XCHACHA_NONCE_SIZE);
        cipher
            .decrypt(chacha20poly1305::XNonce::from_slice(nonce), body)
            .map_err(|_| CryptoError::InvalidCiphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (ChannelCipher, ChannelCipher) {
        (ChannelCipher::generate(), ChannelCipher::generate())
    }

    #[test]
    fn test_enc_type_parsing() {
        assert_eq!(EncType::parse("aes-gcm").unwrap(), EncType::AesGcm);
        assert_eq!(EncType::parse("gcm").unwrap(), EncType::AesGcm);
        assert_eq!(EncType::parse("aes-cbc").unwrap(), EncType::AesCbc);
        assert_eq!(EncType::parse("cbc").unwrap(), EncType::AesCbc);
        assert_eq!(EncType::parse("xchacha20").unwrap(), EncType::XChaCha20);
        assert!(EncType::parse("rot13").is_err());
    }

    #[test]
    fn test_enc_type_default_is_gcm() {
        assert_eq!(EncType::default(), EncType::AesGcm);
    }

    #[test]
    fn test_gcm_round_trip() {
        let (a, b) = pair();
        let msg = b"gcm message";

        let ct = a.encrypt(EncType::AesGcm, msg, &b.public_key()).unwrap();
        assert_eq!(ct.len(), GCM_NONCE_SIZE + msg.len() + AUTH_TAG_SIZE);

        let pt = b.decrypt(EncType::AesGcm, &ct, &a.public_key()).unwrap();
        assert_eq!(pt, msg);
    }

    #[test]
    fn test_cbc_round_trip() {
        let (a, b) = pair();
        let msg = b"cbc message with a couple of blocks worth of data";

        let ct = a.encrypt(EncType::AesCbc, msg, &b.public_key()).unwrap();
        let pt = b.decrypt(EncType::AesCbc, &ct, &a.public_key()).unwrap();
        assert_eq!(pt, msg);
    }

    #[test]
    fn test_xchacha20_round_trip() {
        let (a, b) = pair();
        let msg = b"xchacha20 message";

        let ct = a.encrypt(EncType::XChaCha20, msg, &b.public_key()).unwrap();
        assert_eq!(ct.len(), XCHACHA_NONCE_SIZE + msg.len() + AUTH_TAG_SIZE);

        let pt = b.decrypt(EncType::XChaCha20, &ct, &a.public_key()).unwrap();
        assert_eq!(pt, msg);
    }

    #[test]
    fn test_xchacha20_key_is_direction_bound() {
        // Both directions must agree even though the key hashes the two
        // public keys in sender-then-receiver order.
        let (a, b) = pair();
        let ka = a.xchacha20_key(&b.public_key(), true).unwrap();
        let kb = b.xchacha20_key(&a.public_key(), false).unwrap();
        assert_eq!(ka, kb);

        // The reverse direction derives a different key.
        let kr = b.xchacha20_key(&a.public_key(), true).unwrap();
        assert_ne!(ka, kr);
    }

    #[test]
    fn test_tampered_gcm_fails() {
        let (a, b) = pair();
        let mut ct = a
            .encrypt(EncType::AesGcm, b"payload", &b.public_key())
            .unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0x01;

        assert!(matches!(
            b.decrypt(EncType::AesGcm, &ct, &a.public_key()),
            Err(CryptoError::InvalidCiphertext)
        ));
    }

    #[test]
    fn test_wrong_peer_fails() {
        let (a, b) = pair();
        let mallory = ChannelCipher::generate();

        let ct = a
            .encrypt(EncType::XChaCha20, b"secret", &b.public_key())
            .unwrap();
        assert!(b
            .decrypt(EncType::XChaCha20, &ct, &mallory.public_key())
            .is_err());
    }

    #[test]
    fn test_short_input_fails() {
        let (a, b) = pair();
        for enc_type in [EncType::AesGcm, EncType::AesCbc, EncType::XChaCha20] {
            assert!(matches!(
                a.decrypt(enc_type, &[0u8; 4], &b.public_key()),
                Err(CryptoError::InvalidCiphertext)
            ));
        }
    }

    #[test]
    fn test_empty_plaintext_gcm() {
        let (a, b) = pair();
        let ct = a.encrypt(EncType::AesGcm, b"", &b.public_key()).unwrap();
        let pt = b.decrypt(EncType::AesGcm, &ct, &a.public_key()).unwrap();
        assert!(pt.is_empty());
    }
}
