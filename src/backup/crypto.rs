//! AES-256-GCM encryption of backup artifacts at rest.
//!
//! Layout of an encrypted artifact: 12-byte random nonce followed by the
//! ciphertext and its 16-byte authentication tag. There is no header, so an
//! encrypted dump carries no recognizable magic bytes.

use aes_gcm::{
    Aes256Gcm,
    aead::{Aead, AeadCore, KeyInit, OsRng, generic_array::GenericArray},
};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use std::fmt;
use zeroize::Zeroizing;

use crate::errors::{BackupError, Result};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// The single process-wide artifact key.
///
/// Every artifact in the store must be encrypted with the same key; there is
/// no record of which key produced which file.
#[derive(Clone)]
pub struct EncryptionKey(Zeroizing<[u8; KEY_LEN]>);

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        EncryptionKey(Zeroizing::new(bytes))
    }

    /// Accepts URL-safe or standard base64, padded or not, of exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim();
        let decoded = [&URL_SAFE, &URL_SAFE_NO_PAD, &STANDARD, &STANDARD_NO_PAD]
            .iter()
            .find_map(|engine| engine.decode(encoded).ok())
            .map(Zeroizing::new)
            .ok_or_else(|| BackupError::Config("encryption key is not valid base64".into()))?;

        let bytes: [u8; KEY_LEN] = decoded.as_slice().try_into().map_err(|_| {
            BackupError::Config(format!(
                "encryption key must decode to {} bytes, got {}",
                KEY_LEN,
                decoded.len()
            ))
        })?;
        Ok(Self::from_bytes(bytes))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Symmetric authenticated codec bound to one key.
#[derive(Clone)]
pub struct ArtifactCipher {
    cipher: Aes256Gcm,
}

impl ArtifactCipher {
    pub fn new(key: &EncryptionKey) -> Self {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.0.as_slice()));
        ArtifactCipher { cipher }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| BackupError::Encryption("AES-GCM encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(nonce.as_slice());
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Fails with [`BackupError::Decryption`] on a wrong key, any modified
    /// byte, or truncated input. Never returns partial plaintext.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(BackupError::Decryption);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(GenericArray::from_slice(nonce), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| BackupError::Decryption)
    }
}

impl fmt::Debug for ArtifactCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ArtifactCipher")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher_with(byte: u8) -> ArtifactCipher {
        ArtifactCipher::new(&EncryptionKey::from_bytes([byte; KEY_LEN]))
    }

    #[test]
    fn round_trip_preserves_bytes() -> anyhow::Result<()> {
        let cipher = cipher_with(7);
        for input in [&b""[..], b"x", b"PGDMP custom archive body", &[0u8; 4096][..]] {
            let sealed = cipher.encrypt(input)?;
            assert_eq!(sealed.len(), input.len() + NONCE_LEN + TAG_LEN);
            assert_eq!(cipher.decrypt(&sealed)?.as_slice(), input);
        }
        Ok(())
    }

    #[test]
    fn ciphertext_hides_dump_magic() -> anyhow::Result<()> {
        let sealed = cipher_with(1).encrypt(b"PGDMP\x01\x0e\x00")?;
        assert!(!sealed.windows(5).any(|w| w == b"PGDMP"));
        Ok(())
    }

    #[test]
    fn every_flipped_byte_is_detected() -> anyhow::Result<()> {
        let cipher = cipher_with(9);
        let sealed = cipher.encrypt(b"colonia norte: 14 gatos")?;
        for i in 0..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[i] ^= 0x01;
            assert!(matches!(cipher.decrypt(&tampered), Err(BackupError::Decryption)));
        }
        Ok(())
    }

    #[test]
    fn truncated_input_is_rejected() -> anyhow::Result<()> {
        let cipher = cipher_with(3);
        let sealed = cipher.encrypt(b"")?;
        assert!(matches!(cipher.decrypt(&sealed[..sealed.len() - 1]), Err(BackupError::Decryption)));
        assert!(matches!(cipher.decrypt(&[]), Err(BackupError::Decryption)));
        Ok(())
    }

    #[test]
    fn other_key_cannot_decrypt() -> anyhow::Result<()> {
        let sealed = cipher_with(1).encrypt(b"secret")?;
        assert!(matches!(cipher_with(2).decrypt(&sealed), Err(BackupError::Decryption)));
        Ok(())
    }

    #[test]
    fn key_parsing_accepts_fernet_style_keys() -> anyhow::Result<()> {
        // URL-safe alphabet with padding, as generated for Fernet.
        let key = EncryptionKey::from_base64("-_-_-_-_-_-_-_-_-_-_-_-_-_-_-_-_-_-_-_-_-_8=")?;
        assert_eq!(format!("{:?}", key), "EncryptionKey(<redacted>)");
        assert!(EncryptionKey::from_base64("AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=").is_ok());
        Ok(())
    }

    #[test]
    fn key_parsing_rejects_wrong_length() {
        assert!(matches!(EncryptionKey::from_base64("c2hvcnQ="), Err(BackupError::Config(_))));
        assert!(matches!(EncryptionKey::from_base64("not base64 at all!"), Err(BackupError::Config(_))));
    }
}
