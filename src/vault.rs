//! Credential vault: AES-GCM sealing of OAuth tokens at rest.
//!
//! Output format: base64( nonce(12) || ciphertext || tag(16) ).
//! A fresh random nonce is drawn for every call, so sealing the same
//! plaintext twice yields different strings.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use tracing::debug;

use crate::error::VaultError;

/// Nonce size for AES-GCM (96 bits).
const NONCE_SIZE: usize = 12;

enum VaultCipher {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
}

/// Symmetric authenticated encryption for stored tokens.
pub struct CredentialVault {
    cipher: VaultCipher,
}

impl CredentialVault {
    /// Build a vault from raw key bytes (16 → AES-128, 32 → AES-256).
    pub fn new(key: &[u8]) -> Result<Self, VaultError> {
        let cipher = match key.len() {
            16 => VaultCipher::Aes128(
                Aes128Gcm::new_from_slice(key).map_err(|e| VaultError::InvalidKey(e.to_string()))?,
            ),
            32 => VaultCipher::Aes256(
                Aes256Gcm::new_from_slice(key).map_err(|e| VaultError::InvalidKey(e.to_string()))?,
            ),
            n => {
                return Err(VaultError::InvalidKey(format!(
                    "key must be 16 or 32 bytes, got {n}"
                )));
            }
        };
        Ok(Self { cipher })
    }

    /// Build a vault from a configured secret.
    ///
    /// A 16- or 32-byte string is used as-is; anything else must be the
    /// base64 encoding of a 16- or 32-byte key.
    pub fn from_secret(secret: &str) -> Result<Self, VaultError> {
        let raw = secret.as_bytes();
        if raw.len() == 16 || raw.len() == 32 {
            return Self::new(raw);
        }
        let decoded = BASE64.decode(secret.trim()).map_err(|e| {
            VaultError::InvalidKey(format!("key is neither 16/32 bytes nor base64: {e}"))
        })?;
        Self::new(&decoded)
    }

    /// Seal a plaintext string.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = match &self.cipher {
            VaultCipher::Aes128(c) => c.encrypt(nonce, plaintext.as_bytes()),
            VaultCipher::Aes256(c) => c.encrypt(nonce, plaintext.as_bytes()),
        }
        .map_err(|e| VaultError::Encryption(format!("AES-GCM encryption failed: {e}")))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + sealed.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&sealed);

        debug!(plaintext_len = plaintext.len(), "Sealed credential");
        Ok(BASE64.encode(&combined))
    }

    /// Open a sealed string. Every malformed, truncated, tampered or
    /// foreign-key input fails with `VaultError::Decryption`.
    pub fn decrypt(&self, sealed: &str) -> Result<String, VaultError> {
        let combined = BASE64
            .decode(sealed.trim())
            .map_err(|e| VaultError::Decryption(format!("invalid base64: {e}")))?;

        if combined.len() < NONCE_SIZE {
            return Err(VaultError::Decryption(format!(
                "sealed data too short: {} bytes",
                combined.len()
            )));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = match &self.cipher {
            VaultCipher::Aes128(c) => c.decrypt(nonce, ciphertext),
            VaultCipher::Aes256(c) => c.decrypt(nonce, ciphertext),
        }
        .map_err(|_| VaultError::Decryption("authentication tag mismatch".into()))?;

        String::from_utf8(plaintext)
            .map_err(|e| VaultError::Decryption(format!("plaintext is not UTF-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> CredentialVault {
        CredentialVault::from_secret("0123456789abcdef0123456789abcdef").unwrap()
    }

    #[test]
    fn round_trip() {
        let v = vault();
        for s in ["", "eyJ0eXAiOiJKV1Qi.refresh", "ação ✓ unicode"] {
            let sealed = v.encrypt(s).unwrap();
            assert_ne!(sealed, s);
            assert_eq!(v.decrypt(&sealed).unwrap(), s);
        }
    }

    #[test]
    fn encryption_is_not_deterministic() {
        let v = vault();
        let a = v.encrypt("same token").unwrap();
        let b = v.encrypt("same token").unwrap();
        assert_ne!(a, b);
        assert_eq!(v.decrypt(&a).unwrap(), v.decrypt(&b).unwrap());
    }

    #[test]
    fn bit_flip_is_detected() {
        let v = vault();
        let sealed = v.encrypt("access-token").unwrap();
        let mut bytes = BASE64.decode(&sealed).unwrap();
        for i in [0, NONCE_SIZE, bytes.len() - 1] {
            bytes[i] ^= 0x01;
            let tampered = BASE64.encode(&bytes);
            assert!(matches!(v.decrypt(&tampered), Err(VaultError::Decryption(_))));
            bytes[i] ^= 0x01;
        }
    }

    #[test]
    fn garbage_input_is_decryption_error() {
        let v = vault();
        assert!(matches!(v.decrypt("not base64 !!"), Err(VaultError::Decryption(_))));
        assert!(matches!(
            v.decrypt(&BASE64.encode("short")),
            Err(VaultError::Decryption(_))
        ));
    }

    #[test]
    fn foreign_key_cannot_open() {
        let sealed = vault().encrypt("secret").unwrap();
        let other = CredentialVault::new(&[7u8; 32]).unwrap();
        assert!(matches!(other.decrypt(&sealed), Err(VaultError::Decryption(_))));
    }

    #[test]
    fn aes128_and_base64_keys() {
        let v128 = CredentialVault::from_secret("0123456789abcdef").unwrap();
        let sealed = v128.encrypt("t").unwrap();
        assert_eq!(v128.decrypt(&sealed).unwrap(), "t");

        let b64 = BASE64.encode([9u8; 32]);
        let v = CredentialVault::from_secret(&b64).unwrap();
        assert_eq!(v.decrypt(&v.encrypt("t").unwrap()).unwrap(), "t");
    }

    #[test]
    fn rejects_bad_key_lengths() {
        assert!(matches!(
            CredentialVault::new(&[0u8; 24]),
            Err(VaultError::InvalidKey(_))
        ));
        assert!(CredentialVault::from_secret("too-short").is_err());
    }
}
