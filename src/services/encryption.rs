// src/services/encryption.rs
//! AES-256-GCM sealing of provider tokens at rest

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("Invalid encryption key format")]
    InvalidKeyFormat,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid encrypted data format")]
    InvalidDataFormat,
}

pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionService")
            .field("cipher", &"<redacted>")
            .finish()
    }
}

impl EncryptionService {
    /// Initialize from a base64-encoded 32-byte key (`TOKEN_ENCRYPTION_KEY`)
    pub fn from_key(key_str: &str) -> Result<Self, EncryptionError> {
        let key_bytes = BASE64
            .decode(key_str.trim().as_bytes())
            .map_err(|_| EncryptionError::InvalidKeyFormat)?;

        if key_bytes.len() != 32 {
            return Err(EncryptionError::InvalidKeyFormat);
        }

        let cipher =
            Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| EncryptionError::InvalidKeyFormat)?;

        Ok(Self { cipher })
    }

    /// Generate a new random key (base64-encoded)
    #[allow(dead_code)]
    pub fn generate_key() -> String {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        BASE64.encode(key)
    }

    /// Encrypt and return base64(nonce || ciphertext)
    pub fn encrypt(&self, plaintext: &str) -> Result<String, EncryptionError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(combined))
    }

    /// Decrypt a value produced by [`EncryptionService::encrypt`]
    pub fn decrypt(&self, encrypted: &str) -> Result<String, EncryptionError> {
        let combined = BASE64
            .decode(encrypted.as_bytes())
            .map_err(|_| EncryptionError::InvalidDataFormat)?;

        if combined.len() < NONCE_LEN {
            return Err(EncryptionError::InvalidDataFormat);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext_bytes = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| EncryptionError::DecryptionFailed(e.to_string()))?;

        String::from_utf8(plaintext_bytes)
            .map_err(|_| EncryptionError::DecryptionFailed("invalid UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_is_usable() {
        let key = EncryptionService::generate_key();
        assert!(EncryptionService::from_key(&key).is_ok());
    }

    #[test]
    fn test_token_survives_sealing() {
        let service = EncryptionService::from_key(&EncryptionService::generate_key()).unwrap();

        let sealed = service.encrypt("AT1-access-token").unwrap();
        assert_ne!(sealed, "AT1-access-token");
        assert_eq!(service.decrypt(&sealed).unwrap(), "AT1-access-token");
    }

    #[test]
    fn test_random_nonce_per_encryption() {
        let service = EncryptionService::from_key(&EncryptionService::generate_key()).unwrap();

        let first = service.encrypt("RT1").unwrap();
        let second = service.encrypt("RT1").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_wrong_key_cannot_decrypt() {
        let a = EncryptionService::from_key(&EncryptionService::generate_key()).unwrap();
        let b = EncryptionService::from_key(&EncryptionService::generate_key()).unwrap();

        let sealed = a.encrypt("secret").unwrap();
        assert!(matches!(
            b.decrypt(&sealed),
            Err(EncryptionError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(EncryptionService::from_key("invalid_key").is_err());
        // valid base64 but 16 bytes
        assert!(EncryptionService::from_key("AAAAAAAAAAAAAAAAAAAAAA==").is_err());

        let service = EncryptionService::from_key(&EncryptionService::generate_key()).unwrap();
        assert!(service.decrypt("invalid_encrypted_data").is_err());
        assert!(service.decrypt("AAAA").is_err());
    }
}
