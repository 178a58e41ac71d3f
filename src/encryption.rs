use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("Invalid key length")]
    InvalidKeyLength,
    #[error("Invalid hex key: {0}")]
    InvalidHexKey(#[from] hex::FromHexError),
}

/// AES-256-GCM sealing for the credential file.
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    /// Creates the service from a 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self, EncryptionError> {
        Ok(Self {
            cipher: Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::InvalidKeyLength)?,
        })
    }

    /// Creates the service from a 64-character hex key, as found in config.
    pub fn from_hex(key: &str) -> Result<Self, EncryptionError> {
        let key = hex::decode(key.trim())?;
        Self::new(&key)
    }

    /// Encrypts `plaintext` and prepends the random 96-bit nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if sealed.len() < NONCE_LEN {
            return Err(EncryptionError::DecryptionFailed(
                "Invalid encrypted data: too short to contain a nonce".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| EncryptionError::DecryptionFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn sealed_data_opens_with_the_same_key_only() {
        let service = EncryptionService::from_hex(KEY).expect("valid key");
        let sealed = service.encrypt(b"001234.abcdef.5678").expect("encrypt");
        assert_eq!(service.decrypt(&sealed).expect("decrypt"), b"001234.abcdef.5678");

        let other = EncryptionService::new(&[7u8; 32]).expect("valid key");
        assert!(matches!(
            other.decrypt(&sealed),
            Err(EncryptionError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn rejects_bad_keys_and_truncated_data() {
        assert!(matches!(
            EncryptionService::new(&[0u8; 16]),
            Err(EncryptionError::InvalidKeyLength)
        ));
        assert!(matches!(
            EncryptionService::from_hex("not hex"),
            Err(EncryptionError::InvalidHexKey(_))
        ));

        let service = EncryptionService::from_hex(KEY).expect("valid key");
        assert!(service.decrypt(&[1, 2, 3]).is_err());
    }
}
