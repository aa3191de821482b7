use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};

use crate::utils::{Result, ShareError};

const NONCE_LEN: usize = 12;

/// Pluggable transport encryption for discovery and search datagrams.
///
/// `decrypt` must fail with [`ShareError::DecryptionFailed`] when the
/// ciphertext does not authenticate.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// AES-256-GCM keyed with the SHA-256 digest of the shared network password.
///
/// Sealed messages are laid out as `nonce || ciphertext || tag`.
pub struct PasswordCipher {
    cipher: Aes256Gcm,
}

impl PasswordCipher {
    pub fn new(password: &str) -> Self {
        let key: [u8; 32] = Sha256::digest(password.as_bytes()).into();
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }
}

impl Cipher for PasswordCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| ShareError::NetworkError(format!("Failed to encrypt: {}", e)))?;

        let mut message = Vec::with_capacity(NONCE_LEN + sealed.len());
        message.extend_from_slice(&nonce_bytes);
        message.extend_from_slice(&sealed);
        Ok(message)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN {
            return Err(ShareError::DecryptionFailed(format!(
                "message too short ({} bytes)",
                ciphertext.len()
            )));
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| ShareError::DecryptionFailed("invalid authentication tag".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_open() {
        let cipher = PasswordCipher::new("test");
        let sealed = cipher.encrypt(b"foo").unwrap();
        assert_ne!(&sealed[NONCE_LEN..], b"foo");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), b"foo");
    }

    #[test]
    fn test_rejects_forged_messages() {
        let cipher = PasswordCipher::new("test");
        assert!(matches!(
            cipher.decrypt(&[0u8; 48]),
            Err(ShareError::DecryptionFailed(_))
        ));
        assert!(cipher.decrypt(b"short").is_err());

        let other = PasswordCipher::new("other");
        let sealed = other.encrypt(b"HELO").unwrap();
        assert!(cipher.decrypt(&sealed).is_err());
    }
}
