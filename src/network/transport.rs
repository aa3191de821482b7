use std::sync::Arc;

use crate::core::Config;
use crate::utils::{Cipher, PasswordCipher, Result};

/// Receive buffer size; leaves room for the nonce and tag of sealed
/// datagrams.
pub const RECV_BUFFER: usize = 2048;

/// Seals and opens datagrams, optionally through a [`Cipher`].
#[derive(Clone, Default)]
pub struct DatagramCodec {
    cipher: Option<Arc<dyn Cipher>>,
}

impl DatagramCodec {
    pub fn plain() -> Self {
        Self { cipher: None }
    }

    pub fn with_cipher(cipher: Arc<dyn Cipher>) -> Self {
        Self {
            cipher: Some(cipher),
        }
    }

    /// Encrypted iff a network password is configured.
    pub fn from_config(config: &Config) -> Self {
        match &config.network_password {
            Some(password) => Self::with_cipher(Arc::new(PasswordCipher::new(password))),
            None => Self::plain(),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn seal(&self, payload: &[u8]) -> Result<Vec<u8>> {
        match &self.cipher {
            Some(cipher) => cipher.encrypt(payload),
            None => Ok(payload.to_vec()),
        }
    }

    pub fn open(&self, datagram: &[u8]) -> Result<Vec<u8>> {
        match &self.cipher {
            Some(cipher) => cipher.decrypt(datagram),
            None => Ok(datagram.to_vec()),
        }
    }
}
