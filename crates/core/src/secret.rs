//! Sealing for per-subscription secrets at rest.
//!
//! The stored form is base64-url `nonce || ciphertext`, AES-256-GCM under a
//! key derived by hashing the configured master key. Decryption happens
//! transparently through [`SecretSealer::open`].

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use rand::RngCore as _;
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;

/// Errors opening a sealed secret.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("sealed secret is malformed")]
    Malformed,
    #[error("sealed secret failed to decrypt")]
    Decrypt,
}

/// Seals and opens secrets with a key derived from the configured master key.
#[derive(Clone)]
pub struct SecretSealer {
    cipher: Aes256Gcm,
}

impl SecretSealer {
    /// Derive the sealing key from the master key string.
    pub fn new(master_key: &str) -> Self {
        let digest = Sha256::digest(master_key.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&digest).expect("SHA-256 digest is a valid AES-256 key");
        Self { cipher }
    }

    /// Seal a secret for storage.
    pub fn seal(&self, plaintext: &str) -> String {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .expect("AES-GCM encryption is infallible for in-memory buffers");
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        B64.encode(sealed)
    }

    /// Open a secret previously produced by [`SecretSealer::seal`].
    pub fn open(&self, sealed: &str) -> Result<String, SecretError> {
        let raw = B64.decode(sealed).map_err(|_| SecretError::Malformed)?;
        if raw.len() <= NONCE_LEN {
            return Err(SecretError::Malformed);
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SecretError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| SecretError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_round_trips() {
        let sealer = SecretSealer::new("master");
        let sealed = sealer.seal("hunter2");
        assert_ne!(sealed, "hunter2");
        assert_eq!(sealer.open(&sealed).unwrap(), "hunter2");
    }

    #[test]
    fn sealing_is_randomized() {
        let sealer = SecretSealer::new("master");
        assert_ne!(sealer.seal("same"), sealer.seal("same"));
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = SecretSealer::new("master").seal("hunter2");
        assert!(matches!(
            SecretSealer::new("other").open(&sealed),
            Err(SecretError::Decrypt)
        ));
    }

    #[test]
    fn garbage_is_rejected_as_malformed() {
        let sealer = SecretSealer::new("master");
        assert!(matches!(sealer.open("@@@"), Err(SecretError::Malformed)));
        assert!(matches!(sealer.open("AAAA"), Err(SecretError::Malformed)));
    }
}
