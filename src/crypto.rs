use argon2::{password_hash::SaltString, Argon2, PasswordHasher};
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::RngCore;

use crate::error::{CoordinationError, Result};

/// Fixed salt for deterministic key derivation across restarts and
/// instances; the shared secret provides the entropy.
const KDF_SALT: &[u8] = b"COORDINATION_SETTINGS_V1";

/// AEAD nonce length in bytes
const NONCE_LEN: usize = 12;

/// Symmetric cipher for configuration values encrypted at rest.
///
/// The key is derived once from the shared secret with Argon2id and cached
/// for the process lifetime. Values are stored as
/// `hex(nonce) ":" hex(ciphertext)`, exactly two colon-delimited hex
/// segments.
#[derive(Clone)]
pub struct SettingsCipher {
    key: [u8; 32],
}

impl SettingsCipher {
    /// Derive the process-lifetime encryption key from the shared secret
    pub fn new(secret: &str) -> Result<Self> {
        let salt = SaltString::encode_b64(KDF_SALT)
            .map_err(|e| CoordinationError::Config(format!("Failed to create salt: {e}")))?;

        let argon2 = Argon2::default();
        let password_hash = argon2
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| CoordinationError::Config(format!("Key derivation failed: {e}")))?;

        let hash_output = password_hash
            .hash
            .ok_or_else(|| CoordinationError::Config("Key derivation produced no output".into()))?;

        let hash_bytes = hash_output.as_bytes();
        if hash_bytes.len() < 32 {
            return Err(CoordinationError::Config(format!(
                "Key derivation output too short: {} bytes",
                hash_bytes.len()
            )));
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&hash_bytes[..32]);
        Ok(Self { key })
    }

    /// Encrypt a configuration value for storage
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CoordinationError::Decryption(format!("Encryption failed: {e}")))?;

        Ok(format!(
            "{}:{}",
            hex::encode(nonce_bytes),
            hex::encode(ciphertext)
        ))
    }

    /// Decrypt a stored configuration value.
    ///
    /// The stored form must be exactly two colon-delimited hex segments;
    /// anything else is a [`CoordinationError::Decryption`].
    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let segments: Vec<&str> = stored.split(':').collect();
        if segments.len() != 2 {
            return Err(CoordinationError::Decryption(format!(
                "expected 2 colon-delimited segments, found {}",
                segments.len()
            )));
        }

        let nonce_bytes = hex::decode(segments[0])
            .map_err(|e| CoordinationError::Decryption(format!("bad nonce hex: {e}")))?;
        let ciphertext = hex::decode(segments[1])
            .map_err(|e| CoordinationError::Decryption(format!("bad ciphertext hex: {e}")))?;

        if nonce_bytes.len() != NONCE_LEN {
            return Err(CoordinationError::Decryption(format!(
                "nonce must be {NONCE_LEN} bytes, found {}",
                nonce_bytes.len()
            )));
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|e| CoordinationError::Decryption(format!("Decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| CoordinationError::Decryption(format!("not valid UTF-8: {e}")))
    }
}
