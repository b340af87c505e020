//! At-rest encryption for small secrets (the TOTP seed).

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::{general_purpose::STANDARD, Engine};
use rand::Rng;
use secrecy::{ExposeSecret, Secret};
use sha2::{Digest, Sha256};

/// AES-256-GCM cipher for secrets stored on user documents.
///
/// The 256-bit key is derived as SHA-256 of `ENCRYPTION_KEY`, which lets the
/// operator provision a passphrase of any length ≥ 32 chars. Ciphertext is
/// stored as base64 of `nonce(12) || ciphertext+tag`; the nonce is random
/// per encryption.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub fn new(encryption_key: &Secret<String>) -> Self {
        let key_bytes = Sha256::digest(encryption_key.expose_secret().as_bytes());
        let key = aes_gcm::Key::<Aes256Gcm>::from_slice(&key_bytes);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, anyhow::Error> {
        let nonce_bytes: [u8; 12] = rand::thread_rng().gen();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?;

        let mut combined = Vec::with_capacity(12 + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(combined))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, anyhow::Error> {
        let combined = STANDARD
            .decode(encoded)
            .map_err(|e| anyhow::anyhow!("Invalid ciphertext encoding: {}", e))?;

        // 12-byte nonce + 16-byte tag minimum
        if combined.len() < 28 {
            return Err(anyhow::anyhow!("Ciphertext too short"));
        }

        let nonce = Nonce::from_slice(&combined[..12]);
        let plaintext = self
            .cipher
            .decrypt(nonce, &combined[12..])
            .map_err(|e| anyhow::anyhow!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| anyhow::anyhow!("Invalid plaintext: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SecretCipher {
        SecretCipher::new(&Secret::new(
            "test-encryption-key-0123456789abcdef".to_string(),
        ))
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let c = cipher();
        let secret = "JBSWY3DPEHPK3PXP";
        let encrypted = c.encrypt(secret).unwrap();
        assert_ne!(encrypted, secret);
        assert_eq!(c.decrypt(&encrypted).unwrap(), secret);
    }

    #[test]
    fn nonces_differ_per_encryption() {
        let c = cipher();
        let a = c.encrypt("same input").unwrap();
        let b = c.encrypt("same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let a = cipher();
        let b = SecretCipher::new(&Secret::new(
            "other-encryption-key-0123456789abcdef".to_string(),
        ));
        let encrypted = a.encrypt("secret").unwrap();
        assert!(b.decrypt(&encrypted).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let c = cipher();
        let encrypted = c.encrypt("secret").unwrap();
        let mut bytes = STANDARD.decode(&encrypted).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(c.decrypt(&STANDARD.encode(bytes)).is_err());
    }
}
