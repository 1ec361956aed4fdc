use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher};
use rand::RngCore;

use crate::error::{Error, Result};

const NONCE_SIZE: usize = 12; // 96 bits for GCM
/// Fixed application-level salt for deriving the settings master key from
/// the boot-time process secret. Not a substitute for a unique per-value
/// salt on untrusted passwords — there is exactly one secret, set once at
/// deploy time, so a fixed salt here only has to avoid rainbow-tabling a
/// process secret that should already be high-entropy.
const MASTER_KEY_SALT: &[u8] = b"proximity-settings-master-v1";

/// The 256-bit symmetric key used to encrypt `ENCRYPTED_KEYS` Settings and
/// `Host` credentials.
#[derive(Clone)]
pub struct MasterKey {
    key: [u8; 32],
}

impl MasterKey {
    /// Derive the master key from the process-level secret provided at
    /// boot (`PROXIMITY_MASTER_SECRET`). Missing this secret must fail
    /// startup in production; callers enforce that, not this function.
    pub fn from_secret(secret: &str) -> Result<Self> {
        let argon2 = Argon2::default();
        let salt = SaltString::encode_b64(MASTER_KEY_SALT)
            .map_err(|e| Error::Encryption(format!("invalid salt: {e}")))?;

        let hash = argon2
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| Error::Encryption(format!("key derivation failed: {e}")))?;

        let hash_bytes = hash
            .hash
            .ok_or_else(|| Error::Encryption("no hash material produced".to_string()))?;

        let mut key = [0u8; 32];
        key.copy_from_slice(&hash_bytes.as_bytes()[..32]);
        Ok(Self { key })
    }

    /// Generate a random key, used in tests and for ephemeral/dev setups.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| Error::Encryption(format!("cipher init failed: {e}")))
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| Error::Encryption(format!("encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a `nonce || ciphertext` blob produced by `encrypt`.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_SIZE {
            return Err(Error::Encryption("ciphertext too short".to_string()));
        }
        let cipher = self.cipher()?;
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| Error::Encryption(format!("decryption failed: {e}")))
    }

    /// Convenience for encrypting a UTF-8 string Setting/credential value.
    pub fn encrypt_str(&self, plaintext: &str) -> Result<Vec<u8>> {
        self.encrypt(plaintext.as_bytes())
    }

    /// Convenience for decrypting into a UTF-8 string.
    pub fn decrypt_str(&self, data: &[u8]) -> Result<String> {
        let bytes = self.decrypt(data)?;
        String::from_utf8(bytes).map_err(|e| Error::Encryption(format!("invalid utf-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_generation_is_unique() {
        let k1 = MasterKey::generate();
        let k2 = MasterKey::generate();
        assert_ne!(k1.key, k2.key);
    }

    #[test]
    fn same_secret_derives_same_key() {
        let k1 = MasterKey::from_secret("correct horse battery staple").unwrap();
        let k2 = MasterKey::from_secret("correct horse battery staple").unwrap();
        assert_eq!(k1.key, k2.key);
    }

    #[test]
    fn different_secret_derives_different_key() {
        let k1 = MasterKey::from_secret("secret-a").unwrap();
        let k2 = MasterKey::from_secret("secret-b").unwrap();
        assert_ne!(k1.key, k2.key);
    }

    #[test]
    fn round_trip() {
        let key = MasterKey::generate();
        let plaintext = b"pam_user_token_super_secret";
        let encrypted = key.encrypt(plaintext).unwrap();
        assert_ne!(plaintext.to_vec(), encrypted);
        assert_eq!(key.decrypt(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn nonce_differs_per_call() {
        let key = MasterKey::generate();
        let a = key.encrypt(b"same input").unwrap();
        let b = key.encrypt(b"same input").unwrap();
        assert_ne!(a, b);
        assert_eq!(key.decrypt(&a).unwrap(), key.decrypt(&b).unwrap());
    }

    #[test]
    fn rejects_corrupted_ciphertext() {
        let key = MasterKey::generate();
        let mut encrypted = key.encrypt(b"hello world").unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0xFF;
        assert!(key.decrypt(&encrypted).is_err());
    }

    #[test]
    fn str_round_trip() {
        let key = MasterKey::generate();
        let encrypted = key.encrypt_str("hunter2").unwrap();
        assert_eq!(key.decrypt_str(&encrypted).unwrap(), "hunter2");
    }
}
