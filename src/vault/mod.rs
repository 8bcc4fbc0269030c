//! Encryption vault for credential secrets at rest.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       EncryptionVault                    │
//! │  - encrypt / decrypt / rotate_key        │
//! │  - key loaded once at startup            │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       AES-256-GCM                        │
//! │  - random nonce per value                │
//! │  - authenticated (tamper-evident)        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Encryption is non-deterministic: sealing the same token twice yields two
//! different ciphertexts, so ciphertext is never usable as a lookup key.

use aes_gcm::Aes256Gcm;
use thiserror::Error;

mod cipher;

/// Errors raised by the vault.
///
/// These never escape the credential repository; a value that fails to
/// decrypt is treated as "no credential".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key is not base64 or not 32 bytes
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),
    /// Refused to encrypt an empty secret
    #[error("cannot encrypt an empty value")]
    EmptyPlaintext,
    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,
    /// Ciphertext is not a sealed vault value
    #[error("malformed ciphertext: {0}")]
    Malformed(String),
    /// Wrong key or tampered ciphertext
    #[error("decryption failed (wrong key or corrupted data)")]
    AuthenticationFailed,
}

/// Symmetric cipher wrapper holding the master key.
#[derive(Clone)]
pub struct EncryptionVault {
    cipher: Aes256Gcm,
}

impl EncryptionVault {
    /// Builds a vault from a base64-encoded 32-byte key.
    ///
    /// Called once at process startup. A missing or invalid key must abort
    /// startup; it is never reported per call.
    pub fn new(key_base64: &str) -> Result<Self, CryptoError> {
        let cipher = cipher::cipher_from_base64(key_base64)?;
        Ok(Self { cipher })
    }

    /// Generates a fresh base64 master key suitable for [`EncryptionVault::new`].
    pub fn generate_key() -> String {
        cipher::generate_key_base64()
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        cipher::seal(&self.cipher, plaintext)
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        cipher::open(&self.cipher, ciphertext)
    }

    /// Re-encrypts a value sealed by this vault under `new_key_base64`.
    ///
    /// The plaintext only exists inside this call.
    pub fn rotate_key(&self, ciphertext: &str, new_key_base64: &str) -> Result<String, CryptoError> {
        let next = cipher::cipher_from_base64(new_key_base64)?;
        let plaintext = self.decrypt(ciphertext)?;
        cipher::seal(&next, &plaintext)
    }
}

impl std::fmt::Debug for EncryptionVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionVault")
            .field("cipher", &"AES-256-GCM")
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

    fn vault_with(byte: u8) -> EncryptionVault {
        EncryptionVault::new(&BASE64.encode([byte; 32])).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let vault = vault_with(0);
        for token in ["my-secret-access-token-12345", "x", "ünïcödé-refresh"] {
            let ciphertext = vault.encrypt(token).unwrap();

            // Ciphertext should be different from plaintext
            assert_ne!(ciphertext, token);
            assert_eq!(vault.decrypt(&ciphertext).unwrap(), token);
        }
    }

    #[test]
    fn test_encryption_is_non_deterministic() {
        let vault = vault_with(0);

        let first = vault.encrypt("same-plaintext").unwrap();
        let second = vault.encrypt("same-plaintext").unwrap();
        assert_ne!(first, second);

        // Both should decrypt correctly
        assert_eq!(vault.decrypt(&first).unwrap(), "same-plaintext");
        assert_eq!(vault.decrypt(&second).unwrap(), "same-plaintext");
    }

    #[test]
    fn test_wrong_key_fails() {
        let ciphertext = vault_with(0).encrypt("secret").unwrap();
        assert_eq!(
            vault_with(1).decrypt(&ciphertext),
            Err(CryptoError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let vault = vault_with(0);
        let mut ciphertext = vault.encrypt("secret").unwrap();

        // Tamper with ciphertext
        ciphertext.push('X');

        assert!(vault.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn test_garbage_is_malformed_not_panic() {
        let vault = vault_with(0);
        assert!(matches!(
            vault.decrypt("definitely not ciphertext"),
            Err(CryptoError::Malformed(_))
        ));
        assert!(matches!(vault.decrypt(""), Err(CryptoError::Malformed(_))));
    }

    #[test]
    fn test_empty_plaintext_rejected() {
        assert_eq!(vault_with(0).encrypt(""), Err(CryptoError::EmptyPlaintext));
    }

    #[test]
    fn test_rotate_key() {
        let old = vault_with(0);
        let new_key = EncryptionVault::generate_key();
        let new = EncryptionVault::new(&new_key).unwrap();

        let ciphertext = old.encrypt("refresh-token").unwrap();
        let rotated = old.rotate_key(&ciphertext, &new_key).unwrap();

        assert_ne!(rotated, ciphertext);
        assert_eq!(new.decrypt(&rotated).unwrap(), "refresh-token");
        assert!(old.decrypt(&rotated).is_err());
    }

    #[test]
    fn test_rotate_key_rejects_bad_inputs() {
        let vault = vault_with(0);
        let ciphertext = vault.encrypt("token").unwrap();
        assert!(matches!(
            vault.rotate_key(&ciphertext, "short"),
            Err(CryptoError::InvalidKey(_))
        ));

        let foreign = vault_with(2).encrypt("token").unwrap();
        assert_eq!(
            vault.rotate_key(&foreign, &EncryptionVault::generate_key()),
            Err(CryptoError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_debug_hides_key() {
        let rendered = format!("{:?}", vault_with(7));
        assert!(rendered.contains("EncryptionVault"));
        assert!(!rendered.contains(&BASE64.encode([7u8; 32])));
    }
}
