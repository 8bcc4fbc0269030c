//! AES-256-GCM primitives behind the vault.
//!
//! The nonce is prepended to the ciphertext so each secret is stored as a
//! single base64 string: `base64(nonce || ciphertext || tag)`.

use super::CryptoError;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the encryption key in bytes (256 bits)
pub(crate) const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
pub(crate) const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes
const TAG_SIZE: usize = 16;

/// Decodes a base64 master key and builds the cipher for it.
///
/// # Returns
/// * `Ok(Aes256Gcm)` - Cipher keyed with the decoded 32 bytes
/// * `Err(CryptoError::InvalidKey)` - Bad base64 or wrong key length
pub(crate) fn cipher_from_base64(key_base64: &str) -> Result<Aes256Gcm, CryptoError> {
    let key_bytes = BASE64
        .decode(key_base64.trim())
        .map_err(|e| CryptoError::InvalidKey(format!("not valid base64: {}", e)))?;

    if key_bytes.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKey(format!(
            "key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        )));
    }

    Aes256Gcm::new_from_slice(&key_bytes)
        .map_err(|e| CryptoError::InvalidKey(format!("failed to create cipher: {}", e)))
}

/// Encrypts plaintext with a fresh random nonce.
///
/// # Security
/// - Uses a cryptographically secure random nonce (never reuse)
/// - Authenticated encryption (tampering detected)
pub(crate) fn seal(cipher: &Aes256Gcm, plaintext: &str) -> Result<String, CryptoError> {
    if plaintext.is_empty() {
        return Err(CryptoError::EmptyPlaintext);
    }

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(sealed))
}

/// Decrypts a value produced by [`seal`].
///
/// Fails with `Malformed` when the input cannot be a sealed value at all and
/// with `AuthenticationFailed` when the key is wrong or the data was altered.
pub(crate) fn open(cipher: &Aes256Gcm, sealed: &str) -> Result<String, CryptoError> {
    let bytes = BASE64
        .decode(sealed)
        .map_err(|e| CryptoError::Malformed(format!("not valid base64: {}", e)))?;

    if bytes.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Malformed(format!(
            "ciphertext too short: {} bytes",
            bytes.len()
        )));
    }

    let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    String::from_utf8(plaintext)
        .map_err(|_| CryptoError::Malformed("decrypted data is not valid UTF-8".to_string()))
}

/// Generates a new random master key, base64-encoded.
pub(crate) fn generate_key_base64() -> String {
    let key = Aes256Gcm::generate_key(&mut OsRng);
    BASE64.encode(key)
}
