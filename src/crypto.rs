//! At-rest encryption for credentials using AES-256-GCM.
//!
//! App client secrets, authorization tokens and pending state payloads are
//! sealed with a per-record additional authenticated data (AAD) string so a
//! ciphertext copied onto another row fails to open.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

/// Type alias for crypto keys
pub type CryptoKey = ZeroizingKey;

impl CryptoKey {
    /// Create a new crypto key from bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::EncryptionFailed(
                "Invalid key length: expected 32 bytes".to_string(),
            ));
        }
        Ok(ZeroizingKey(bytes))
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Encrypt bytes using AES-256-GCM.
///
/// Output layout is `version || nonce || ciphertext+tag`.
pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut sealed = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    sealed.push(VERSION_ENCRYPTED);
    sealed.extend_from_slice(&nonce);
    sealed.append(&mut ciphertext);

    Ok(sealed)
}

/// Decrypt bytes produced by [`encrypt_bytes`]
pub fn decrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() {
        return Err(CryptoError::EmptyCiphertext);
    }
    if !is_encrypted_payload(ciphertext) {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&ciphertext[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let tag_and_ct = &ciphertext[VERSION_FIELD_LEN + NONCE_LEN..];
    debug_assert!(tag_and_ct.len() >= TAG_LEN);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: tag_and_ct,
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Determine if a payload is using the encrypted format
pub fn is_encrypted_payload(ciphertext: &[u8]) -> bool {
    ciphertext.len() >= MIN_ENCRYPTED_LEN && ciphertext[0] == VERSION_ENCRYPTED
}

/// Seal a UTF-8 string.
pub fn seal_str(key: &CryptoKey, aad: &str, plaintext: &str) -> Result<Vec<u8>, CryptoError> {
    encrypt_bytes(key, aad.as_bytes(), plaintext.as_bytes())
}

/// Open a sealed UTF-8 string.
pub fn open_str(key: &CryptoKey, aad: &str, ciphertext: &[u8]) -> Result<String, CryptoError> {
    let bytes = decrypt_bytes(key, aad.as_bytes(), ciphertext)?;
    String::from_utf8(bytes)
        .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid UTF-8: {}", e)))
}

/// Seal an optional string, keeping `None` as `None`.
pub fn seal_optional(
    key: &CryptoKey,
    aad: &str,
    plaintext: Option<&str>,
) -> Result<Option<Vec<u8>>, CryptoError> {
    plaintext.map(|value| seal_str(key, aad, value)).transpose()
}

/// Open an optional sealed string, keeping `None` as `None`.
pub fn open_optional(
    key: &CryptoKey,
    aad: &str,
    ciphertext: Option<&[u8]>,
) -> Result<Option<String>, CryptoError> {
    ciphertext.map(|value| open_str(key, aad, value)).transpose()
}

/// AAD binding an app client secret to its app row.
pub fn app_secret_aad(app_id: &uuid::Uuid) -> String {
    format!("app|{}", app_id)
}

/// AAD binding token material to its authorization record.
pub fn authorization_aad(authorization_id: &str) -> String {
    format!("authorization|{}", authorization_id)
}

/// AAD binding a pending authorization payload to its state token.
pub fn oauth_state_aad(state: &str) -> String {
    format!("oauth_state|{}", state)
}
