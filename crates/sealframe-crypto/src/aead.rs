//! Frame payload encryption using AES-GCM
//!
//! The AES variant is selected by key length: 16 bytes for AES-128-GCM,
//! 32 bytes for AES-256-GCM. Any other length is rejected. The cleartext
//! frame header travels as AAD: authenticated by the tag, never encrypted.

use aes_gcm::{
    Aes128Gcm, Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::error::CryptoError;

/// AES-GCM IV size in bytes
pub const IV_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Encrypt a frame body under `key` with the header as AAD.
///
/// Returns ciphertext with the 16-byte authentication tag appended.
///
/// # Errors
///
/// - `InvalidKeySize`: key is neither 16 nor 32 bytes
/// - `EncryptionFailed`: the underlying AEAD seal failed
pub fn encrypt(
    key: &[u8],
    iv: &[u8; IV_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let nonce = Nonce::from_slice(iv);
    let payload = Payload { msg: plaintext, aad };

    match key.len() {
        16 => Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key))
            .encrypt(nonce, payload)
            .map_err(|_| CryptoError::EncryptionFailed),
        32 => Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
            .encrypt(nonce, payload)
            .map_err(|_| CryptoError::EncryptionFailed),
        len => Err(CryptoError::InvalidKeySize { len }),
    }
}

/// Decrypt `ciphertext_with_tag` under `key` with the header as AAD.
///
/// Expects the 16-byte authentication tag appended to the ciphertext, as
/// produced by [`encrypt`].
///
/// # Errors
///
/// - `InvalidKeySize`: key is neither 16 nor 32 bytes
/// - `DataTooSmall`: input is shorter than the authentication tag
/// - `DecryptionFailed`: authentication tag mismatch (wrong key, tampered
///   ciphertext, or tampered AAD)
pub fn decrypt(
    key: &[u8],
    iv: &[u8; IV_SIZE],
    aad: &[u8],
    ciphertext_with_tag: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext_with_tag.len() < TAG_SIZE {
        return Err(CryptoError::DataTooSmall { len: ciphertext_with_tag.len() });
    }

    let nonce = Nonce::from_slice(iv);
    let payload = Payload { msg: ciphertext_with_tag, aad };

    match key.len() {
        16 => Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key))
            .decrypt(nonce, payload)
            .map_err(|_| CryptoError::DecryptionFailed),
        32 => Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
            .decrypt(nonce, payload)
            .map_err(|_| CryptoError::DecryptionFailed),
        len => Err(CryptoError::InvalidKeySize { len }),
    }
}
