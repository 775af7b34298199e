//! Error types for cryptographic operations

use thiserror::Error;

/// Errors from AEAD and key derivation operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key length does not select a supported AES-GCM variant
    #[error("invalid key size: {len} bytes")]
    InvalidKeySize {
        /// Length of the rejected key in bytes
        len: usize,
    },

    /// Requested derivation length is not a supported key size
    #[error("unsupported key length: {bits} bits")]
    UnsupportedKeyBits {
        /// The rejected bit length
        bits: u32,
    },

    /// Ciphertext is shorter than the authentication tag
    #[error("data too small: {len} bytes")]
    DataTooSmall {
        /// Length of the rejected input in bytes
        len: usize,
    },

    /// AEAD seal operation failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD open operation failed (authentication tag mismatch)
    #[error("decryption failed")]
    DecryptionFailed,
}

impl CryptoError {
    /// Returns true if this error can be caused by a stale key.
    ///
    /// Only authentication failures are worth a ratchet retry; malformed
    /// inputs and unsupported parameters fail identically under every key.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::DecryptionFailed)
    }
}
