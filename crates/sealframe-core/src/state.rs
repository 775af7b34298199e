//! Cryption state reported to observers

/// Outcome class of the most recent crypto operation on one direction.
///
/// A transformer tracks the last-published state separately for the encrypt
/// and decrypt paths and notifies observers only on transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCryptionState {
    /// Frames are flowing and round-tripping normally
    Ok,
    /// The AEAD seal operation failed
    EncryptionFailed,
    /// Decryption failed after the ratchet window was exhausted
    DecryptionFailed,
    /// No key material available for the requested key index
    MissingKey,
    /// Decryption recovered by ratcheting to new key material
    KeyRatcheted,
    /// A frame arrived with no sink registered to receive it
    InternalError,
}
