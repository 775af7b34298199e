//! Participant key rings and key management
//!
//! Each participant owns a ring of up to `key_ring_size` key slots. A slot
//! holds a [`KeySet`]: raw material plus the PBKDF2-stretched encryption
//! key. The transformer selects slots by the one-byte key index carried in
//! the frame trailer, and ratchets material forward when decryption fails.
//!
//! In shared-key mode a single handler services every participant; the
//! restore-on-failure path of the ratchet retry can then race other readers
//! of the same slot. The slot write itself is atomic (the ring is behind a
//! mutex), readers tolerate the transient material.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use sealframe_crypto::{CryptoError, KeySet, derive_key_set, ratchet_material};
use thiserror::Error;

/// Default number of key slots per participant
pub const DEFAULT_KEY_RING_SIZE: usize = 16;

/// Hard upper bound on the ring size; the key index is one byte on the wire
pub const MAX_KEY_RING_SIZE: usize = 256;

/// Errors from key ring management
#[derive(Debug, Error)]
pub enum KeyRingError {
    /// Key index outside the configured ring
    #[error("key index {index} out of range for ring of {ring_size}")]
    IndexOutOfRange {
        /// The rejected key index
        index: u8,
        /// Number of slots in the ring
        ring_size: usize,
    },

    /// Key derivation failed
    #[error(transparent)]
    Derivation(#[from] CryptoError),
}

/// Process-lifetime key management configuration.
#[derive(Debug, Clone)]
pub struct KeyProviderOptions {
    /// One shared handler for all participants instead of one each
    pub shared_key: bool,
    /// Number of key slots per handler, at most [`MAX_KEY_RING_SIZE`]
    pub key_ring_size: usize,
    /// Salt for both PBKDF2 stretching and material ratcheting
    pub ratchet_salt: Vec<u8>,
    /// Maximum ratchet steps tried when decryption fails; 0 disables retry
    pub ratchet_window_size: usize,
    /// Trailing byte tag marking individual frames as unencrypted; empty
    /// disables the bypass
    pub uncrypted_magic_bytes: Vec<u8>,
    /// Drop frames instead of passing them through while cryption is
    /// disabled or the payload is empty
    pub discard_frame_when_cryptor_not_ready: bool,
    /// Stretched key length in bits, 128 or 256
    pub key_derive_bits: u32,
}

impl Default for KeyProviderOptions {
    fn default() -> Self {
        Self {
            shared_key: false,
            key_ring_size: DEFAULT_KEY_RING_SIZE,
            ratchet_salt: b"sealframe-ratchet-salt".to_vec(),
            ratchet_window_size: 0,
            uncrypted_magic_bytes: Vec::new(),
            discard_frame_when_cryptor_not_ready: false,
            key_derive_bits: 128,
        }
    }
}

impl KeyProviderOptions {
    /// Options for shared-key deployments: one key ring for the whole room.
    pub fn shared(ratchet_salt: impl Into<Vec<u8>>) -> Self {
        Self { shared_key: true, ratchet_salt: ratchet_salt.into(), ..Default::default() }
    }
}

/// Key ring state behind the handler mutex.
struct KeyRing {
    slots: Vec<Option<Arc<KeySet>>>,
    has_valid_key: bool,
    decryption_failure: bool,
}

/// Per-participant key ring with ratchet support.
///
/// Handlers are shared between the provider and any transformers using
/// them; all slot access goes through the internal mutex.
pub struct ParticipantKeyHandler {
    options: KeyProviderOptions,
    ring: Mutex<KeyRing>,
}

impl ParticipantKeyHandler {
    /// Create a handler with all slots empty.
    pub fn new(options: KeyProviderOptions) -> Self {
        let size = options.key_ring_size.clamp(1, MAX_KEY_RING_SIZE);
        let ring = KeyRing {
            slots: vec![None; size],
            has_valid_key: false,
            decryption_failure: false,
        };
        Self { options, ring: Mutex::new(ring) }
    }

    /// Key set at `index`, or `None` if the slot is empty or out of range.
    pub fn get_key_set(&self, index: u8) -> Option<Arc<KeySet>> {
        let ring = self.lock_ring();
        ring.slots.get(index as usize).cloned().flatten()
    }

    /// Install new material at `index` and mark the key ring valid.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfRange` if `index` does not address a ring slot;
    /// propagates derivation errors (unsupported `key_derive_bits`).
    pub fn set_key(&self, material: &[u8], index: u8) -> Result<(), KeyRingError> {
        self.set_key_from_material(material, index)?;
        self.set_has_valid_key();
        Ok(())
    }

    /// Re-derive a key set from `material` and install it at `index`.
    ///
    /// Does not touch the validity flags: the ratchet retry loop uses this
    /// both to install recovered keys and to restore the original material
    /// after an exhausted window.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfRange` if `index` does not address a ring slot;
    /// propagates derivation errors (unsupported `key_derive_bits`).
    pub fn set_key_from_material(&self, material: &[u8], index: u8) -> Result<(), KeyRingError> {
        let key_set =
            derive_key_set(material, &self.options.ratchet_salt, self.options.key_derive_bits)?;
        let mut ring = self.lock_ring();
        let ring_size = ring.slots.len();
        let Some(slot) = ring.slots.get_mut(index as usize) else {
            return Err(KeyRingError::IndexOutOfRange { index, ring_size });
        };
        *slot = Some(Arc::new(key_set));
        Ok(())
    }

    /// Ratchet material forward one step using the configured salt.
    ///
    /// Pure: does not mutate the handler.
    pub fn ratchet_material(&self, material: &[u8]) -> Vec<u8> {
        ratchet_material(material, &self.options.ratchet_salt)
    }

    /// Derive a key set without installing it anywhere.
    ///
    /// # Errors
    ///
    /// Propagates derivation errors (unsupported `bits`).
    pub fn derive_keys(
        &self,
        material: &[u8],
        salt: &[u8],
        bits: u32,
    ) -> Result<KeySet, CryptoError> {
        derive_key_set(material, salt, bits)
    }

    /// Ratchet the material at `index` and install the result there.
    ///
    /// Returns the new material, or `None` if the slot is empty.
    pub fn ratchet_key(&self, index: u8) -> Option<Vec<u8>> {
        let current = self.get_key_set(index)?;
        let new_material = self.ratchet_material(current.material());
        match self.set_key_from_material(&new_material, index) {
            Ok(()) => Some(new_material),
            Err(err) => {
                tracing::warn!(%err, index, "failed to install ratcheted key");
                None
            },
        }
    }

    /// Raw material at `index`, for out-of-band distribution.
    pub fn export_key(&self, index: u8) -> Option<Vec<u8>> {
        self.get_key_set(index).map(|set| set.material().to_vec())
    }

    /// Whether the current key material is believed good.
    pub fn has_valid_key(&self) -> bool {
        self.lock_ring().has_valid_key
    }

    /// Mark the key material good and clear the failure flag.
    pub fn set_has_valid_key(&self) {
        let mut ring = self.lock_ring();
        ring.has_valid_key = true;
        ring.decryption_failure = false;
    }

    /// Record a terminal decryption failure.
    ///
    /// Invalidates the key material so the transformer backs off until new
    /// material arrives. Returns whether the failure should be surfaced to
    /// observers.
    pub fn decryption_failure(&self) -> bool {
        let mut ring = self.lock_ring();
        ring.has_valid_key = false;
        ring.decryption_failure = true;
        true
    }

    fn lock_ring(&self) -> std::sync::MutexGuard<'_, KeyRing> {
        self.ring.lock().expect("key ring lock poisoned")
    }
}

/// Key access capability consumed by the frame transformer.
pub trait KeyProvider: Send + Sync {
    /// Process-lifetime configuration.
    fn options(&self) -> &KeyProviderOptions;

    /// Handler for one participant, or `None` if no key was ever set.
    fn get_key(&self, participant_id: &str) -> Option<Arc<ParticipantKeyHandler>>;

    /// The shared handler servicing all participants.
    fn get_shared_key(&self, participant_id: &str) -> Option<Arc<ParticipantKeyHandler>>;
}

/// In-memory key provider with a management surface for the application.
///
/// Multiple transformers may hold the same provider; handlers are created
/// lazily on the first `set_key` for a participant.
pub struct DefaultKeyProvider {
    options: KeyProviderOptions,
    handlers: Mutex<HashMap<String, Arc<ParticipantKeyHandler>>>,
    shared: Mutex<Option<Arc<ParticipantKeyHandler>>>,
}

impl DefaultKeyProvider {
    /// Create a provider.
    ///
    /// # Panics
    ///
    /// Panics if `key_derive_bits` is not 128 or 256; a provider that can
    /// never derive keys is a configuration bug, not a runtime condition.
    pub fn new(options: KeyProviderOptions) -> Self {
        assert!(
            options.key_derive_bits == 128 || options.key_derive_bits == 256,
            "key_derive_bits must be 128 or 256, got {}",
            options.key_derive_bits
        );
        Self { options, handlers: Mutex::new(HashMap::new()), shared: Mutex::new(None) }
    }

    /// Install material for `participant_id` at `index`, creating the
    /// handler on first use.
    ///
    /// # Errors
    ///
    /// Rejects indices outside the ring; propagates derivation errors.
    pub fn set_key(
        &self,
        participant_id: &str,
        index: u8,
        material: &[u8],
    ) -> Result<(), KeyRingError> {
        self.participant_handler(participant_id).set_key(material, index)
    }

    /// Ratchet the key for `participant_id` at `index`.
    pub fn ratchet_key(&self, participant_id: &str, index: u8) -> Option<Vec<u8>> {
        self.get_key(participant_id)?.ratchet_key(index)
    }

    /// Export the raw material for `participant_id` at `index`.
    pub fn export_key(&self, participant_id: &str, index: u8) -> Option<Vec<u8>> {
        self.get_key(participant_id)?.export_key(index)
    }

    /// Install shared material at `index`.
    ///
    /// # Errors
    ///
    /// Rejects indices outside the ring; propagates derivation errors.
    pub fn set_shared_key(&self, index: u8, material: &[u8]) -> Result<(), KeyRingError> {
        self.shared_handler().set_key(material, index)
    }

    /// Ratchet the shared key at `index`.
    pub fn ratchet_shared_key(&self, index: u8) -> Option<Vec<u8>> {
        self.shared_handler().ratchet_key(index)
    }

    /// Export the shared raw material at `index`.
    pub fn export_shared_key(&self, index: u8) -> Option<Vec<u8>> {
        self.shared_handler().export_key(index)
    }

    fn participant_handler(&self, participant_id: &str) -> Arc<ParticipantKeyHandler> {
        let mut handlers = self.handlers.lock().expect("handler map lock poisoned");
        Arc::clone(
            handlers
                .entry(participant_id.to_string())
                .or_insert_with(|| Arc::new(ParticipantKeyHandler::new(self.options.clone()))),
        )
    }

    fn shared_handler(&self) -> Arc<ParticipantKeyHandler> {
        let mut shared = self.shared.lock().expect("shared handler lock poisoned");
        Arc::clone(
            shared.get_or_insert_with(|| Arc::new(ParticipantKeyHandler::new(self.options.clone()))),
        )
    }
}

impl KeyProvider for DefaultKeyProvider {
    fn options(&self) -> &KeyProviderOptions {
        &self.options
    }

    fn get_key(&self, participant_id: &str) -> Option<Arc<ParticipantKeyHandler>> {
        self.handlers.lock().expect("handler map lock poisoned").get(participant_id).cloned()
    }

    fn get_shared_key(&self, _participant_id: &str) -> Option<Arc<ParticipantKeyHandler>> {
        Some(self.shared_handler())
    }
}
