//! Key derivation: PBKDF2 key stretching and material ratcheting

use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// PBKDF2-HMAC-SHA256 iteration count for key stretching
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Size of ratcheted key material in bytes
pub const RATCHET_MATERIAL_SIZE: usize = 32;

/// Label used for material ratcheting
const RATCHET_LABEL: &[u8] = b"sealframeRatchetV1";

/// A derived key slot: raw material plus the stretched encryption key.
///
/// Immutable once constructed; a ratchet replaces the whole set. The raw
/// material is retained because ratcheting derives the next material from
/// it, not from the stretched key.
pub struct KeySet {
    material: Vec<u8>,
    encryption_key: Vec<u8>,
    salt: Vec<u8>,
}

impl KeySet {
    /// Raw key material this set was derived from.
    pub fn material(&self) -> &[u8] {
        &self.material
    }

    /// Stretched AES-GCM encryption key (16 or 32 bytes).
    pub fn encryption_key(&self) -> &[u8] {
        &self.encryption_key
    }

    /// Salt used for the PBKDF2 derivation.
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }
}

impl Drop for KeySet {
    fn drop(&mut self) {
        self.material.zeroize();
        self.encryption_key.zeroize();
    }
}

impl std::fmt::Debug for KeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySet")
            .field("material", &"[redacted]")
            .field("encryption_key", &"[redacted]")
            .field("salt", &self.salt)
            .finish()
    }
}

/// Derive a [`KeySet`] from raw key material.
///
/// Runs PBKDF2-HMAC-SHA256 with [`PBKDF2_ITERATIONS`] iterations, producing
/// `bits / 8` bytes of encryption key. The material and salt are retained in
/// the returned set.
///
/// # Errors
///
/// Returns `UnsupportedKeyBits` unless `bits` is 128 or 256 (the AES-GCM
/// variants).
pub fn derive_key_set(material: &[u8], salt: &[u8], bits: u32) -> Result<KeySet, CryptoError> {
    if bits != 128 && bits != 256 {
        return Err(CryptoError::UnsupportedKeyBits { bits });
    }

    let mut encryption_key = vec![0u8; bits as usize / 8];
    pbkdf2_hmac::<Sha256>(material, salt, PBKDF2_ITERATIONS, &mut encryption_key);

    Ok(KeySet { material: material.to_vec(), encryption_key, salt: salt.to_vec() })
}

/// Ratchet key material forward one step.
///
/// Pure function of (material, salt): HKDF-SHA256 with the ratchet salt and
/// a fixed label, producing [`RATCHET_MATERIAL_SIZE`] bytes of new material.
/// One-way: the previous material cannot be recovered from the output.
pub fn ratchet_material(material: &[u8], salt: &[u8]) -> Vec<u8> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), material);

    let mut next = vec![0u8; RATCHET_MATERIAL_SIZE];
    let Ok(()) = hkdf.expand(RATCHET_LABEL, &mut next) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    next
}
