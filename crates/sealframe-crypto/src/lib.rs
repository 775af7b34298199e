//! Sealframe Cryptographic Primitives
//!
//! Cryptographic building blocks for sealframe. Pure functions with
//! deterministic outputs; no I/O, no shared state. The frame transformer in
//! `sealframe-core` composes these into the encrypt/decrypt paths.
//!
//! # Key Lifecycle
//!
//! Raw key material arrives out-of-band and is stretched into an AES-GCM
//! encryption key. When decryption starts failing, the receiver ratchets the
//! material forward a bounded number of times looking for the sender's
//! current key.
//!
//! ```text
//! Raw Key Material
//!        │
//!        ▼
//! PBKDF2-HMAC-SHA256 (100k iterations) → Encryption Key
//!        │
//!        ▼
//! AES-GCM → Ciphertext ‖ Tag
//!
//! Raw Key Material ── HKDF-SHA256(ratchet salt) ──▶ Next Material
//! ```
//!
//! # Security
//!
//! - Ratcheting is one-way: compromise of material at step *t* does not
//!   reveal material at step *t+1*
//! - AES-GCM binds the cleartext frame header as AAD; a modified header
//!   fails authentication
//! - Key material and derived keys are zeroized on drop
//! - IV uniqueness is the caller's responsibility (see the IV construction
//!   notes in `sealframe-core`)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod derive;
pub mod error;

pub use aead::{IV_SIZE, TAG_SIZE, decrypt, encrypt};
pub use derive::{
    KeySet, PBKDF2_ITERATIONS, RATCHET_MATERIAL_SIZE, derive_key_set, ratchet_material,
};
pub use error::CryptoError;
