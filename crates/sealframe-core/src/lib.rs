//! Sealframe Core
//!
//! Per-frame end-to-end media encryption for real-time audio/video
//! streaming. The core sits on the media transport path: outbound frames
//! are encrypted and grow an authenticated trailer, inbound frames are
//! validated and decrypted. Transport-level security stays underneath;
//! intermediaries forwarding media cannot read the content.
//!
//! # Components
//!
//! - [`transformer::FrameTransformer`]: the orchestrator; one per
//!   participant and media type, with its own FIFO crypto worker
//! - [`keys`]: per-participant key rings, PBKDF2 derivation, ratcheting
//! - [`codec`]: codec-aware partitioning into clear header and encrypted
//!   payload
//! - [`h264`]: NAL unit scanning and RBSP byte-stuffing primitives
//!
//! # Encrypt path
//!
//! ```text
//! frame ─▶ transformer ─▶ worker queue ─▶ split header/payload
//!       ─▶ derive IV ─▶ AES-GCM (header as AAD)
//!       ─▶ header ‖ ciphertext‖tag ‖ IV ‖ trailer ─▶ sink
//! ```
//!
//! Decrypt is the inverse, with a salted ratcheting retry loop around the
//! AEAD when the key has rotated, and recovery to the initial key when
//! ratcheting fails.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
pub mod frame;
pub mod h264;
pub mod keys;
pub mod notifier;
pub mod sink;
pub mod state;
pub mod transformer;

pub use frame::{FrameDirection, MediaFrame, MediaType, VideoCodec, VideoFrameInfo};
pub use keys::{
    DefaultKeyProvider, KeyProvider, KeyProviderOptions, KeyRingError, ParticipantKeyHandler,
};
pub use notifier::SignalingNotifier;
pub use sink::{FrameSink, StateObserver};
pub use state::FrameCryptionState;
pub use transformer::{Algorithm, FrameTransformer};
