//! Frame transformer: the per-participant encrypt/decrypt orchestrator
//!
//! One transformer sits on the media path for one participant and one media
//! type. `transform()` is non-blocking: it hands the frame to a dedicated
//! worker task whose FIFO queue serializes all crypto work, then frames are
//! delivered to the registered sink in arrival order.
//!
//! # Architecture
//!
//! ```text
//! transform(frame)
//!        │  (direction dispatch, non-blocking)
//!        ▼
//! worker task ── split header/payload ── derive IV ── AES-GCM
//!        │                                              │
//!        │            state transitions                 ▼
//!        ├──────────▶ signaling notifier          sink callback
//! ```
//!
//! # Wire layout
//!
//! ```text
//! [ header (clear) ][ ciphertext ][ tag (16) ][ IV (12) ][ iv_size ][ key_index ]
//! ```
//!
//! For H.264 everything after the header is RBSP-escaped as one region so
//! the encrypted bytes cannot emulate a NAL start code.

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::{Arc, Mutex},
};

use bytes::BytesMut;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use sealframe_crypto::{IV_SIZE, aead};
use tokio::sync::mpsc;

use crate::{
    codec,
    frame::{FrameDirection, MediaFrame, MediaType},
    h264,
    keys::{KeyProvider, ParticipantKeyHandler},
    notifier::SignalingNotifier,
    sink::{FrameSink, StateObserver},
    state::FrameCryptionState,
};

/// Trailer size on the wire: one byte IV size, one byte key index
const TRAILER_SIZE: usize = 2;

/// AEAD algorithm selector.
///
/// Extension point; AES-GCM is the only specified variant. Fixed for the
/// lifetime of a transformer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// AES-GCM with 128- or 256-bit keys, 96-bit IV, 128-bit tag
    #[default]
    AesGcm,
}

impl Algorithm {
    /// IV size on the wire for this algorithm.
    pub fn iv_size(self) -> usize {
        match self {
            Self::AesGcm => IV_SIZE,
        }
    }
}

enum CryptoTask {
    Encrypt(MediaFrame),
    Decrypt(MediaFrame),
}

#[derive(Clone, Copy)]
enum CryptoOp {
    Encrypt,
    Decrypt,
}

#[derive(Default)]
struct SinkRegistry {
    audio: Option<Arc<dyn FrameSink>>,
    video: HashMap<u32, Arc<dyn FrameSink>>,
}

impl SinkRegistry {
    fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_empty()
    }

    fn for_frame(&self, media_type: MediaType, ssrc: u32) -> Option<Arc<dyn FrameSink>> {
        match media_type {
            MediaType::Audio => self.audio.clone(),
            MediaType::Video => self.video.get(&ssrc).cloned(),
        }
    }
}

struct TransformerState {
    enabled: bool,
    key_index: u8,
    observer: Option<Arc<dyn StateObserver>>,
    last_enc_state: Option<FrameCryptionState>,
    last_dec_state: Option<FrameCryptionState>,
}

/// Per-participant frame encryptor/decryptor.
///
/// Owns one worker task; dropping the transformer aborts the worker and
/// discards queued frames. The key provider is shared with the application
/// and possibly with other transformers.
pub struct FrameTransformer {
    participant_id: String,
    media_type: MediaType,
    algorithm: Algorithm,
    tasks: mpsc::UnboundedSender<CryptoTask>,
    worker: tokio::task::AbortHandle,
    sinks: Arc<Mutex<SinkRegistry>>,
    state: Arc<Mutex<TransformerState>>,
}

impl FrameTransformer {
    /// Create a transformer and spawn its worker task.
    ///
    /// Must be called within a Tokio runtime. Cryption starts disabled;
    /// frames pass through (or are discarded, per the provider options)
    /// until [`set_enabled`](Self::set_enabled) is called.
    pub fn new(
        notifier: SignalingNotifier,
        participant_id: impl Into<String>,
        media_type: MediaType,
        algorithm: Algorithm,
        key_provider: Arc<dyn KeyProvider>,
    ) -> Self {
        let participant_id = participant_id.into();
        let sinks = Arc::new(Mutex::new(SinkRegistry::default()));
        let state = Arc::new(Mutex::new(TransformerState {
            enabled: false,
            key_index: 0,
            observer: None,
            last_enc_state: None,
            last_dec_state: None,
        }));

        let (tasks, task_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            participant_id: participant_id.clone(),
            media_type,
            algorithm,
            key_provider,
            notifier,
            sinks: Arc::clone(&sinks),
            state: Arc::clone(&state),
            send_counts: HashMap::new(),
            rng: SmallRng::from_entropy(),
        };
        let worker = tokio::spawn(worker.run(task_rx)).abort_handle();

        Self { participant_id, media_type, algorithm, tasks, worker, sinks, state }
    }

    /// Participant this transformer services.
    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Media type this transformer services.
    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    /// AEAD algorithm in use.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Enable or disable cryption.
    pub fn set_enabled(&self, enabled: bool) {
        self.lock_state().enabled = enabled;
    }

    /// Whether cryption is enabled.
    pub fn enabled(&self) -> bool {
        self.lock_state().enabled
    }

    /// Select the key slot used for encryption.
    pub fn set_key_index(&self, index: u8) {
        self.lock_state().key_index = index;
    }

    /// Key slot currently used for encryption.
    pub fn key_index(&self) -> u8 {
        self.lock_state().key_index
    }

    /// Register the sink for audio frames.
    pub fn register_sink(&self, sink: Arc<dyn FrameSink>) {
        self.lock_sinks().audio = Some(sink);
    }

    /// Unregister the audio sink.
    pub fn unregister_sink(&self) {
        self.lock_sinks().audio = None;
    }

    /// Register the sink for video frames with the given SSRC.
    pub fn register_video_sink(&self, ssrc: u32, sink: Arc<dyn FrameSink>) {
        self.lock_sinks().video.insert(ssrc, sink);
    }

    /// Unregister the video sink for the given SSRC.
    pub fn unregister_video_sink(&self, ssrc: u32) {
        self.lock_sinks().video.remove(&ssrc);
    }

    /// Register the state-change observer.
    pub fn register_observer(&self, observer: Arc<dyn StateObserver>) {
        self.lock_state().observer = Some(observer);
    }

    /// Unregister the state-change observer.
    pub fn unregister_observer(&self) {
        self.lock_state().observer = None;
    }

    /// Accept one frame from the transport path.
    ///
    /// Non-blocking: dispatches to the worker by direction. Frames with an
    /// unknown direction are discarded, as are all frames while no sink is
    /// registered. Errors never propagate here; failures surface as dropped
    /// frames plus observer notifications.
    pub fn transform(&self, frame: MediaFrame) {
        if self.lock_sinks().is_empty() {
            tracing::warn!(participant = %self.participant_id, "no sink registered, dropping frame");
            return;
        }

        let task = match frame.direction() {
            FrameDirection::Sender => CryptoTask::Encrypt(frame),
            FrameDirection::Receiver => CryptoTask::Decrypt(frame),
            FrameDirection::Unknown => {
                tracing::debug!(participant = %self.participant_id, "unknown direction, discarding frame");
                return;
            },
        };

        if self.tasks.send(task).is_err() {
            tracing::warn!(participant = %self.participant_id, "worker stopped, dropping frame");
        }
    }

    /// Stop the worker; queued frames are dropped.
    pub fn stop(&self) {
        self.worker.abort();
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TransformerState> {
        self.state.lock().expect("state lock poisoned")
    }

    fn lock_sinks(&self) -> std::sync::MutexGuard<'_, SinkRegistry> {
        self.sinks.lock().expect("sink registry lock poisoned")
    }
}

impl Drop for FrameTransformer {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

/// Worker-task state: everything the crypto paths touch without locks.
struct Worker {
    participant_id: String,
    media_type: MediaType,
    algorithm: Algorithm,
    key_provider: Arc<dyn KeyProvider>,
    notifier: SignalingNotifier,
    sinks: Arc<Mutex<SinkRegistry>>,
    state: Arc<Mutex<TransformerState>>,
    send_counts: HashMap<u32, u32>,
    rng: SmallRng,
}

impl Worker {
    async fn run(mut self, mut tasks: mpsc::UnboundedReceiver<CryptoTask>) {
        while let Some(task) = tasks.recv().await {
            match task {
                CryptoTask::Encrypt(frame) => self.encrypt_frame(frame),
                CryptoTask::Decrypt(frame) => self.decrypt_frame(frame),
            }
        }
    }

    fn encrypt_frame(&mut self, mut frame: MediaFrame) {
        let (enabled, key_index, sink) = self.snapshot(frame.ssrc());
        let Some(sink) = sink else {
            tracing::warn!(participant = %self.participant_id, ssrc = frame.ssrc(), "no sink for frame");
            self.publish(CryptoOp::Encrypt, FrameCryptionState::InternalError);
            return;
        };

        let data = frame.payload().clone();
        if data.is_empty() || !enabled {
            if self.key_provider.options().discard_frame_when_cryptor_not_ready {
                return;
            }
            sink.on_transformed_frame(frame);
            return;
        }

        let Some(handler) = self.key_handler() else {
            self.publish(CryptoOp::Encrypt, FrameCryptionState::MissingKey);
            return;
        };
        let Some(key_set) = handler.get_key_set(key_index) else {
            tracing::debug!(participant = %self.participant_id, key_index, "no key in slot");
            self.publish(CryptoOp::Encrypt, FrameCryptionState::MissingKey);
            return;
        };

        let prefix = (codec::unencrypted_prefix(&frame, self.media_type) as usize).min(data.len());
        let (header, body) = data.split_at(prefix);

        let iv = self.make_iv(frame.ssrc(), frame.timestamp());
        let ciphertext = match aead::encrypt(key_set.encryption_key(), &iv, header, body) {
            Ok(ciphertext) => ciphertext,
            Err(err) => {
                tracing::warn!(participant = %self.participant_id, %err, "frame encryption failed");
                self.publish(CryptoOp::Encrypt, FrameCryptionState::EncryptionFailed);
                return;
            },
        };

        let iv_size = self.algorithm.iv_size();
        let mut middle = BytesMut::with_capacity(ciphertext.len() + iv_size + TRAILER_SIZE);
        middle.extend_from_slice(&ciphertext);
        middle.extend_from_slice(&iv);
        middle.extend_from_slice(&[iv_size as u8, key_index]);

        let mut out = BytesMut::with_capacity(prefix + middle.len());
        out.extend_from_slice(header);
        if codec::frame_is_h264(&frame, self.media_type) {
            out.extend_from_slice(&h264::write_rbsp(&middle));
        } else {
            out.extend_from_slice(&middle);
        }

        frame.set_payload(out.freeze());
        self.publish(CryptoOp::Encrypt, FrameCryptionState::Ok);
        sink.on_transformed_frame(frame);
    }

    fn decrypt_frame(&mut self, mut frame: MediaFrame) {
        let (enabled, _, sink) = self.snapshot(frame.ssrc());
        let Some(sink) = sink else {
            tracing::warn!(participant = %self.participant_id, ssrc = frame.ssrc(), "no sink for frame");
            self.publish(CryptoOp::Decrypt, FrameCryptionState::InternalError);
            return;
        };

        let data = frame.payload().clone();
        let options = self.key_provider.options();
        if data.is_empty() || !enabled {
            if options.discard_frame_when_cryptor_not_ready {
                return;
            }
            sink.on_transformed_frame(frame);
            return;
        }

        // Frames tagged with the magic bytes bypass decryption entirely.
        let magic = &options.uncrypted_magic_bytes;
        if !magic.is_empty() && data.len() >= magic.len() && data.ends_with(magic) {
            frame.set_payload(data.slice(0..data.len() - magic.len()));
            sink.on_transformed_frame(frame);
            return;
        }

        let prefix = codec::unencrypted_prefix(&frame, self.media_type) as usize;
        if data.len() < prefix + TRAILER_SIZE {
            tracing::warn!(participant = %self.participant_id, len = data.len(), "frame too short");
            self.publish(CryptoOp::Decrypt, FrameCryptionState::DecryptionFailed);
            return;
        }

        let iv_len = data[data.len() - 2] as usize;
        let key_index = data[data.len() - 1];
        if iv_len != self.algorithm.iv_size() {
            tracing::warn!(
                participant = %self.participant_id,
                iv_len,
                expected = self.algorithm.iv_size(),
                "unexpected iv size in trailer"
            );
            self.publish(CryptoOp::Decrypt, FrameCryptionState::DecryptionFailed);
            return;
        }

        let handler = match self.key_handler() {
            Some(handler) if (key_index as usize) < options.key_ring_size => handler,
            _ => {
                tracing::debug!(participant = %self.participant_id, key_index, "no key handler");
                self.publish(CryptoOp::Decrypt, FrameCryptionState::MissingKey);
                return;
            },
        };
        let Some(key_set) = handler.get_key_set(key_index) else {
            tracing::debug!(participant = %self.participant_id, key_index, "no key in slot");
            self.publish(CryptoOp::Decrypt, FrameCryptionState::MissingKey);
            return;
        };

        // After a published failure, wait for fresh material instead of
        // burning the ratchet window on every frame.
        if self.lock_state().last_dec_state == Some(FrameCryptionState::DecryptionFailed)
            && !handler.has_valid_key()
        {
            return;
        }

        let header = &data[..prefix];
        let mut region = data[prefix..].to_vec();
        if codec::frame_is_h264(&frame, self.media_type) && codec::needs_rbsp_unescape(&region) {
            region = h264::parse_rbsp(&region);
        }

        if region.len() < iv_len + TRAILER_SIZE {
            self.publish(CryptoOp::Decrypt, FrameCryptionState::DecryptionFailed);
            return;
        }
        let iv_end = region.len() - TRAILER_SIZE;
        let iv: [u8; IV_SIZE] = region[iv_end - iv_len..iv_end]
            .try_into()
            .expect("invariant: iv length was validated against the algorithm");
        let ciphertext = &region[..iv_end - iv_len];

        let (plaintext, recovered) =
            match aead::decrypt(key_set.encryption_key(), &iv, header, ciphertext) {
                Ok(plaintext) => (Some(plaintext), false),
                Err(err) => {
                    tracing::warn!(participant = %self.participant_id, %err, "frame decryption failed");
                    let ratcheted_plaintext = self.ratchet_decrypt(
                        &handler,
                        key_index,
                        &iv,
                        header,
                        ciphertext,
                        key_set.material(),
                    );
                    let recovered = ratcheted_plaintext.is_some();
                    (ratcheted_plaintext, recovered)
                },
            };

        let Some(plaintext) = plaintext else {
            if handler.decryption_failure() {
                self.publish(CryptoOp::Decrypt, FrameCryptionState::DecryptionFailed);
            }
            return;
        };

        let mut out = BytesMut::with_capacity(prefix + plaintext.len());
        out.extend_from_slice(header);
        out.extend_from_slice(&plaintext);
        frame.set_payload(out.freeze());

        let state =
            if recovered { FrameCryptionState::KeyRatcheted } else { FrameCryptionState::Ok };
        self.publish(CryptoOp::Decrypt, state);
        sink.on_transformed_frame(frame);
    }

    /// Retry decryption across the ratchet window.
    ///
    /// On success the recovered material is installed at `key_index` and the
    /// handler marked valid. On exhaustion the slot is restored to
    /// `initial_material`: the announced key may simply not be in use yet,
    /// and the original must be tried again on the next frame.
    fn ratchet_decrypt(
        &self,
        handler: &Arc<ParticipantKeyHandler>,
        key_index: u8,
        iv: &[u8; IV_SIZE],
        header: &[u8],
        ciphertext: &[u8],
        initial_material: &[u8],
    ) -> Option<Vec<u8>> {
        let options = self.key_provider.options();
        if options.ratchet_window_size == 0 {
            return None;
        }

        let mut current_material = initial_material.to_vec();
        for attempt in 1..=options.ratchet_window_size {
            tracing::debug!(
                participant = %self.participant_id,
                attempt,
                window = options.ratchet_window_size,
                "ratcheting key"
            );

            let new_material = handler.ratchet_material(&current_material);
            // Trial keys are 128-bit, matching what handlers install.
            let Ok(trial) = handler.derive_keys(&new_material, &options.ratchet_salt, 128) else {
                break;
            };

            match aead::decrypt(trial.encryption_key(), iv, header, ciphertext) {
                Ok(plaintext) => {
                    if let Err(err) = handler.set_key_from_material(&new_material, key_index) {
                        tracing::warn!(%err, "failed to install ratcheted key");
                    }
                    handler.set_has_valid_key();
                    tracing::debug!(
                        participant = %self.participant_id,
                        key_index,
                        "ratcheted to new key"
                    );
                    return Some(plaintext);
                },
                Err(_) => current_material = new_material,
            }
        }

        if let Err(err) = handler.set_key_from_material(initial_material, key_index) {
            tracing::warn!(participant = %self.participant_id, %err, "failed to restore key material");
        }
        None
    }

    /// 12-byte IV: `BE32(ssrc) ‖ BE32(timestamp) ‖ BE32(timestamp - count)`.
    ///
    /// The per-SSRC counter is seeded once to a random 16-bit value and
    /// incremented per frame; uniqueness per key is carried by the
    /// timestamp, the counter only diversifies IVs across sessions.
    fn make_iv(&mut self, ssrc: u32, timestamp: u32) -> [u8; IV_SIZE] {
        let count = match self.send_counts.entry(ssrc) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(self.rng.gen_range(0..=0xFFFF)),
        };

        let mut iv = [0u8; IV_SIZE];
        iv[0..4].copy_from_slice(&ssrc.to_be_bytes());
        iv[4..8].copy_from_slice(&timestamp.to_be_bytes());
        iv[8..12].copy_from_slice(&timestamp.wrapping_sub(*count % 0x1_0000).to_be_bytes());
        *count = count.wrapping_add(1);

        iv
    }

    fn key_handler(&self) -> Option<Arc<ParticipantKeyHandler>> {
        if self.key_provider.options().shared_key {
            self.key_provider.get_shared_key(&self.participant_id)
        } else {
            self.key_provider.get_key(&self.participant_id)
        }
    }

    fn snapshot(&self, ssrc: u32) -> (bool, u8, Option<Arc<dyn FrameSink>>) {
        let (enabled, key_index) = {
            let state = self.lock_state();
            (state.enabled, state.key_index)
        };
        let sink =
            self.sinks.lock().expect("sink registry lock poisoned").for_frame(self.media_type, ssrc);
        (enabled, key_index, sink)
    }

    /// Publish a state change, edge-triggered per direction.
    fn publish(&self, op: CryptoOp, state: FrameCryptionState) {
        let mut guard = self.lock_state();
        let last = match op {
            CryptoOp::Encrypt => &mut guard.last_enc_state,
            CryptoOp::Decrypt => &mut guard.last_dec_state,
        };
        if *last == Some(state) {
            return;
        }
        *last = Some(state);

        if let Some(observer) = guard.observer.clone() {
            self.notifier.post(observer, self.participant_id.clone(), state);
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TransformerState> {
        self.state.lock().expect("state lock poisoned")
    }
}
