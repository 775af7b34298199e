//! Ratchet recovery behavior across sender/receiver key drift
//!
//! The sender advances its material out-of-band; the receiver discovers the
//! new key by ratcheting inside the configured window, or gives up and
//! restores its original slot.

use std::{sync::Arc, time::Duration};

use sealframe_core::{
    Algorithm, DefaultKeyProvider, FrameCryptionState, FrameDirection, FrameSink, FrameTransformer,
    KeyProvider, KeyProviderOptions, MediaFrame, MediaType, SignalingNotifier, StateObserver,
};
use tokio::{sync::mpsc, time::timeout};

const MATERIAL: &[u8] = b"initial-key-material";

struct ChannelSink {
    frames: mpsc::UnboundedSender<MediaFrame>,
}

impl FrameSink for ChannelSink {
    fn on_transformed_frame(&self, frame: MediaFrame) {
        let _ = self.frames.send(frame);
    }
}

struct ChannelObserver {
    states: mpsc::UnboundedSender<FrameCryptionState>,
}

impl StateObserver for ChannelObserver {
    fn on_state_changed(&self, _participant_id: &str, state: FrameCryptionState) {
        let _ = self.states.send(state);
    }
}

struct TestTransformer {
    transformer: FrameTransformer,
    frames: mpsc::UnboundedReceiver<MediaFrame>,
    states: mpsc::UnboundedReceiver<FrameCryptionState>,
}

fn audio_transformer(provider: &Arc<DefaultKeyProvider>) -> TestTransformer {
    let transformer = FrameTransformer::new(
        SignalingNotifier::spawn(),
        "alice",
        MediaType::Audio,
        Algorithm::AesGcm,
        Arc::clone(provider) as Arc<dyn KeyProvider>,
    );

    let (frame_tx, frames) = mpsc::unbounded_channel();
    transformer.register_sink(Arc::new(ChannelSink { frames: frame_tx }));
    let (state_tx, states) = mpsc::unbounded_channel();
    transformer.register_observer(Arc::new(ChannelObserver { states: state_tx }));
    transformer.set_enabled(true);

    TestTransformer { transformer, frames, states }
}

fn provider_with_window(window: usize) -> Arc<DefaultKeyProvider> {
    let options = KeyProviderOptions { ratchet_window_size: window, ..Default::default() };
    let provider = Arc::new(DefaultKeyProvider::new(options));
    provider.set_key("alice", 0, MATERIAL).unwrap();
    provider
}

async fn expect_frame(rx: &mut mpsc::UnboundedReceiver<MediaFrame>) -> MediaFrame {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("frame channel closed")
}

async fn expect_no_frame(rx: &mut mpsc::UnboundedReceiver<MediaFrame>) {
    assert!(
        timeout(Duration::from_millis(200), rx.recv()).await.is_err(),
        "expected no frame delivery"
    );
}

async fn expect_state(rx: &mut mpsc::UnboundedReceiver<FrameCryptionState>) -> FrameCryptionState {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for state change")
        .expect("state channel closed")
}

async fn expect_no_state(rx: &mut mpsc::UnboundedReceiver<FrameCryptionState>) {
    assert!(
        timeout(Duration::from_millis(200), rx.recv()).await.is_err(),
        "expected no state change"
    );
}

#[tokio::test]
async fn receiver_recovers_after_three_sender_ratchets() {
    let sender_provider = provider_with_window(8);
    let receiver_provider = provider_with_window(8);

    for _ in 0..3 {
        sender_provider.ratchet_key("alice", 0).unwrap();
    }

    let mut sender = audio_transformer(&sender_provider);
    let mut receiver = audio_transformer(&receiver_provider);

    sender
        .transformer
        .transform(MediaFrame::audio(FrameDirection::Sender, 1, 0, vec![1, 2, 3, 4, 5]));
    let encrypted = expect_frame(&mut sender.frames).await;

    receiver
        .transformer
        .transform(MediaFrame::audio(FrameDirection::Receiver, 1, 0, encrypted.payload().clone()));

    let decrypted = expect_frame(&mut receiver.frames).await;
    assert_eq!(decrypted.payload().as_ref(), &[1, 2, 3, 4, 5]);
    assert_eq!(expect_state(&mut receiver.states).await, FrameCryptionState::KeyRatcheted);

    // The slot now holds the sender's material.
    assert_eq!(
        receiver_provider.export_key("alice", 0).unwrap(),
        sender_provider.export_key("alice", 0).unwrap()
    );

    // A second frame under the recovered key decrypts without another
    // KeyRatcheted notification; the state flips to Ok instead.
    sender
        .transformer
        .transform(MediaFrame::audio(FrameDirection::Sender, 1, 1, vec![6, 7, 8]));
    let encrypted = expect_frame(&mut sender.frames).await;
    receiver
        .transformer
        .transform(MediaFrame::audio(FrameDirection::Receiver, 1, 1, encrypted.payload().clone()));

    let decrypted = expect_frame(&mut receiver.frames).await;
    assert_eq!(decrypted.payload().as_ref(), &[6, 7, 8]);
    assert_eq!(expect_state(&mut receiver.states).await, FrameCryptionState::Ok);
}

#[tokio::test]
async fn exhausted_window_restores_initial_material() {
    let sender_provider = provider_with_window(2);
    let receiver_provider = provider_with_window(2);

    // Three ratchets ahead with a window of two: unrecoverable.
    for _ in 0..3 {
        sender_provider.ratchet_key("alice", 0).unwrap();
    }

    let mut sender = audio_transformer(&sender_provider);
    let mut receiver = audio_transformer(&receiver_provider);

    sender
        .transformer
        .transform(MediaFrame::audio(FrameDirection::Sender, 1, 0, vec![1, 2, 3]));
    let encrypted = expect_frame(&mut sender.frames).await;

    receiver
        .transformer
        .transform(MediaFrame::audio(FrameDirection::Receiver, 1, 0, encrypted.payload().clone()));

    assert_eq!(expect_state(&mut receiver.states).await, FrameCryptionState::DecryptionFailed);
    expect_no_frame(&mut receiver.frames).await;

    // The slot was restored to its pre-attempt material.
    assert_eq!(receiver_provider.export_key("alice", 0).unwrap(), MATERIAL);
}

#[tokio::test]
async fn zero_window_never_ratchets() {
    let sender_provider = provider_with_window(0);
    let receiver_provider = provider_with_window(0);

    sender_provider.ratchet_key("alice", 0).unwrap();

    let mut sender = audio_transformer(&sender_provider);
    let mut receiver = audio_transformer(&receiver_provider);

    sender
        .transformer
        .transform(MediaFrame::audio(FrameDirection::Sender, 1, 0, vec![1, 2, 3]));
    let encrypted = expect_frame(&mut sender.frames).await;

    receiver
        .transformer
        .transform(MediaFrame::audio(FrameDirection::Receiver, 1, 0, encrypted.payload().clone()));

    assert_eq!(expect_state(&mut receiver.states).await, FrameCryptionState::DecryptionFailed);
    expect_no_frame(&mut receiver.frames).await;
    assert_eq!(receiver_provider.export_key("alice", 0).unwrap(), MATERIAL);
}

#[tokio::test]
async fn backoff_ends_when_new_key_arrives() {
    let sender_provider = provider_with_window(0);
    let receiver_provider = provider_with_window(0);

    sender_provider.ratchet_key("alice", 0).unwrap();
    let drifted = sender_provider.export_key("alice", 0).unwrap();

    let mut sender = audio_transformer(&sender_provider);
    let mut receiver = audio_transformer(&receiver_provider);

    // First frame fails and invalidates the receiver's key.
    sender
        .transformer
        .transform(MediaFrame::audio(FrameDirection::Sender, 1, 0, vec![1, 2, 3]));
    let first = expect_frame(&mut sender.frames).await;
    receiver
        .transformer
        .transform(MediaFrame::audio(FrameDirection::Receiver, 1, 0, first.payload().clone()));
    assert_eq!(expect_state(&mut receiver.states).await, FrameCryptionState::DecryptionFailed);

    // Further frames are skipped silently while the key is invalid.
    sender
        .transformer
        .transform(MediaFrame::audio(FrameDirection::Sender, 1, 1, vec![4, 5, 6]));
    let second = expect_frame(&mut sender.frames).await;
    receiver
        .transformer
        .transform(MediaFrame::audio(FrameDirection::Receiver, 1, 1, second.payload().clone()));
    expect_no_frame(&mut receiver.frames).await;
    expect_no_state(&mut receiver.states).await;

    // Out-of-band key update re-validates and decryption resumes.
    receiver_provider.set_key("alice", 0, &drifted).unwrap();
    sender
        .transformer
        .transform(MediaFrame::audio(FrameDirection::Sender, 1, 2, vec![7, 8, 9]));
    let third = expect_frame(&mut sender.frames).await;
    receiver
        .transformer
        .transform(MediaFrame::audio(FrameDirection::Receiver, 1, 2, third.payload().clone()));

    let decrypted = expect_frame(&mut receiver.frames).await;
    assert_eq!(decrypted.payload().as_ref(), &[7, 8, 9]);
    assert_eq!(expect_state(&mut receiver.states).await, FrameCryptionState::Ok);
}
