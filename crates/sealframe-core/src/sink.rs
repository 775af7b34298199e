//! Capability traits consumed by the frame transformer
//!
//! Both are single-method callbacks implemented by the host: sinks receive
//! transformed frames on the worker task, observers receive state changes
//! on the signaling notifier task.

use crate::{frame::MediaFrame, state::FrameCryptionState};

/// Receives transformed frames, called from the transformer's worker.
pub trait FrameSink: Send + Sync {
    /// Deliver one transformed frame downstream.
    fn on_transformed_frame(&self, frame: MediaFrame);
}

/// Receives cryption state transitions, called from the signaling notifier.
pub trait StateObserver: Send + Sync {
    /// One state transition for one participant.
    fn on_state_changed(&self, participant_id: &str, state: FrameCryptionState);
}
