//! Asynchronous state-change dispatch
//!
//! Transformers never invoke observers from the crypto worker. State
//! changes are posted to a shared notifier task, which serializes observer
//! callbacks across all transformers holding the same handle; the post
//! itself never blocks.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{sink::StateObserver, state::FrameCryptionState};

struct StateEvent {
    observer: Arc<dyn StateObserver>,
    participant_id: String,
    state: FrameCryptionState,
}

/// Handle to the signaling dispatch task.
///
/// Cloneable; transformers sharing a handle share one dispatch task. The
/// task exits when every handle has been dropped.
#[derive(Clone)]
pub struct SignalingNotifier {
    events: mpsc::UnboundedSender<StateEvent>,
}

impl SignalingNotifier {
    /// Spawn the dispatch task. Must be called within a Tokio runtime.
    pub fn spawn() -> Self {
        let (events, mut rx) = mpsc::unbounded_channel::<StateEvent>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                event.observer.on_state_changed(&event.participant_id, event.state);
            }
        });
        Self { events }
    }

    /// Post one state change; returns immediately.
    pub(crate) fn post(
        &self,
        observer: Arc<dyn StateObserver>,
        participant_id: String,
        state: FrameCryptionState,
    ) {
        // Best-effort: a stopped dispatcher drops the event.
        let _ = self.events.send(StateEvent { observer, participant_id, state });
    }
}
