//! Per-subject listener registry and fan-out
//!
//! One owned `ProgressBroadcaster` instance per process, injected into
//! whatever produces or serves events — never an ambient global. Each
//! listener gets its own unbounded channel, so publishing never blocks on a
//! slow consumer. A listener whose receiving side is gone (client
//! disconnected) is removed on the next publish to its subject.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;
use uuid::Uuid;

use crate::event::ProgressEvent;

struct Slot {
    id: Uuid,
    sender: UnboundedSender<ProgressEvent>,
}

/// A registered listener for one subject.
///
/// Owns the receiving end of its channel. Dropping the listener closes the
/// channel; the broadcaster notices on the next publish and forgets the slot.
pub struct Listener {
    id: Uuid,
    subject_id: String,
    pub receiver: UnboundedReceiver<ProgressEvent>,
}

impl Listener {
    /// Listener id, unique per subscription.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Subject this listener is registered under.
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Consume the listener, keeping only the receiving end.
    ///
    /// Used by streaming transports that tie the subscription's lifetime to
    /// the stream: when the receiver drops, the broadcaster forgets the
    /// listener on the next publish to its subject.
    pub fn into_receiver(self) -> UnboundedReceiver<ProgressEvent> {
        self.receiver
    }
}

/// Publish/subscribe fan-out of progress events keyed by subject.
#[derive(Default)]
pub struct ProgressBroadcaster {
    subjects: Mutex<HashMap<String, Vec<Slot>>>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new listener for a subject.
    ///
    /// Multiple listeners per subject are allowed (multiple open tabs).
    /// The listener receives only events published after this call.
    pub async fn subscribe(&self, subject_id: &str) -> Listener {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let mut subjects = self.subjects.lock().await;
        subjects
            .entry(subject_id.to_string())
            .or_default()
            .push(Slot { id, sender });
        debug!(subject_id, listener_id = %id, "listener subscribed");
        Listener {
            id,
            subject_id: subject_id.to_string(),
            receiver,
        }
    }

    /// Deliver an event to every current listener of its subject.
    ///
    /// Best-effort: listeners whose channel is closed are removed; with zero
    /// listeners the event is dropped. Returns the number of listeners that
    /// received the event.
    pub async fn publish(&self, event: ProgressEvent) -> usize {
        let mut subjects = self.subjects.lock().await;
        let Some(slots) = subjects.get_mut(&event.subject_id) else {
            return 0;
        };

        slots.retain(|slot| slot.sender.send(event.clone()).is_ok());
        let delivered = slots.len();
        if slots.is_empty() {
            subjects.remove(&event.subject_id);
        }
        debug!(
            subject_id = event.subject_id,
            delivered, "progress event published"
        );
        delivered
    }

    /// Remove a listener. Safe to call multiple times; dropping the listener
    /// has the same effect on the next publish.
    pub async fn unsubscribe(&self, listener: &Listener) {
        let mut subjects = self.subjects.lock().await;
        if let Some(slots) = subjects.get_mut(&listener.subject_id) {
            slots.retain(|slot| slot.id != listener.id);
            if slots.is_empty() {
                subjects.remove(&listener.subject_id);
            }
        }
    }

    /// Number of live listeners currently registered for a subject.
    pub async fn subscriber_count(&self, subject_id: &str) -> usize {
        let subjects = self.subjects.lock().await;
        subjects.get(subject_id).map_or(0, Vec::len)
    }
}
