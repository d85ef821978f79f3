//! Notification sink that records everything enqueued.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use fare_negotiation_core::{Notification, NotificationSink, UserId};
use std::sync::{Arc, Mutex};

/// Captures notifications for assertions.
///
/// Clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotificationSink {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotificationSink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything enqueued so far, in order
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    /// Event names addressed to `recipient`, in order
    #[must_use]
    pub fn event_names_for(&self, recipient: UserId) -> Vec<&'static str> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.recipient == recipient)
            .map(|n| n.event.name())
            .collect()
    }

    /// Number of notifications enqueued
    #[must_use]
    pub fn len(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Whether nothing was enqueued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sent.lock().unwrap().is_empty()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl NotificationSink for RecordingNotificationSink {
    fn enqueue(&self, notification: Notification) {
        self.sent.lock().unwrap().push(notification);
    }
}
