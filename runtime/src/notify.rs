//! Channel-backed notification sink.
//!
//! The engine enqueues onto a bounded Tokio channel and never waits. A
//! separate task drains the receiver and hands notifications to whatever
//! delivers them; a full or closed queue drops the notification with a
//! warning and a counter increment.

use crate::metrics::NegotiationMetrics;
use fare_negotiation_core::{Notification, NotificationSink};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Notification sink writing to a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotificationSink {
    sender: mpsc::Sender<Notification>,
}

impl ChannelNotificationSink {
    /// Create a sink and the receiver that drains it.
    ///
    /// `buffer` must be at least 1.
    #[must_use]
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { sender }, receiver)
    }
}

impl NotificationSink for ChannelNotificationSink {
    fn enqueue(&self, notification: Notification) {
        match self.sender.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                NegotiationMetrics::record_notification_dropped("full");
                tracing::warn!(
                    event = dropped.event.name(),
                    negotiation_id = %dropped.event.negotiation_id(),
                    recipient = %dropped.recipient,
                    "Notification queue full, dropping notification"
                );
            }
            Err(TrySendError::Closed(dropped)) => {
                NegotiationMetrics::record_notification_dropped("closed");
                tracing::warn!(
                    event = dropped.event.name(),
                    negotiation_id = %dropped.event.negotiation_id(),
                    "Notification queue closed, dropping notification"
                );
            }
        }
    }
}
