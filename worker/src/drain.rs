//! Notification drain.
//!
//! Delivery transports (push, SMS, email) live outside this service; the
//! drain hands each notification to the log so an external shipper can pick
//! it up, and keeps the bounded queue from filling.

use fare_negotiation_core::Notification;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Drain `receiver` until every sender is dropped.
///
/// The task resolves to the number of notifications handled.
#[must_use]
pub fn spawn_notification_drain(mut receiver: mpsc::Receiver<Notification>) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut delivered = 0_u64;
        while let Some(notification) = receiver.recv().await {
            tracing::info!(
                recipient = %notification.recipient,
                event = notification.event.name(),
                negotiation_id = %notification.event.negotiation_id(),
                occurred_at = %notification.occurred_at,
                payload = ?notification.event,
                "Notification dispatched"
            );
            delivered += 1;
        }
        tracing::info!(delivered, "Notification drain stopped");
        delivered
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::Utc;
    use fare_negotiation_core::{
        NegotiationEvent, NegotiationId, NotificationSink, TripId, UserId,
    };
    use fare_negotiation_runtime::ChannelNotificationSink;

    #[tokio::test]
    async fn drains_until_senders_drop() {
        let (sink, receiver) = ChannelNotificationSink::channel(8);
        let drain = spawn_notification_drain(receiver);

        for _ in 0..3 {
            sink.enqueue(Notification::new(
                UserId::new(),
                NegotiationEvent::OfferExpired {
                    negotiation_id: NegotiationId::new(),
                    trip_id: TripId::new(),
                },
                Utc::now(),
            ));
        }
        drop(sink);

        assert_eq!(drain.await.unwrap(), 3);
    }
}
