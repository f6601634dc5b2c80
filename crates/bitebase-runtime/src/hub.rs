//! Event fan-in point between the pipeline and the API layer.

use bitebase_core::events::AnalysisEvent;
use tokio::sync::broadcast;
use tracing::debug;

/// Broadcast hub for [`AnalysisEvent`]s.
///
/// The pipeline publishes; WebSocket connections and SSE streams subscribe.
/// Broadcast semantics mean a lagging subscriber drops events rather than
/// blocking the pipeline.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<AnalysisEvent>,
}

impl EventHub {
    /// Create a hub with the given per-subscriber buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Publishing with zero subscribers is not an error — analyses can run
    /// with nobody watching.
    pub fn publish(&self, event: AnalysisEvent) {
        let kind = event.event_type();
        match self.sender.send(event) {
            Ok(receivers) => debug!(event = kind, receivers, "event published"),
            Err(_) => debug!(event = kind, "event published with no subscribers"),
        }
    }

    /// Subscribe to all events from this point on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AnalysisEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitebase_core::events::wire_timestamp;
    use bitebase_core::ids::SessionId;

    fn event(progress: u8) -> AnalysisEvent {
        AnalysisEvent::AgentProgress {
            session_id: SessionId::new("sess_hub"),
            timestamp: wire_timestamp(),
            agent: "market-discovery".into(),
            progress,
            message: None,
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let hub = EventHub::new(8);
        hub.publish(event(1));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_in_order() {
        let hub = EventHub::new(8);
        let mut rx = hub.subscribe();
        hub.publish(event(1));
        hub.publish(event(2));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        match (first, second) {
            (
                AnalysisEvent::AgentProgress { progress: p1, .. },
                AnalysisEvent::AgentProgress { progress: p2, .. },
            ) => {
                assert_eq!((p1, p2), (1, 2));
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn each_subscriber_gets_every_event() {
        let hub = EventHub::new(8);
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();
        hub.publish(event(7));

        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }

    #[tokio::test]
    async fn lagging_subscriber_drops_rather_than_blocks() {
        let hub = EventHub::new(2);
        let mut rx = hub.subscribe();
        for i in 0..10 {
            hub.publish(event(i));
        }
        // The first recv reports the lag; the channel stays usable.
        match rx.recv().await {
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => assert!(n > 0),
            other => panic!("expected lag, got {other:?}"),
        }
        assert!(rx.recv().await.is_ok());
    }
}
