//! Non-blocking fan-out of [`OrderingEvent`]s to side-effect consumers.

use shelf_api::OrderingEvent;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

/// Broadcast channel between the ordering core and its collaborators.
///
/// Publishing never waits: with no subscribers the event is dropped, and a subscriber that
/// falls more than `capacity` events behind observes a lag instead of slowing the sender.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OrderingEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: OrderingEvent) {
        match self.sender.send(event) {
            Ok(receivers) => trace!(?event, receivers, "event emitted"),
            Err(_) => trace!(?event, "event dropped, no subscribers"),
        }
    }

    pub fn emit_all(&self, events: impl IntoIterator<Item = OrderingEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderingEvent> {
        self.sender.subscribe()
    }

    /// Subscription as a stream; lag shows up as `Err(BroadcastStreamRecvError::Lagged)`.
    pub fn stream(&self) -> BroadcastStream<OrderingEvent> {
        BroadcastStream::new(self.sender.subscribe())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_api::CollectionId;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn emitting_without_subscribers_does_not_fail() {
        let bus = EventBus::new(4);
        bus.emit(OrderingEvent::ItemSetChanged {
            collection: CollectionId::new(),
        });
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let bus = EventBus::new(4);
        let mut first = bus.subscribe();
        let mut second = bus.stream();
        let collection = CollectionId::new();

        bus.emit(OrderingEvent::ItemSetChanged { collection });

        assert_eq!(
            first.recv().await.unwrap(),
            OrderingEvent::ItemSetChanged { collection }
        );
        assert_eq!(
            second.next().await.unwrap().unwrap(),
            OrderingEvent::ItemSetChanged { collection }
        );
    }
}
