//! Tokio broadcast event bus for pipeline progress notifications.

use crate::models::PipelineEvent;
use tokio::sync::broadcast;

/// Default buffer capacity.
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 256;

/// Broadcasts pipeline events to any number of observers.
///
/// Publishing never blocks; slow observers lose the oldest events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

/// Filtered receiver that yields events matching a predicate.
pub struct FilteredReceiver<F> {
    receiver: broadcast::Receiver<PipelineEvent>,
    predicate: F,
}

impl EventBus {
    /// Creates a new event bus with the given buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers (best effort).
    pub fn publish(&self, event: PipelineEvent) {
        metrics::counter!("event_bus_publish_total", "event_type" => event.event_type())
            .increment(1);
        let receivers = self.sender.receiver_count();
        metrics::gauge!("event_bus_receivers").set(receivers as f64);
        match self.sender.send(event) {
            Ok(_) => {
                metrics::gauge!("event_bus_queue_depth").set(self.sender.len() as f64);
            },
            Err(_) => {
                // No subscribers.
                metrics::counter!("event_bus_publish_failed_total").increment(1);
            },
        }
    }

    /// Subscribes to all events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        metrics::counter!("event_bus_subscriptions_total").increment(1);
        self.sender.subscribe()
    }

    /// Subscribes with a predicate to filter events by type or attributes.
    #[must_use]
    pub fn subscribe_filtered<F>(&self, predicate: F) -> FilteredReceiver<F>
    where
        F: Fn(&PipelineEvent) -> bool,
    {
        metrics::counter!("event_bus_subscriptions_total").increment(1);
        FilteredReceiver {
            receiver: self.sender.subscribe(),
            predicate,
        }
    }

    /// Subscribes to events matching the provided event type.
    #[must_use]
    pub fn subscribe_event_type(
        &self,
        event_type: &'static str,
    ) -> FilteredReceiver<impl Fn(&PipelineEvent) -> bool> {
        self.subscribe_filtered(move |event| event.event_type() == event_type)
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUS_CAPACITY)
    }
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&PipelineEvent) -> bool,
{
    /// Receives the next event that matches the predicate.
    ///
    /// # Errors
    ///
    /// Returns [`broadcast::error::RecvError::Closed`] once the bus is gone.
    pub async fn recv(&mut self) -> Result<PipelineEvent, broadcast::error::RecvError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if (self.predicate)(&event) {
                        return Ok(event);
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    metrics::counter!("event_bus_lagged_total").increment(skipped);
                },
                Err(err) => return Err(err),
            }
        }
    }
}
