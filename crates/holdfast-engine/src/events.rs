// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Event publisher: fan-out of "what changed" to external listeners.
//!
//! Purely a sink. Delivery is fire-and-forget and at-most-once: a
//! publish with no subscribers is not an error, and engines always
//! publish strictly after their store commit succeeded.

use std::sync::Arc;

use holdfast_protocol::EventEnvelope;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{EngineError, Result};

/// Sink for engine events.
pub trait EventPublisher: Send + Sync {
    /// Publish a serialized envelope on a channel.
    fn publish_envelope(&self, envelope: EventEnvelope);
}

/// Serialize a typed payload and hand it to the publisher.
pub fn publish<T: Serialize>(
    publisher: &Arc<dyn EventPublisher>,
    channel: &str,
    payload: &T,
) -> Result<()> {
    let envelope =
        EventEnvelope::new(channel, payload).map_err(|e| EngineError::InvalidRecord {
            entity: "event".to_string(),
            details: format!("failed to serialize payload for '{}': {}", channel, e),
        })?;
    publisher.publish_envelope(envelope);
    Ok(())
}

/// Broadcast-backed publisher: presentation clients subscribe to a
/// [`tokio::sync::broadcast`] channel; lagging or absent subscribers
/// simply miss events.
pub struct BroadcastPublisher {
    sender: broadcast::Sender<EventEnvelope>,
}

impl BroadcastPublisher {
    /// Create a publisher with the given subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish_envelope(&self, envelope: EventEnvelope) {
        // At-most-once: nobody listening is fine.
        let channel = envelope.channel.clone();
        if self.sender.send(envelope).is_err() {
            debug!(channel = %channel, "Event published with no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdfast_protocol::channel;

    #[derive(Serialize)]
    struct Probe {
        value: i32,
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let publisher = BroadcastPublisher::new(16);
        let mut receiver = publisher.subscribe();
        let publisher: Arc<dyn EventPublisher> = Arc::new(publisher);

        publish(&publisher, channel::UPKEEP_TICK, &Probe { value: 7 }).unwrap();

        let envelope = receiver.recv().await.unwrap();
        assert_eq!(envelope.channel, "upkeep:tick");
        assert_eq!(envelope.payload["value"], 7);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_not_an_error() {
        let publisher: Arc<dyn EventPublisher> = Arc::new(BroadcastPublisher::new(16));
        publish(&publisher, channel::UPKEEP_TICK, &Probe { value: 1 }).unwrap();
    }
}
