//! Request-path side of the channel

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::channel::EnvelopeChannel;
use super::envelope::{Envelope, EventType};
use crate::types::Result;

/// Serializes envelopes and publishes them
#[derive(Clone)]
pub struct Producer {
    channel: Arc<dyn EnvelopeChannel>,
}

impl Producer {
    pub fn new(channel: Arc<dyn EnvelopeChannel>) -> Self {
        Self { channel }
    }

    /// Publish `{type, body}`; returns the envelope's idempotency key
    pub async fn enqueue<T: Serialize>(&self, event_type: EventType, body: &T) -> Result<String> {
        let envelope = Envelope::new(event_type, body)?;
        let key = envelope.idempotency_key();

        self.channel.send(envelope.encode()?).await?;

        debug!(event_type = %event_type, key = %key, "Enqueued envelope");
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::envelope::CompleteMissionBody;
    use crate::queue::memory::InMemoryChannel;
    use std::time::Duration;

    #[tokio::test]
    async fn test_enqueue_publishes_envelope() {
        let channel = Arc::new(InMemoryChannel::new());
        let producer = Producer::new(channel.clone());

        let key = producer
            .enqueue(
                EventType::CompleteMission,
                &CompleteMissionBody {
                    user_id: 2,
                    mission_id: 5,
                },
            )
            .await
            .unwrap();

        let batch = channel
            .receive_batch(1, Duration::from_millis(10))
            .await
            .unwrap();
        let envelope = Envelope::decode(&batch[0].payload).unwrap();
        assert_eq!(envelope.event_type, "CompleteMission");
        assert_eq!(envelope.idempotency_key(), key);
    }
}
