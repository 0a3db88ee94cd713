//! NATS JetStream envelope channel
//!
//! A durable file-backed stream holds the envelopes. The consumer is a durable
//! pull consumer with explicit acks: `delete` acks, `release` naks with a
//! delay, and the delivery count comes from the message metadata.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_nats::jetstream::{self, consumer::PullConsumer, stream::Stream, AckKind};
use async_nats::ConnectOptions;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use super::channel::{Delivery, EnvelopeChannel};
use crate::config::NatsArgs;
use crate::types::{LaurelError, Result};

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// How long an unacknowledged delivery stays invisible before redelivery
const ACK_WAIT: Duration = Duration::from_secs(60);

/// Stream and consumer settings
#[derive(Debug, Clone)]
pub struct JetStreamConfig {
    pub stream_name: String,
    pub subject: String,
    pub consumer_name: String,
    /// Upper bound on unacknowledged deliveries held by this consumer
    pub max_ack_pending: i64,
}

impl Default for JetStreamConfig {
    fn default() -> Self {
        Self {
            stream_name: "LAUREL_REWARDS".to_string(),
            subject: "laurel.rewards".to_string(),
            consumer_name: "laurel_rewards_worker".to_string(),
            max_ack_pending: 100,
        }
    }
}

pub struct JetStreamChannel {
    jetstream: jetstream::Context,
    consumer: PullConsumer,
    subject: String,
    in_flight: DashMap<u64, jetstream::Message>,
    next_handle: AtomicU64,
}

impl JetStreamChannel {
    /// Connect to NATS and ensure the stream and durable consumer exist
    pub async fn connect(nats: &NatsArgs, config: &JetStreamConfig, name: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", nats.nats_url);

        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&nats.nats_user, &nats.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&nats.nats_url)
            .await
            .map_err(|e| LaurelError::Nats(format!("Failed to connect: {}", e)))?;

        let jetstream = jetstream::new(client);
        let stream = ensure_stream(&jetstream, config).await?;
        let consumer = ensure_consumer(&stream, config).await?;

        Ok(Self {
            jetstream,
            consumer,
            subject: config.subject.clone(),
            in_flight: DashMap::new(),
            next_handle: AtomicU64::new(1),
        })
    }

    fn take(&self, delivery: &Delivery) -> Option<jetstream::Message> {
        let taken = self.in_flight.remove(&delivery.handle).map(|(_, msg)| msg);
        if taken.is_none() {
            warn!(handle = delivery.handle, "No in-flight message for delivery");
        }
        taken
    }
}

async fn ensure_stream(jetstream: &jetstream::Context, config: &JetStreamConfig) -> Result<Stream> {
    let stream = jetstream
        .get_or_create_stream(jetstream::stream::Config {
            name: config.stream_name.clone(),
            subjects: vec![config.subject.clone()],
            max_age: Duration::from_secs(7 * 24 * 3600),
            storage: jetstream::stream::StorageType::File,
            ..Default::default()
        })
        .await
        .map_err(|e| LaurelError::Nats(format!("Failed to create stream: {}", e)))?;

    info!(
        "Using stream {} with subject {}",
        config.stream_name, config.subject
    );
    Ok(stream)
}

async fn ensure_consumer(stream: &Stream, config: &JetStreamConfig) -> Result<PullConsumer> {
    let consumer = stream
        .get_or_create_consumer(
            &config.consumer_name,
            jetstream::consumer::pull::Config {
                durable_name: Some(config.consumer_name.clone()),
                ack_policy: jetstream::consumer::AckPolicy::Explicit,
                ack_wait: ACK_WAIT,
                filter_subject: config.subject.clone(),
                max_ack_pending: config.max_ack_pending,
                ..Default::default()
            },
        )
        .await
        .map_err(|e| LaurelError::Nats(format!("Failed to create consumer: {}", e)))?;

    info!("Using consumer {}", config.consumer_name);
    Ok(consumer)
}

#[async_trait]
impl EnvelopeChannel for JetStreamChannel {
    async fn send(&self, payload: Bytes) -> Result<()> {
        // Wait for the stream's publish ack so a returned Ok means the envelope is stored
        self.jetstream
            .publish(self.subject.clone(), payload)
            .await
            .map_err(|e| LaurelError::Nats(format!("Publish failed: {}", e)))?
            .await
            .map_err(|e| LaurelError::Nats(format!("Publish not acknowledged: {}", e)))?;
        Ok(())
    }

    async fn receive_batch(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(max)
            .expires(wait)
            .messages()
            .await
            .map_err(|e| LaurelError::Nats(format!("Failed to fetch messages: {}", e)))?;

        let mut batch = Vec::new();
        while let Some(msg_result) = messages.next().await {
            match msg_result {
                Ok(msg) => {
                    let attempt = msg
                        .info()
                        .map(|info| info.delivered.max(1) as u32)
                        .unwrap_or(1);
                    let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
                    batch.push(Delivery {
                        handle,
                        payload: msg.payload.clone(),
                        attempt,
                    });
                    self.in_flight.insert(handle, msg);
                }
                Err(e) => {
                    warn!("Error receiving message: {}", e);
                }
            }
        }

        if !batch.is_empty() {
            debug!("Fetched {} envelopes", batch.len());
        }
        Ok(batch)
    }

    async fn delete(&self, delivery: &Delivery) -> Result<()> {
        let Some(msg) = self.take(delivery) else {
            return Ok(());
        };
        msg.ack()
            .await
            .map_err(|e| LaurelError::Nats(format!("Ack failed: {}", e)))
    }

    async fn release(&self, delivery: &Delivery, delay: Duration) -> Result<()> {
        let Some(msg) = self.take(delivery) else {
            return Ok(());
        };
        msg.ack_with(AckKind::Nak(Some(delay)))
            .await
            .map_err(|e| LaurelError::Nats(format!("Nak failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    // Channel behavior against a live server is covered by running the worker
    // with a local nats-server; the shared contract is tested on InMemoryChannel.
    use super::*;

    #[test]
    fn test_default_config() {
        let config = JetStreamConfig::default();
        assert_eq!(config.stream_name, "LAUREL_REWARDS");
        assert!(config.max_ack_pending > 0);
    }
}
