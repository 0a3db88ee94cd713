//! Channel abstraction between the request path and the consumer

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::types::Result;

/// A received, not yet disposed message
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Backend handle used to delete or release this delivery
    pub handle: u64,
    pub payload: Bytes,
    /// Delivery count, starting at 1
    pub attempt: u32,
}

/// Durable at-least-once envelope channel
///
/// A delivery stays owned by the consumer until it is either deleted
/// (acknowledged) or released for redelivery.
#[async_trait]
pub trait EnvelopeChannel: Send + Sync {
    async fn send(&self, payload: Bytes) -> Result<()>;

    /// Wait up to `wait` for at least one message, returning at most `max`
    async fn receive_batch(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>>;

    async fn delete(&self, delivery: &Delivery) -> Result<()>;

    /// Hand the message back for redelivery no sooner than `delay`
    async fn release(&self, delivery: &Delivery, delay: Duration) -> Result<()>;
}
