//! Event envelope channel
//!
//! Decouples reward fulfillment from the request that triggered it.
//!
//! - **Producer**: serializes `{type, body}` envelopes onto the channel
//! - **Consumer**: long-polls, dispatches each envelope to its handler on its
//!   own task, then deletes, releases or dead-letters it
//!
//! Two channel backends share the [`EnvelopeChannel`] contract:
//! NATS JetStream for deployments and an in-memory queue for single-process
//! runs and tests.

pub mod channel;
pub mod consumer;
pub mod envelope;
pub mod jetstream;
pub mod memory;
pub mod producer;

pub use channel::{Delivery, EnvelopeChannel};
pub use consumer::{Consumer, ConsumerConfig, DispatchReport, Disposition};
pub use envelope::{CompleteMissionBody, Envelope, EventType, PurchaseTitleBody};
pub use jetstream::{JetStreamChannel, JetStreamConfig};
pub use memory::InMemoryChannel;
pub use producer::Producer;
