//! Laurel - progress tracking and asynchronous reward fulfillment
//!
//! Users make progress toward titles and missions through tracked actions,
//! hold a coin balance, and receive rewards (titles, coins, experience,
//! notifications) once milestones complete.
//!
//! ## Components
//!
//! - **Wallet ledger**: atomic coin balance mutations
//! - **Progress tracker**: requirement progress, title awards
//! - **Mission validator**: transactional completion checks
//! - **Envelope channel**: at-least-once `{type, body}` envelopes between the
//!   request path and the consumer (NATS JetStream or in-memory)
//! - **Fulfillment handlers**: mission rewards and title purchases, applied as
//!   bounded queues of reward effects

pub mod cache;
pub mod config;
pub mod db;
pub mod handlers;
pub mod mail;
pub mod queue;
pub mod services;
pub mod types;

pub use config::Args;
pub use services::Services;
pub use types::{LaurelError, Result};
