//! Envelope consumer - long-poll loop with per-envelope dispatch
//!
//! Each polled envelope is dispatched on its own task. Disposition rules:
//!
//! | Outcome | Channel | Ledger |
//! |---|---|---|
//! | handler succeeded | delete | key recorded in `processed_envelopes` |
//! | key already processed | delete | - |
//! | unknown `type` | delete | - |
//! | undecodable payload | delete | `dead_letters` |
//! | transient error, attempts left | release with delay | - |
//! | permanent error or attempts exhausted | delete | `dead_letters` |
//! | handler panicked | delete | `dead_letters` |
//!
//! The stop flag is checked once per iteration, so dispatches already running
//! always finish.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::channel::{Delivery, EnvelopeChannel};
use super::envelope::Envelope;
use crate::db::envelopes::{self, NewDeadLetter};
use crate::db::LedgerDb;
use crate::handlers::HandlerRegistry;
use crate::types::{LaurelError, Result};

/// Consumer configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub worker_id: String,
    /// Maximum envelopes received per poll
    pub batch_size: usize,
    /// Long-poll wait per receive
    pub wait_timeout: Duration,
    /// Deliveries allowed before a transient failure is dead-lettered
    pub max_attempts: u32,
    /// Base redelivery delay, multiplied by the attempt number
    pub retry_delay: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            worker_id: uuid::Uuid::new_v4().to_string(),
            batch_size: 10,
            wait_timeout: Duration::from_secs(20),
            max_attempts: 5,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// What happened to one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    Duplicate,
    UnknownType,
    Retried,
    DeadLettered,
}

/// Counts for one poll
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub received: usize,
    pub completed: usize,
    pub duplicates: usize,
    pub unknown: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    /// Dispatch tasks that failed outside the handler (handler panics are dead-lettered)
    pub aborted: usize,
}

impl DispatchReport {
    fn record(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Completed => self.completed += 1,
            Disposition::Duplicate => self.duplicates += 1,
            Disposition::UnknownType => self.unknown += 1,
            Disposition::Retried => self.retried += 1,
            Disposition::DeadLettered => self.dead_lettered += 1,
        }
    }

    /// Accumulate another poll's counts
    pub fn merge(&mut self, other: &DispatchReport) {
        self.received += other.received;
        self.completed += other.completed;
        self.duplicates += other.duplicates;
        self.unknown += other.unknown;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
        self.aborted += other.aborted;
    }
}

/// Shared state for dispatch tasks
struct Dispatcher {
    channel: Arc<dyn EnvelopeChannel>,
    registry: Arc<HandlerRegistry>,
    db: Arc<LedgerDb>,
    config: ConsumerConfig,
}

impl Dispatcher {
    async fn dispatch(&self, delivery: Delivery) -> Disposition {
        let envelope = match Envelope::decode(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(attempt = delivery.attempt, "Undecodable envelope: {}", e);
                return self
                    .dead_letter(&delivery, None, None, &format!("malformed envelope: {}", e))
                    .await;
            }
        };

        let key = envelope.idempotency_key();

        match self.db.with_conn(|conn| envelopes::is_processed(conn, &key)) {
            Ok(true) => {
                debug!(event_type = %envelope.event_type, key = %key, "Duplicate envelope");
                self.delete(&delivery).await;
                return Disposition::Duplicate;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Processed-key lookup failed, releasing envelope: {}", e);
                return self.retry(&delivery).await;
            }
        }

        let Some(handler) = self.registry.get(&envelope.event_type) else {
            warn!(event_type = %envelope.event_type, "No handler for envelope type, discarding");
            self.delete(&delivery).await;
            return Disposition::UnknownType;
        };

        let outcome = match AssertUnwindSafe(handler.handle(&envelope)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(LaurelError::Internal(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = self
                    .db
                    .with_conn(|conn| envelopes::record_processed(conn, &key, &envelope.event_type))
                {
                    warn!(key = %key, "Failed to record processed envelope: {}", e);
                }
                self.delete(&delivery).await;
                debug!(event_type = %envelope.event_type, key = %key, "Envelope handled");
                Disposition::Completed
            }
            Err(e) if e.is_transient() && delivery.attempt < self.config.max_attempts => {
                warn!(
                    event_type = %envelope.event_type,
                    attempt = delivery.attempt,
                    max_attempts = self.config.max_attempts,
                    "Handler failed, will retry: {}",
                    e
                );
                self.retry(&delivery).await
            }
            Err(e) => {
                error!(
                    event_type = %envelope.event_type,
                    attempt = delivery.attempt,
                    transient = e.is_transient(),
                    "Handler failed, dead-lettering: {}",
                    e
                );
                self.dead_letter(
                    &delivery,
                    Some(&key),
                    Some(&envelope.event_type),
                    &e.to_string(),
                )
                .await
            }
        }
    }

    async fn delete(&self, delivery: &Delivery) {
        if let Err(e) = self.channel.delete(delivery).await {
            warn!(handle = delivery.handle, "Failed to delete envelope: {}", e);
        }
    }

    async fn retry(&self, delivery: &Delivery) -> Disposition {
        let delay = self.config.retry_delay * delivery.attempt.max(1);
        if let Err(e) = self.channel.release(delivery, delay).await {
            warn!(handle = delivery.handle, "Failed to release envelope: {}", e);
        }
        Disposition::Retried
    }

    async fn dead_letter(
        &self,
        delivery: &Delivery,
        key: Option<&str>,
        event_type: Option<&str>,
        reason: &str,
    ) -> Disposition {
        let payload = String::from_utf8_lossy(&delivery.payload);
        let recorded = self.db.with_conn(|conn| {
            envelopes::insert_dead_letter(
                conn,
                &NewDeadLetter {
                    idempotency_key: key,
                    event_type,
                    payload: &payload,
                    reason,
                    attempts: delivery.attempt,
                },
            )
        });

        match recorded {
            Ok(id) => {
                info!(dead_letter_id = id, reason, "Envelope moved to dead letters");
                self.delete(delivery).await;
                Disposition::DeadLettered
            }
            Err(e) => {
                // Keep the envelope on the channel rather than lose it
                warn!("Failed to record dead letter, releasing envelope: {}", e);
                self.retry(delivery).await
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Long-poll consumer
pub struct Consumer {
    dispatcher: Arc<Dispatcher>,
    running: Arc<RwLock<bool>>,
}

impl Consumer {
    pub fn new(
        channel: Arc<dyn EnvelopeChannel>,
        registry: Arc<HandlerRegistry>,
        db: Arc<LedgerDb>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher {
                channel,
                registry,
                db,
                config,
            }),
            running: Arc::new(RwLock::new(true)),
        }
    }

    /// Run the polling loop until [`Consumer::stop`] is called
    pub async fn run(&self) -> Result<()> {
        let config = &self.dispatcher.config;
        info!(
            "Consumer {} starting (batch {}, wait {:?}, max attempts {})",
            config.worker_id, config.batch_size, config.wait_timeout, config.max_attempts
        );

        while *self.running.read().await {
            match self.poll_once().await {
                Ok(report) => {
                    if report.received > 0 {
                        debug!(?report, "Processed batch");
                    }
                }
                Err(e) => {
                    error!("Error polling envelopes: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        info!("Consumer {} stopped", config.worker_id);
        Ok(())
    }

    /// Stop after the current iteration; a stopped consumer stays stopped
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Receive one batch, dispatch every envelope concurrently, wait for all of them
    pub async fn poll_once(&self) -> Result<DispatchReport> {
        let config = &self.dispatcher.config;
        let deliveries = self
            .dispatcher
            .channel
            .receive_batch(config.batch_size, config.wait_timeout)
            .await?;

        let mut report = DispatchReport {
            received: deliveries.len(),
            ..Default::default()
        };

        let tasks: Vec<_> = deliveries
            .into_iter()
            .map(|delivery| {
                let dispatcher = self.dispatcher.clone();
                tokio::spawn(async move { dispatcher.dispatch(delivery).await })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            match result {
                Ok(disposition) => report.record(disposition),
                Err(e) => {
                    error!("Dispatch task failed: {}", e);
                    report.aborted += 1;
                }
            }
        }

        Ok(report)
    }
}
