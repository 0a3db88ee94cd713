//! In-process envelope channel
//!
//! Same delete/release contract as the JetStream backend, for single-process
//! deployments and tests. Messages live only as long as the process.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use super::channel::{Delivery, EnvelopeChannel};
use crate::types::{LaurelError, Result};

#[derive(Debug, Clone)]
struct Queued {
    payload: Bytes,
    /// Deliveries so far
    attempts: u32,
}

#[derive(Default)]
struct MemoryState {
    ready: VecDeque<Queued>,
    delayed: Vec<(Instant, Queued)>,
    in_flight: HashMap<u64, Queued>,
}

impl MemoryState {
    fn promote_due(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.delayed.len() {
            if self.delayed[i].0 <= now {
                let (_, queued) = self.delayed.swap_remove(i);
                self.ready.push_back(queued);
            } else {
                i += 1;
            }
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.iter().map(|(at, _)| *at).min()
    }
}

/// In-memory channel backed by a queue and an in-flight table
pub struct InMemoryChannel {
    state: Mutex<MemoryState>,
    notify: Notify,
    next_handle: AtomicU64,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            notify: Notify::new(),
            next_handle: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| LaurelError::Internal(format!("Lock poisoned: {}", e)))
    }

    /// Messages waiting for delivery, including delayed ones
    pub fn pending(&self) -> usize {
        self.lock()
            .map(|s| s.ready.len() + s.delayed.len())
            .unwrap_or(0)
    }

    /// Messages delivered but not yet deleted or released
    pub fn in_flight(&self) -> usize {
        self.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    fn take_ready(&self, max: usize) -> Result<(Vec<Delivery>, Option<Instant>)> {
        let mut state = self.lock()?;
        state.promote_due(Instant::now());

        let mut batch = Vec::new();
        while batch.len() < max {
            let Some(mut queued) = state.ready.pop_front() else {
                break;
            };
            queued.attempts += 1;
            let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
            batch.push(Delivery {
                handle,
                payload: queued.payload.clone(),
                attempt: queued.attempts,
            });
            state.in_flight.insert(handle, queued);
        }

        Ok((batch, state.next_due()))
    }
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnvelopeChannel for InMemoryChannel {
    async fn send(&self, payload: Bytes) -> Result<()> {
        self.lock()?.ready.push_back(Queued {
            payload,
            attempts: 0,
        });
        self.notify.notify_one();
        Ok(())
    }

    async fn receive_batch(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>> {
        let deadline = Instant::now() + wait;

        loop {
            let (batch, next_due) = self.take_ready(max.max(1))?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(batch);
            }

            // Wake on a send, on the next delayed message becoming due, or at the deadline
            let wake_at = next_due.map_or(deadline, |due| due.min(deadline));
            let _ = tokio::time::timeout_at(wake_at, self.notify.notified()).await;
        }
    }

    async fn delete(&self, delivery: &Delivery) -> Result<()> {
        if self.lock()?.in_flight.remove(&delivery.handle).is_none() {
            debug!(handle = delivery.handle, "Delete for unknown delivery");
        }
        Ok(())
    }

    async fn release(&self, delivery: &Delivery, delay: Duration) -> Result<()> {
        {
            let mut state = self.lock()?;
            let Some(queued) = state.in_flight.remove(&delivery.handle) else {
                debug!(handle = delivery.handle, "Release for unknown delivery");
                return Ok(());
            };
            if delay.is_zero() {
                state.ready.push_back(queued);
            } else {
                state.delayed.push((Instant::now() + delay, queued));
            }
        }
        self.notify.notify_one();
        Ok(())
    }
}
