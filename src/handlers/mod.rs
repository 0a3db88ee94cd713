//! Reward fulfillment handlers
//!
//! One handler per envelope type, looked up by the consumer through the
//! [`HandlerRegistry`]. Handlers return typed errors; the consumer decides
//! between redelivery and the dead-letter table from
//! [`LaurelError::is_transient`](crate::LaurelError::is_transient).

pub mod mission_reward;
pub mod title_purchase;

pub use mission_reward::MissionRewardHandler;
pub use title_purchase::TitlePurchaseHandler;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::queue::{Envelope, EventType};
use crate::services::Services;
use crate::types::Result;

#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    async fn handle(&self, envelope: &Envelope) -> Result<()>;
}

/// Envelope type to handler map
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EnvelopeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the mission and purchase handlers
    pub fn with_defaults(services: Arc<Services>) -> Self {
        let mut registry = Self::new();
        registry.register(
            EventType::CompleteMission,
            Arc::new(MissionRewardHandler::new(services.clone())),
        );
        registry.register(
            EventType::PurchaseTitle,
            Arc::new(TitlePurchaseHandler::new(services)),
        );
        registry
    }

    pub fn register(&mut self, event_type: EventType, handler: Arc<dyn EnvelopeHandler>) {
        self.handlers.insert(event_type.as_str().to_string(), handler);
    }

    pub fn get(&self, event_type: &str) -> Option<Arc<dyn EnvelopeHandler>> {
        self.handlers.get(event_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
