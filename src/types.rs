//! Shared error type for Laurel
//!
//! Every fallible operation in the crate returns [`LaurelError`]. Callers on
//! the request path map it to an HTTP-style status with [`LaurelError::status_code`];
//! the envelope consumer uses [`LaurelError::is_transient`] to decide between
//! redelivery and the dead-letter table.

use thiserror::Error;

/// Laurel error type
#[derive(Error, Debug)]
pub enum LaurelError {
    /// Business rule violation (bad input, rule not met)
    #[error("{0}")]
    Validation(String),

    /// Wallet cannot cover a debit
    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: i64, required: i64 },

    /// State already reached (mission completed, title owned)
    #[error("{0}")]
    Conflict(String),

    /// Requirement, mission, title, wallet or user absent
    #[error("{0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Bug or exhausted bound; retrying the same input fails the same way
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LaurelError {
    /// HTTP-style status for request-path callers
    pub fn status_code(&self) -> u16 {
        match self {
            LaurelError::Validation(_) => 400,
            LaurelError::InsufficientFunds { .. } => 400,
            LaurelError::Serialization(_) => 400,
            LaurelError::NotFound(_) => 404,
            LaurelError::Conflict(_) => 409,
            LaurelError::Mail(_) => 502,
            LaurelError::Nats(_) => 503,
            LaurelError::Database(_) | LaurelError::Config(_) | LaurelError::Internal(_) => 500,
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LaurelError::Database(_) | LaurelError::Nats(_) | LaurelError::Mail(_)
        )
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, LaurelError>;
