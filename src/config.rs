//! Configuration for the Laurel worker
//!
//! CLI arguments and environment variable handling using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::queue::{ConsumerConfig, JetStreamConfig};
use crate::services::ServicesConfig;

/// Laurel - progress tracking and reward fulfillment worker
#[derive(Parser, Debug, Clone)]
#[command(name = "laurel-worker")]
#[command(about = "Consumes reward envelopes and fulfills titles, coins and experience")]
#[command(version)]
pub struct Args {
    /// SQLite ledger database path
    #[arg(long, env = "DATABASE_PATH", default_value = "laurel.db")]
    pub database_path: PathBuf,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// JetStream stream holding reward envelopes
    #[arg(long, env = "STREAM_NAME", default_value = "LAUREL_REWARDS")]
    pub stream_name: String,

    /// Subject envelopes are published on
    #[arg(long, env = "SUBJECT", default_value = "laurel.rewards")]
    pub subject: String,

    /// Durable consumer name, shared by every worker replica
    #[arg(long, env = "CONSUMER_NAME", default_value = "laurel_rewards_worker")]
    pub consumer_name: String,

    /// Maximum envelopes per poll
    #[arg(long, env = "BATCH_SIZE", default_value = "10")]
    pub batch_size: usize,

    /// Long-poll wait in seconds
    #[arg(long, env = "WAIT_TIMEOUT_SECS", default_value = "20")]
    pub wait_timeout_secs: u64,

    /// Deliveries before a failing envelope is dead-lettered
    #[arg(long, env = "MAX_ATTEMPTS", default_value = "5")]
    pub max_attempts: u32,

    /// Base redelivery delay in milliseconds (multiplied by the attempt number)
    #[arg(long, env = "RETRY_DELAY_MS", default_value = "500")]
    pub retry_delay_ms: u64,

    /// Unique worker ID (auto-generated if not provided)
    #[arg(long, env = "WORKER_ID")]
    pub worker_id: Option<String>,

    /// Experience points per level
    #[arg(long, env = "EXPERIENCE_PER_LEVEL", default_value = "100")]
    pub experience_per_level: i64,

    /// Maximum reward effects applied per envelope
    #[arg(long, env = "EFFECT_BUDGET", default_value = "64")]
    pub effect_budget: usize,

    /// User snapshot cache TTL in seconds
    #[arg(long, env = "SNAPSHOT_TTL_SECS", default_value = "300")]
    pub snapshot_ttl_secs: u64,

    /// Mail relay endpoint; mail is only logged when unset
    #[arg(long, env = "MAIL_API_URL")]
    pub mail_api_url: Option<String>,

    /// Mail relay API key
    #[arg(long, env = "MAIL_API_KEY")]
    pub mail_api_key: Option<String>,

    /// Sender address for outgoing mail
    #[arg(long, env = "MAIL_FROM", default_value = "noreply@laurel.local")]
    pub mail_from: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (text or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("BATCH_SIZE must be at least 1".to_string());
        }
        if self.max_attempts == 0 {
            return Err("MAX_ATTEMPTS must be at least 1".to_string());
        }
        if self.experience_per_level <= 0 {
            return Err("EXPERIENCE_PER_LEVEL must be positive".to_string());
        }
        if self.effect_budget == 0 {
            return Err("EFFECT_BUDGET must be at least 1".to_string());
        }
        if self.nats.nats_user.is_some() != self.nats.nats_password.is_some() {
            return Err("NATS_USER and NATS_PASSWORD must be set together".to_string());
        }
        if !matches!(self.log_format.as_str(), "text" | "json") {
            return Err(format!("LOG_FORMAT must be text or json, got {}", self.log_format));
        }
        Ok(())
    }

    pub fn worker_id(&self) -> String {
        self.worker_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            worker_id: self.worker_id(),
            batch_size: self.batch_size,
            wait_timeout: Duration::from_secs(self.wait_timeout_secs),
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn jetstream_config(&self) -> JetStreamConfig {
        JetStreamConfig {
            stream_name: self.stream_name.clone(),
            subject: self.subject.clone(),
            consumer_name: self.consumer_name.clone(),
            max_ack_pending: (self.batch_size * 4) as i64,
        }
    }

    pub fn services_config(&self) -> ServicesConfig {
        ServicesConfig {
            experience_per_level: self.experience_per_level,
            effect_budget: self.effect_budget,
            snapshot_ttl: Duration::from_secs(self.snapshot_ttl_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["laurel-worker"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults_are_valid() {
        let args = parse(&[]);
        assert!(args.validate().is_ok());
        assert_eq!(args.consumer_config().max_attempts, 5);
        assert_eq!(args.services_config().experience_per_level, 100);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(parse(&["--batch-size", "0"]).validate().is_err());
        assert!(parse(&["--nats-user", "laurel"]).validate().is_err());
        assert!(parse(&["--log-format", "xml"]).validate().is_err());
    }

    #[test]
    fn test_worker_always_consumes_from_nats() {
        // The in-process channel has no producer in a standalone worker
        assert!(Args::try_parse_from(["laurel-worker", "--in-memory-channel"]).is_err());
        assert_eq!(parse(&[]).jetstream_config().stream_name, "LAUREL_REWARDS");
    }

    #[test]
    fn test_worker_id_override() {
        let args = parse(&["--worker-id", "w-1"]);
        assert_eq!(args.consumer_config().worker_id, "w-1");
    }
}
