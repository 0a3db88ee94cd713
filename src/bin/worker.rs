//! Laurel Worker - reward fulfillment consumer
//!
//! Polls the reward envelope channel and runs the mission-reward and
//! title-purchase handlers against the ledger database. Producers are other
//! processes publishing to the same JetStream stream; a single-process
//! deployment embeds `Consumer` next to its request path on an
//! `InMemoryChannel` instead of running this binary.
//!
//! Usage:
//!   laurel-worker --database-path ./laurel.db --nats-url nats://localhost:4222
//!
//! Environment variables:
//!   DATABASE_PATH - SQLite ledger path (default: laurel.db)
//!   NATS_URL - NATS server URL (default: nats://127.0.0.1:4222)
//!   BATCH_SIZE - Envelopes per poll (default: 10)
//!   MAX_ATTEMPTS - Deliveries before dead-lettering (default: 5)
//!   MAIL_API_URL - Mail relay endpoint (mail is logged when unset)
//!   LOG_LEVEL / LOG_FORMAT - Logging (default: info / text)

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use laurel::config::Args;
use laurel::db::LedgerDb;
use laurel::handlers::HandlerRegistry;
use laurel::mail::{HttpMailer, LogMailer, Mailer};
use laurel::queue::{Consumer, EnvelopeChannel, JetStreamChannel, Producer};
use laurel::Services;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("laurel={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let consumer_config = args.consumer_config();
    info!("======================================");
    info!("  Laurel - reward fulfillment worker");
    info!("======================================");
    info!("Worker ID: {}", consumer_config.worker_id);
    info!("Database: {}", args.database_path.display());
    info!("Channel: JetStream {} on {}", args.stream_name, args.nats.nats_url);
    info!("======================================");

    let db = Arc::new(
        LedgerDb::open(&args.database_path)
            .with_context(|| format!("opening {}", args.database_path.display()))?,
    );

    let channel: Arc<dyn EnvelopeChannel> = Arc::new(
        JetStreamChannel::connect(
            &args.nats,
            &args.jetstream_config(),
            &format!("laurel-worker-{}", consumer_config.worker_id),
        )
        .await
        .context("connecting to NATS JetStream")?,
    );

    let mailer: Arc<dyn Mailer> = match &args.mail_api_url {
        Some(url) => Arc::new(HttpMailer::new(
            url.clone(),
            args.mail_api_key.clone(),
            args.mail_from.clone(),
        )?),
        None => {
            info!("MAIL_API_URL not set, mail will only be logged");
            Arc::new(LogMailer::new())
        }
    };

    let services = Arc::new(Services::new(
        db.clone(),
        Producer::new(channel.clone()),
        mailer,
        args.services_config(),
    ));
    let registry = Arc::new(HandlerRegistry::with_defaults(services));
    info!("Registered {} envelope handlers", registry.len());

    let consumer = Arc::new(Consumer::new(channel, registry, db.clone(), consumer_config));

    let runner = consumer.clone();
    let mut consumer_handle = tokio::spawn(async move { runner.run().await });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            consumer.stop().await;
            match consumer_handle.await {
                Ok(Err(e)) => error!("Consumer error: {}", e),
                Err(e) => error!("Consumer task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        result = &mut consumer_handle => {
            match result {
                Ok(Err(e)) => error!("Consumer error: {}", e),
                Err(e) => error!("Consumer task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
    }

    match db.stats() {
        Ok(stats) => info!(?stats, "Worker shutting down"),
        Err(e) => error!("Failed to read ledger stats: {}", e),
    }
    Ok(())
}
