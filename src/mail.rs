//! Outbound mail
//!
//! Two backends behind [`Mailer`]: an HTTP JSON relay and a logging mailer
//! used when no relay is configured.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::{LaurelError, Result};

/// Templated message content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailContent {
    pub subject: String,
    /// Template name known to the relay
    pub template: String,
    pub variables: serde_json::Value,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, recipient: &str, content: &EmailContent) -> Result<()>;
}

/// Relay request body
#[derive(Debug, Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    template: &'a str,
    variables: &'a serde_json::Value,
}

/// Mailer posting JSON to an HTTP relay
pub struct HttpMailer {
    http_client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    from: String,
}

impl HttpMailer {
    pub fn new(api_url: String, api_key: Option<String>, from: String) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| LaurelError::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(api_url = %api_url, "HTTP mailer configured");

        Ok(Self {
            http_client,
            api_url,
            api_key,
            from,
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, recipient: &str, content: &EmailContent) -> Result<()> {
        let mut request = self.http_client.post(&self.api_url).json(&RelayMessage {
            from: &self.from,
            to: recipient,
            subject: &content.subject,
            template: &content.template,
            variables: &content.variables,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LaurelError::Mail(format!("Relay request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LaurelError::Mail(format!(
                "Relay returned {}: {}",
                status, body
            )));
        }

        debug!(template = %content.template, "Mail accepted by relay");
        Ok(())
    }
}

/// Mailer that only logs, keeping what it "sent"
#[derive(Default)]
pub struct LogMailer {
    sent: Mutex<Vec<(String, EmailContent)>>,
}

impl LogMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages passed to this mailer so far
    pub fn sent(&self) -> Vec<(String, EmailContent)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, recipient: &str, content: &EmailContent) -> Result<()> {
        info!(
            to = recipient,
            subject = %content.subject,
            template = %content.template,
            "Mail (log only)"
        );
        self.sent
            .lock()
            .map_err(|e| LaurelError::Internal(format!("Lock poisoned: {}", e)))?
            .push((recipient.to_string(), content.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_log_mailer_records() {
        let mailer = LogMailer::new();
        let content = EmailContent {
            subject: "Title purchased".into(),
            template: "title_purchased".into(),
            variables: json!({"title": "Pathfinder"}),
        };
        mailer.send("ada@example.com", &content).await.unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ada@example.com");
        assert_eq!(sent[0].1, content);
    }

    #[tokio::test]
    async fn test_http_mailer_unreachable_relay_is_mail_error() {
        let mailer = HttpMailer::new(
            "http://127.0.0.1:9/send".into(),
            Some("key".into()),
            "noreply@example.com".into(),
        )
        .unwrap();
        let err = mailer
            .send(
                "ada@example.com",
                &EmailContent {
                    subject: "s".into(),
                    template: "t".into(),
                    variables: json!({}),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LaurelError::Mail(_)));
        assert!(err.is_transient());
    }
}
