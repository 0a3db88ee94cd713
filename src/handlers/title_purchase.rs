//! `PurchaseTitle` fulfillment

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use super::EnvelopeHandler;
use crate::db::transactions::{self, NewTransaction};
use crate::db::TransactionKind;
use crate::mail::EmailContent;
use crate::queue::{Envelope, PurchaseTitleBody};
use crate::services::{NotificationKind, Services};
use crate::types::{LaurelError, Result};

/// Records the purchase debit, notifies the buyer and sends the confirmation mail
pub struct TitlePurchaseHandler {
    services: Arc<Services>,
}

impl TitlePurchaseHandler {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl EnvelopeHandler for TitlePurchaseHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<()> {
        let body: PurchaseTitleBody = envelope.body_as()?;
        if body.cost <= 0 {
            return Err(LaurelError::Validation(format!(
                "purchase cost must be positive, got {}",
                body.cost
            )));
        }

        // The wallet was debited on the request path; this only writes the ledger entry
        let recorded = self.services.db.with_conn(|conn| {
            transactions::insert_transaction(
                conn,
                &NewTransaction {
                    amount: -body.cost,
                    description: format!("Purchased title {}", body.title),
                    user_id: body.user_id,
                    kind: TransactionKind::TitlePurchase,
                    reference: Some(format!(
                        "purchase:user:{}:title:{}",
                        body.user_id, body.title_id
                    )),
                },
            )
        })?;
        if recorded.is_none() {
            debug!(user_id = body.user_id, title_id = body.title_id, "Purchase already recorded");
        }

        self.services.notifier.notify(
            body.user_id,
            NotificationKind::TitlePurchased,
            &json!({ "title_id": body.title_id, "title": body.title, "cost": body.cost }),
            Some(&format!("title_purchased:{}:{}", body.user_id, body.title_id)),
        )?;

        let snapshot = self.services.snapshots.get(body.user_id)?;
        match snapshot.email {
            Some(email) => {
                self.services
                    .mailer
                    .send(
                        &email,
                        &EmailContent {
                            subject: format!("You bought the title {}", body.title),
                            template: "title_purchased".to_string(),
                            variables: json!({
                                "title": body.title,
                                "cost": body.cost,
                                "balance": snapshot.balance,
                            }),
                        },
                    )
                    .await?;
            }
            None => debug!(user_id = body.user_id, "No email on file, skipping confirmation"),
        }

        info!(
            user_id = body.user_id,
            title_id = body.title_id,
            cost = body.cost,
            "Title purchase fulfilled"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{titles, users, LedgerDb};
    use crate::mail::{LogMailer, Mailer};
    use crate::queue::{EventType, InMemoryChannel, Producer};
    use crate::services::ServicesConfig;

    /// Mailer whose relay is always down
    struct DownMailer;

    #[async_trait]
    impl Mailer for DownMailer {
        async fn send(&self, _recipient: &str, _content: &EmailContent) -> Result<()> {
            Err(LaurelError::Mail("relay returned 503".into()))
        }
    }

    fn services(mailer: Arc<dyn Mailer>) -> (Arc<Services>, i64) {
        let db = Arc::new(LedgerDb::open_in_memory().unwrap());
        let user = db
            .with_conn_mut(|conn| users::create_user(conn, Some("ada@example.com")))
            .unwrap();
        let services = Services::new(
            db,
            Producer::new(Arc::new(InMemoryChannel::new())),
            mailer,
            ServicesConfig::default(),
        );
        (Arc::new(services), user.id)
    }

    fn purchase_envelope(user_id: i64, title_id: i64) -> Envelope {
        Envelope::new(
            EventType::PurchaseTitle,
            &PurchaseTitleBody {
                user_id,
                title_id,
                cost: 30,
                title: "Patron".into(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_records_notifies_and_mails() {
        let mailer = Arc::new(LogMailer::new());
        let (services, user_id) = services(mailer.clone());
        let title = services
            .db
            .with_conn(|conn| titles::create_title(conn, "Patron", None, Some(30)))
            .unwrap();

        let handler = TitlePurchaseHandler::new(services.clone());
        let envelope = purchase_envelope(user_id, title.id);
        handler.handle(&envelope).await.unwrap();
        handler.handle(&envelope).await.unwrap();

        let ledger = services
            .db
            .with_conn(|conn| transactions::list_for_user(conn, user_id))
            .unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].amount, -30);
        assert_eq!(ledger[0].kind(), Some(TransactionKind::TitlePurchase));

        assert_eq!(services.notifier.list(user_id).unwrap().len(), 1);
        let sent = mailer.sent();
        assert_eq!(sent[0].0, "ada@example.com");
        assert_eq!(sent[0].1.template, "title_purchased");
    }

    #[tokio::test]
    async fn test_mail_outage_is_transient() {
        let (services, user_id) = services(Arc::new(DownMailer));
        let handler = TitlePurchaseHandler::new(services);
        let err = handler
            .handle(&purchase_envelope(user_id, 1))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
