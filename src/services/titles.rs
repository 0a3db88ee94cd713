//! Title service - awarding and purchasing titles

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info};

use super::notifications::{NotificationKind, Notifier};
use super::wallet::WalletLedger;
use crate::cache::UserSnapshotCache;
use crate::db::{titles, LedgerDb, TitleRow};
use crate::types::{LaurelError, Result};

/// Result of an award attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwardOutcome {
    Awarded,
    AlreadyHeld,
}

/// Completed synchronous part of a purchase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseReceipt {
    pub title: TitleRow,
    pub cost: i64,
    pub balance: i64,
}

pub struct TitleService {
    db: Arc<LedgerDb>,
    wallet: Arc<WalletLedger>,
    notifier: Arc<Notifier>,
    snapshots: Arc<UserSnapshotCache>,
}

impl TitleService {
    pub fn new(
        db: Arc<LedgerDb>,
        wallet: Arc<WalletLedger>,
        notifier: Arc<Notifier>,
        snapshots: Arc<UserSnapshotCache>,
    ) -> Self {
        Self {
            db,
            wallet,
            notifier,
            snapshots,
        }
    }

    pub fn get(&self, title_id: i64) -> Result<TitleRow> {
        self.db
            .with_conn(|conn| titles::get_title(conn, title_id))?
            .ok_or_else(|| LaurelError::NotFound(format!("title {} not found", title_id)))
    }

    /// Award a title unless the user already holds it
    ///
    /// A new award back-fills the title's requirement progress and
    /// invalidates the user's snapshot. The `title_achieved` notification is
    /// sent under a dedupe key on every call, so an award whose notification
    /// failed is completed by calling again.
    pub fn award_title_to_user(&self, user_id: i64, title_id: i64) -> Result<AwardOutcome> {
        let awarded = self
            .db
            .with_conn_mut(|conn| titles::award_title(conn, user_id, title_id))?;
        if awarded {
            self.snapshots.evict(user_id);
        }

        let title = self.get(title_id)?;
        self.notifier.notify(
            user_id,
            NotificationKind::TitleAchieved,
            &json!({ "title_id": title.id, "title": title.name }),
            Some(&format!("title_achieved:{}:{}", user_id, title_id)),
        )?;

        if !awarded {
            return Ok(AwardOutcome::AlreadyHeld);
        }
        info!(user_id, title_id, "Title awarded");
        Ok(AwardOutcome::Awarded)
    }

    /// Buy a title: check, debit, award, compensating the debit if the award fails
    pub fn purchase(&self, user_id: i64, title_id: i64) -> Result<PurchaseReceipt> {
        let title = self.get(title_id)?;
        let cost = title.cost.ok_or_else(|| {
            LaurelError::Validation(format!("title {} is not for sale", title.name))
        })?;

        let snapshot = self.snapshots.get(user_id)?;
        if snapshot.titles.contains(&title_id)
            || self
                .db
                .with_conn(|conn| titles::user_has_title(conn, user_id, title_id))?
        {
            return Err(LaurelError::Conflict("title already owned by user".to_string()));
        }
        if snapshot.balance < cost {
            return Err(LaurelError::InsufficientFunds {
                balance: snapshot.balance,
                required: cost,
            });
        }

        let balance = self.wallet.subtract(user_id, cost)?;

        match self
            .db
            .with_conn_mut(|conn| titles::award_title(conn, user_id, title_id))
        {
            Ok(true) => {}
            Ok(false) => {
                // Lost a race with another award of the same title
                self.refund(user_id, cost);
                return Err(LaurelError::Conflict("title already owned by user".to_string()));
            }
            Err(e) => {
                self.refund(user_id, cost);
                return Err(e);
            }
        }
        self.snapshots.evict(user_id);

        info!(user_id, title_id, cost, "Title purchased");
        Ok(PurchaseReceipt {
            title,
            cost,
            balance,
        })
    }

    fn refund(&self, user_id: i64, cost: i64) {
        if let Err(e) = self.wallet.add(user_id, cost) {
            error!(user_id, cost, "Failed to re-credit wallet after purchase failure: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::users;
    use std::time::Duration;

    struct Fixture {
        service: TitleService,
        notifier: Arc<Notifier>,
        wallet: Arc<WalletLedger>,
        db: Arc<LedgerDb>,
        user_id: i64,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(LedgerDb::open_in_memory().unwrap());
        let user = db
            .with_conn_mut(|conn| users::create_user(conn, None))
            .unwrap();
        let snapshots = Arc::new(UserSnapshotCache::new(db.clone(), Duration::from_secs(60)));
        let wallet = Arc::new(WalletLedger::new(db.clone(), snapshots.clone()));
        let notifier = Arc::new(Notifier::new(db.clone()));
        let service = TitleService::new(db.clone(), wallet.clone(), notifier.clone(), snapshots);
        Fixture {
            service,
            notifier,
            wallet,
            db,
            user_id: user.id,
        }
    }

    #[test]
    fn test_award_notifies_once() {
        let f = fixture();
        let title = f
            .db
            .with_conn(|conn| titles::create_title(conn, "Pioneer", None, None))
            .unwrap();

        assert_eq!(
            f.service.award_title_to_user(f.user_id, title.id).unwrap(),
            AwardOutcome::Awarded
        );
        assert_eq!(
            f.service.award_title_to_user(f.user_id, title.id).unwrap(),
            AwardOutcome::AlreadyHeld
        );

        let notes = f.notifier.list(f.user_id).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, "title_achieved");
        assert_eq!(notes[0].data["title"], "Pioneer");
    }

    #[test]
    fn test_notification_is_sent_when_award_is_retried() {
        let f = fixture();
        let title = f
            .db
            .with_conn(|conn| titles::create_title(conn, "Pathfinder", None, None))
            .unwrap();
        f.db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER refuse_notes BEFORE INSERT ON notifications
                 BEGIN SELECT RAISE(ABORT, 'database is locked'); END;",
            )
            .map_err(|e| LaurelError::Database(e.to_string()))
        })
        .unwrap();

        let err = f.service.award_title_to_user(f.user_id, title.id).unwrap_err();
        assert!(err.is_transient());

        f.db.with_conn(|conn| {
            conn.execute_batch("DROP TRIGGER refuse_notes;")
                .map_err(|e| LaurelError::Database(e.to_string()))
        })
        .unwrap();

        assert_eq!(
            f.service.award_title_to_user(f.user_id, title.id).unwrap(),
            AwardOutcome::AlreadyHeld
        );
        let notes = f.notifier.list(f.user_id).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, "title_achieved");
    }

    #[test]
    fn test_purchase_debits_and_awards() {
        let f = fixture();
        let title = f
            .db
            .with_conn(|conn| titles::create_title(conn, "Patron", None, Some(30)))
            .unwrap();
        f.wallet.add(f.user_id, 100).unwrap();

        let receipt = f.service.purchase(f.user_id, title.id).unwrap();
        assert_eq!(receipt.cost, 30);
        assert_eq!(receipt.balance, 70);

        let err = f.service.purchase(f.user_id, title.id).unwrap_err();
        assert!(matches!(err, LaurelError::Conflict(_)));
        assert_eq!(f.wallet.balance(f.user_id).unwrap(), 70);
    }

    #[test]
    fn test_purchase_rejections() {
        let f = fixture();
        let free = f
            .db
            .with_conn(|conn| titles::create_title(conn, "Earned only", None, None))
            .unwrap();
        let pricey = f
            .db
            .with_conn(|conn| titles::create_title(conn, "Gilded", None, Some(500)))
            .unwrap();
        f.wallet.add(f.user_id, 100).unwrap();

        assert!(matches!(
            f.service.purchase(f.user_id, free.id),
            Err(LaurelError::Validation(_))
        ));
        assert!(matches!(
            f.service.purchase(f.user_id, pricey.id),
            Err(LaurelError::InsufficientFunds { balance: 100, required: 500 })
        ));
        assert!(matches!(
            f.service.purchase(f.user_id, 9999),
            Err(LaurelError::NotFound(_))
        ));
        assert_eq!(f.wallet.balance(f.user_id).unwrap(), 100);
    }

    #[test]
    fn test_purchase_compensates_failed_award() {
        let f = fixture();
        let title = f
            .db
            .with_conn(|conn| titles::create_title(conn, "Fragile", None, Some(40)))
            .unwrap();
        f.wallet.add(f.user_id, 100).unwrap();

        // Make the ownership insert fail after the debit has gone through
        f.db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_award BEFORE INSERT ON user_titles
                 BEGIN SELECT RAISE(ABORT, 'award rejected'); END;",
            )
            .map_err(|e| LaurelError::Database(e.to_string()))
        })
        .unwrap();

        let err = f.service.purchase(f.user_id, title.id).unwrap_err();
        assert!(matches!(err, LaurelError::Database(_)));
        assert_eq!(f.wallet.balance(f.user_id).unwrap(), 100);
    }
}
