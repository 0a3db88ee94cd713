//! Service layer for Laurel
//!
//! Services wrap the row-level `db` functions with input validation, snapshot
//! invalidation, notifications and cross-entity orchestration.
//!
//! ## Architecture
//!
//! ```text
//! Request path                      Consumer
//!     ↓                                ↓
//! Services (validate, commit)      Handlers (fulfill)
//!     ↓           ↓                    ↓
//!     ↓       Producer ──channel──►  EffectRunner
//!     ↓                                ↓
//! Row functions (db/*.rs) ◄────────────┘
//!     ↓
//! SQLite
//! ```

pub mod effects;
pub mod experience;
pub mod missions;
pub mod notifications;
pub mod progress;
pub mod titles;
pub mod wallet;

pub use effects::{EffectReport, EffectRunner, RewardEffect};
pub use experience::{ExperienceService, LevelProgress};
pub use missions::MissionValidator;
pub use notifications::{NotificationKind, Notifier};
pub use progress::{ProgressReport, ProgressTracker};
pub use titles::{AwardOutcome, PurchaseReceipt, TitleService};
pub use wallet::WalletLedger;

use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::cache::UserSnapshotCache;
use crate::db::{LedgerDb, UserMissionRow};
use crate::mail::Mailer;
use crate::queue::{CompleteMissionBody, EventType, Producer, PurchaseTitleBody};
use crate::types::Result;

/// Reward tuning shared by the services
#[derive(Debug, Clone)]
pub struct ServicesConfig {
    pub experience_per_level: i64,
    /// Maximum reward effects applied per fulfillment
    pub effect_budget: usize,
    pub snapshot_ttl: Duration,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            experience_per_level: 100,
            effect_budget: 64,
            snapshot_ttl: Duration::from_secs(300),
        }
    }
}

/// Service container for dependency injection
///
/// Holds every service over one shared database handle. Handlers and
/// request-path callers take an `Arc<Services>`.
pub struct Services {
    pub db: Arc<LedgerDb>,
    pub snapshots: Arc<UserSnapshotCache>,
    pub wallet: Arc<WalletLedger>,
    pub notifier: Arc<Notifier>,
    pub titles: Arc<TitleService>,
    pub experience: Arc<ExperienceService>,
    pub progress: Arc<ProgressTracker>,
    pub missions: Arc<MissionValidator>,
    pub effects: Arc<EffectRunner>,
    pub mailer: Arc<dyn Mailer>,
    producer: Producer,
}

impl Services {
    pub fn new(
        db: Arc<LedgerDb>,
        producer: Producer,
        mailer: Arc<dyn Mailer>,
        config: ServicesConfig,
    ) -> Self {
        let snapshots = Arc::new(UserSnapshotCache::new(db.clone(), config.snapshot_ttl));
        let wallet = Arc::new(WalletLedger::new(db.clone(), snapshots.clone()));
        let notifier = Arc::new(Notifier::new(db.clone()));
        let titles = Arc::new(TitleService::new(
            db.clone(),
            wallet.clone(),
            notifier.clone(),
            snapshots.clone(),
        ));
        let experience = Arc::new(ExperienceService::new(
            db.clone(),
            snapshots.clone(),
            config.experience_per_level,
        ));
        let progress = Arc::new(ProgressTracker::new(db.clone(), titles.clone()));
        let missions = Arc::new(MissionValidator::new(db.clone()));
        let effects = Arc::new(EffectRunner::new(
            titles.clone(),
            wallet.clone(),
            experience.clone(),
            notifier.clone(),
            snapshots.clone(),
            config.effect_budget,
        ));

        Self {
            db,
            snapshots,
            wallet,
            notifier,
            titles,
            experience,
            progress,
            missions,
            effects,
            mailer,
            producer,
        }
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    // =========================================================================
    // Request-path operations
    // =========================================================================

    /// Validate and commit a mission completion, then enqueue its fulfillment
    ///
    /// If the enqueue fails the completion stays committed and the error is
    /// returned; the rewards have to be re-enqueued by the caller.
    pub async fn complete_mission(&self, user_id: i64, mission_id: i64) -> Result<UserMissionRow> {
        let row = self.missions.complete_mission(user_id, mission_id)?;

        self.producer
            .enqueue(
                EventType::CompleteMission,
                &CompleteMissionBody {
                    user_id,
                    mission_id,
                },
            )
            .await
            .map_err(|e| {
                error!(user_id, mission_id, "Mission completed but reward enqueue failed: {}", e);
                e
            })?;

        Ok(row)
    }

    /// Buy a title, then enqueue the purchase follow-up (ledger entry, notification, mail)
    pub async fn purchase_title(&self, user_id: i64, title_id: i64) -> Result<PurchaseReceipt> {
        let receipt = self.titles.purchase(user_id, title_id)?;

        self.producer
            .enqueue(
                EventType::PurchaseTitle,
                &PurchaseTitleBody {
                    user_id,
                    title_id,
                    cost: receipt.cost,
                    title: receipt.title.name.clone(),
                },
            )
            .await
            .map_err(|e| {
                error!(user_id, title_id, "Title purchased but follow-up enqueue failed: {}", e);
                e
            })?;

        Ok(receipt)
    }
}
