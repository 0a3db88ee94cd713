//! Reward effects and the bounded runner that applies them
//!
//! Fulfillment handlers describe what to hand out as a list of
//! [`RewardEffect`]s. Applying an effect may produce follow-up effects
//! (experience crossing a level yields a bonus title and a `level_up`
//! notification); those run next, ahead of the rest of the queue. The total
//! number of effects applied per run is capped by the budget, so a
//! misconfigured cascade fails with an error instead of looping.

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use super::experience::ExperienceService;
use super::notifications::{NotificationKind, Notifier};
use super::titles::{AwardOutcome, TitleService};
use super::wallet::WalletLedger;
use crate::cache::UserSnapshotCache;
use crate::db::TransactionKind;
use crate::types::{LaurelError, Result};

/// One unit of reward fulfillment
#[derive(Debug, Clone, PartialEq)]
pub enum RewardEffect {
    AwardTitle {
        user_id: i64,
        title_id: i64,
    },
    CreditCoins {
        user_id: i64,
        amount: i64,
        description: String,
        kind: TransactionKind,
        reference: String,
    },
    AddExperience {
        user_id: i64,
        amount: i64,
        reference: String,
    },
    Notify {
        user_id: i64,
        kind: NotificationKind,
        data: serde_json::Value,
        dedupe_key: String,
    },
    EvictSnapshot {
        user_id: i64,
    },
}

/// Totals for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectReport {
    pub applied: usize,
    pub titles_awarded: Vec<i64>,
    pub coins_credited: i64,
    pub levels_reached: Vec<i64>,
}

pub struct EffectRunner {
    titles: Arc<TitleService>,
    wallet: Arc<WalletLedger>,
    experience: Arc<ExperienceService>,
    notifier: Arc<Notifier>,
    snapshots: Arc<UserSnapshotCache>,
    budget: usize,
}

impl EffectRunner {
    pub fn new(
        titles: Arc<TitleService>,
        wallet: Arc<WalletLedger>,
        experience: Arc<ExperienceService>,
        notifier: Arc<Notifier>,
        snapshots: Arc<UserSnapshotCache>,
        budget: usize,
    ) -> Self {
        Self {
            titles,
            wallet,
            experience,
            notifier,
            snapshots,
            budget,
        }
    }

    /// Apply effects in order, follow-ups first; stops at the first error
    pub fn run(&self, effects: Vec<RewardEffect>) -> Result<EffectReport> {
        let mut queue: VecDeque<RewardEffect> = effects.into();
        let mut report = EffectReport::default();

        while let Some(effect) = queue.pop_front() {
            if report.applied >= self.budget {
                warn!(
                    budget = self.budget,
                    remaining = queue.len() + 1,
                    "Reward effect budget exhausted"
                );
                return Err(LaurelError::Internal(format!(
                    "reward effect budget of {} exhausted",
                    self.budget
                )));
            }

            let follow_ups = self.apply(&effect, &mut report)?;
            report.applied += 1;

            for next in follow_ups.into_iter().rev() {
                queue.push_front(next);
            }
        }

        Ok(report)
    }

    fn apply(&self, effect: &RewardEffect, report: &mut EffectReport) -> Result<Vec<RewardEffect>> {
        debug!(?effect, "Applying reward effect");

        match effect {
            RewardEffect::AwardTitle { user_id, title_id } => {
                if self.titles.award_title_to_user(*user_id, *title_id)? == AwardOutcome::Awarded {
                    report.titles_awarded.push(*title_id);
                }
                Ok(Vec::new())
            }
            RewardEffect::CreditCoins {
                user_id,
                amount,
                description,
                kind,
                reference,
            } => {
                let outcome =
                    self.wallet
                        .credit_once(*user_id, *amount, description, *kind, reference)?;
                if outcome.applied {
                    report.coins_credited += amount;
                }
                Ok(Vec::new())
            }
            RewardEffect::AddExperience {
                user_id,
                amount,
                reference,
            } => {
                let progress = self.experience.add_experience(*user_id, *amount, reference)?;

                // Follow-ups are derived from the stored grant, so a replay re-emits them
                let mut follow_ups = Vec::new();
                for level in progress.change.levels_gained() {
                    if progress.change.applied {
                        report.levels_reached.push(level);
                    }
                    if let Some((_, title_id)) =
                        progress.bonus_titles.iter().find(|(l, _)| *l == level)
                    {
                        follow_ups.push(RewardEffect::AwardTitle {
                            user_id: *user_id,
                            title_id: *title_id,
                        });
                    }
                    follow_ups.push(RewardEffect::Notify {
                        user_id: *user_id,
                        kind: NotificationKind::LevelUp,
                        data: json!({ "level": level }),
                        dedupe_key: format!("level_up:{}:{}", user_id, level),
                    });
                }
                Ok(follow_ups)
            }
            RewardEffect::Notify {
                user_id,
                kind,
                data,
                dedupe_key,
            } => {
                self.notifier
                    .notify(*user_id, *kind, data, Some(dedupe_key.as_str()))?;
                Ok(Vec::new())
            }
            RewardEffect::EvictSnapshot { user_id } => {
                self.snapshots.evict(*user_id);
                Ok(Vec::new())
            }
        }
    }
}
