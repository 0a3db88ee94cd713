//! `CompleteMission` fulfillment

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::EnvelopeHandler;
use crate::db::{missions, TransactionKind};
use crate::queue::{CompleteMissionBody, Envelope};
use crate::services::{NotificationKind, RewardEffect, Services};
use crate::types::{LaurelError, Result};

/// Hands out a completed mission's titles, coins, notification and experience
pub struct MissionRewardHandler {
    services: Arc<Services>,
}

impl MissionRewardHandler {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// Effects for a mission completion, in fulfillment order
    pub fn plan(&self, body: &CompleteMissionBody) -> Result<Vec<RewardEffect>> {
        let CompleteMissionBody {
            user_id,
            mission_id,
        } = *body;

        let mission = self.services.missions.get(mission_id)?;

        let completed = self
            .services
            .db
            .with_conn(|conn| missions::get_user_mission(conn, user_id, mission_id))?
            .is_some_and(|row| row.completed);
        if !completed {
            return Err(LaurelError::Validation(format!(
                "mission {} is not completed by user {}",
                mission_id, user_id
            )));
        }

        let mut effects: Vec<RewardEffect> = self
            .services
            .missions
            .title_rewards(mission_id)?
            .into_iter()
            .map(|title_id| RewardEffect::AwardTitle { user_id, title_id })
            .collect();

        if mission.coins > 0 {
            effects.push(RewardEffect::CreditCoins {
                user_id,
                amount: mission.coins,
                description: format!("Reward for completing mission {}", mission.name),
                kind: TransactionKind::MissionReward,
                reference: format!("mission:{}:user:{}:coins", mission_id, user_id),
            });
        }

        effects.push(RewardEffect::Notify {
            user_id,
            kind: NotificationKind::MissionCompleted,
            data: json!({
                "mission_id": mission_id,
                "mission": mission.name,
                "coins": mission.coins,
                "experience": mission.experience,
            }),
            dedupe_key: format!("mission_completed:{}:{}", user_id, mission_id),
        });

        if mission.experience > 0 {
            effects.push(RewardEffect::AddExperience {
                user_id,
                amount: mission.experience,
                reference: format!("mission:{}:user:{}:experience", mission_id, user_id),
            });
        }

        effects.push(RewardEffect::EvictSnapshot { user_id });
        Ok(effects)
    }
}

#[async_trait]
impl EnvelopeHandler for MissionRewardHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<()> {
        let body: CompleteMissionBody = envelope.body_as()?;
        let effects = self.plan(&body)?;
        let report = self.services.effects.run(effects)?;

        info!(
            user_id = body.user_id,
            mission_id = body.mission_id,
            coins = report.coins_credited,
            titles = ?report.titles_awarded,
            levels = ?report.levels_reached,
            "Mission rewards fulfilled"
        );
        Ok(())
    }
}
