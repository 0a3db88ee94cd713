//! Mission completion validator

use std::sync::Arc;

use tracing::{debug, info};

use crate::db::{missions, LedgerDb, MissionRow, UserMissionRow};
use crate::types::{LaurelError, Result};

pub struct MissionValidator {
    db: Arc<LedgerDb>,
}

impl MissionValidator {
    pub fn new(db: Arc<LedgerDb>) -> Self {
        Self { db }
    }

    pub fn get(&self, mission_id: i64) -> Result<MissionRow> {
        self.db
            .with_conn(|conn| missions::get_mission(conn, mission_id))?
            .ok_or_else(|| LaurelError::NotFound(format!("mission {} not found", mission_id)))
    }

    /// Title rewards attached to a mission
    pub fn title_rewards(&self, mission_id: i64) -> Result<Vec<i64>> {
        self.db
            .with_conn(|conn| missions::list_title_rewards(conn, mission_id))
    }

    /// Check every completion rule and mark the mission completed, all in one transaction
    ///
    /// No rewards are handed out here.
    pub fn complete_mission(&self, user_id: i64, mission_id: i64) -> Result<UserMissionRow> {
        match self
            .db
            .with_conn_mut(|conn| missions::complete_mission(conn, user_id, mission_id))
        {
            Ok(row) => {
                info!(user_id, mission_id, "Mission completed");
                Ok(row)
            }
            Err(e) => {
                debug!(user_id, mission_id, "Mission completion rejected: {}", e);
                Err(e)
            }
        }
    }
}
