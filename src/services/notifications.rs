//! Notification service

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{notifications, LedgerDb, NotificationRow};
use crate::types::Result;

/// Notification kinds emitted by the reward pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TitleAchieved,
    MissionCompleted,
    TitlePurchased,
    LevelUp,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::TitleAchieved => "title_achieved",
            NotificationKind::MissionCompleted => "mission_completed",
            NotificationKind::TitlePurchased => "title_purchased",
            NotificationKind::LevelUp => "level_up",
        }
    }
}

pub struct Notifier {
    db: Arc<LedgerDb>,
}

impl Notifier {
    pub fn new(db: Arc<LedgerDb>) -> Self {
        Self { db }
    }

    /// Insert a notification; returns false when `dedupe_key` was already used
    pub fn notify(
        &self,
        user_id: i64,
        kind: NotificationKind,
        data: &serde_json::Value,
        dedupe_key: Option<&str>,
    ) -> Result<bool> {
        let id = self.db.with_conn(|conn| {
            notifications::insert_notification(conn, user_id, kind.as_str(), data, dedupe_key)
        })?;
        match id {
            Some(id) => debug!(user_id, kind = kind.as_str(), id, "Notification created"),
            None => debug!(user_id, kind = kind.as_str(), "Duplicate notification skipped"),
        }
        Ok(id.is_some())
    }

    /// Newest first
    pub fn list(&self, user_id: i64) -> Result<Vec<NotificationRow>> {
        self.db
            .with_conn(|conn| notifications::list_for_user(conn, user_id))
    }
}
