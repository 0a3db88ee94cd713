//! Progress tracker for title and mission requirements

use std::sync::Arc;

use tracing::debug;

use super::titles::{AwardOutcome, TitleService};
use crate::db::{progress, requirements, titles, users, LedgerDb, ProgressRow, RequirementKind};
use crate::types::{LaurelError, Result};

/// What one tracked action changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressReport {
    /// Progress rows that moved, after the update
    pub advanced: Vec<ProgressRow>,
    /// Requirement ids completed by this call
    pub completed: Vec<i64>,
    /// Titles newly awarded by this call
    pub titles_awarded: Vec<i64>,
}

pub struct ProgressTracker {
    db: Arc<LedgerDb>,
    titles: Arc<TitleService>,
}

impl ProgressTracker {
    pub fn new(db: Arc<LedgerDb>, titles: Arc<TitleService>) -> Self {
        Self { db, titles }
    }

    /// Advance title requirements matching `action_key`, awarding titles they complete
    pub fn track_title_progress(
        &self,
        user_id: i64,
        action_key: &str,
        increment: i64,
    ) -> Result<ProgressReport> {
        self.track(RequirementKind::Title, user_id, action_key, increment)
    }

    /// Advance mission requirements matching `action_key`
    pub fn track_mission_progress(
        &self,
        user_id: i64,
        action_key: &str,
        increment: i64,
    ) -> Result<ProgressReport> {
        self.track(RequirementKind::Mission, user_id, action_key, increment)
    }

    fn track(
        &self,
        kind: RequirementKind,
        user_id: i64,
        action_key: &str,
        increment: i64,
    ) -> Result<ProgressReport> {
        if increment <= 0 {
            return Err(LaurelError::Validation(format!(
                "increment must be positive, got {}",
                increment
            )));
        }

        let requirements = self.db.with_conn(|conn| {
            if users::get_user(conn, user_id)?.is_none() {
                return Err(LaurelError::NotFound(format!("user {} not found", user_id)));
            }
            requirements::list_by_action_key(conn, kind, action_key)
        })?;

        let mut report = ProgressReport::default();

        // Each requirement commits on its own; a failure leaves earlier ones in place
        for requirement in requirements {
            let (advanced, already_completed) = self.db.with_conn(|conn| {
                let row = progress::get_or_create_progress(conn, kind, user_id, requirement.id)?;
                if row.completed {
                    return Ok((None, true));
                }
                let advanced =
                    progress::advance_progress(conn, kind, row.id, increment, requirement.goal)?;
                Ok((advanced, false))
            })?;

            if already_completed {
                // A completion whose award failed earlier is awarded now
                if kind == RequirementKind::Title
                    && !self.db.with_conn(|conn| {
                        titles::user_has_title(conn, user_id, requirement.owner_id)
                    })?
                {
                    debug!(
                        user_id,
                        requirement_id = requirement.id,
                        title_id = requirement.owner_id,
                        "Completed requirement without its title, awarding"
                    );
                    if self.titles.award_title_to_user(user_id, requirement.owner_id)?
                        == AwardOutcome::Awarded
                    {
                        report.titles_awarded.push(requirement.owner_id);
                    }
                }
                continue;
            }

            let Some(row) = advanced else {
                continue;
            };

            debug!(
                user_id,
                kind = kind.as_str(),
                requirement_id = requirement.id,
                progress = row.progress,
                goal = requirement.goal,
                "Requirement progressed"
            );

            if row.completed {
                report.completed.push(requirement.id);
                if kind == RequirementKind::Title
                    && self.titles.award_title_to_user(user_id, requirement.owner_id)?
                        == AwardOutcome::Awarded
                {
                    report.titles_awarded.push(requirement.owner_id);
                }
            }
            report.advanced.push(row);
        }

        Ok(report)
    }
}
