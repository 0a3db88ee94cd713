//! Experience and levels

use std::sync::Arc;

use tracing::info;

use crate::cache::UserSnapshotCache;
use crate::db::users::{self, ExperienceChange};
use crate::db::{titles, LedgerDb};
use crate::types::{LaurelError, Result};

/// An experience grant and what it unlocked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelProgress {
    pub change: ExperienceChange,
    /// `(level, title_id)` for each level the grant reached that carries a bonus title
    pub bonus_titles: Vec<(i64, i64)>,
}

pub struct ExperienceService {
    db: Arc<LedgerDb>,
    snapshots: Arc<UserSnapshotCache>,
    experience_per_level: i64,
}

impl ExperienceService {
    pub fn new(db: Arc<LedgerDb>, snapshots: Arc<UserSnapshotCache>, experience_per_level: i64) -> Self {
        Self {
            db,
            snapshots,
            experience_per_level,
        }
    }

    pub fn experience_per_level(&self) -> i64 {
        self.experience_per_level
    }

    /// Add experience once per `reference` and report the levels crossed
    ///
    /// Replaying a `reference` adds nothing but reports the same levels and
    /// bonus titles as the first call, so level rewards that failed after the
    /// grant committed are handed out on the retry.
    pub fn add_experience(&self, user_id: i64, amount: i64, reference: &str) -> Result<LevelProgress> {
        if amount <= 0 {
            return Err(LaurelError::Validation(format!(
                "experience amount must be positive, got {}",
                amount
            )));
        }

        let change = self.db.with_conn_mut(|conn| {
            users::grant_experience(conn, user_id, amount, reference, self.experience_per_level)
        })?;

        if change.applied {
            self.snapshots.evict(user_id);
        }

        let bonus_titles = self.db.with_conn(|conn| {
            let mut found = Vec::new();
            for level in change.levels_gained() {
                if let Some(title_id) = titles::level_title(conn, level)? {
                    found.push((level, title_id));
                }
            }
            Ok(found)
        })?;

        if change.applied && change.new_level > change.previous_level {
            info!(
                user_id,
                from = change.previous_level,
                to = change.new_level,
                "User levelled up"
            );
        }

        Ok(LevelProgress {
            change,
            bonus_titles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_bonus_titles_for_crossed_levels() {
        let db = Arc::new(LedgerDb::open_in_memory().unwrap());
        let user = db
            .with_conn_mut(|conn| users::create_user(conn, None))
            .unwrap();
        let (silver, gold) = db
            .with_conn(|conn| {
                let silver = titles::create_title(conn, "Silver", None, None)?;
                let gold = titles::create_title(conn, "Gold", None, None)?;
                titles::set_level_title(conn, 2, silver.id)?;
                titles::set_level_title(conn, 5, gold.id)?;
                Ok((silver, gold))
            })
            .unwrap();

        let snapshots = Arc::new(UserSnapshotCache::new(db.clone(), Duration::from_secs(60)));
        let service = ExperienceService::new(db, snapshots, 100);

        let progress = service.add_experience(user.id, 150, "a").unwrap();
        assert_eq!(progress.change.new_level, 2);
        assert_eq!(progress.bonus_titles, vec![(2, silver.id)]);

        let progress = service.add_experience(user.id, 300, "b").unwrap();
        assert_eq!(progress.change.new_level, 5);
        assert_eq!(progress.bonus_titles, vec![(5, gold.id)]);

        let replay = service.add_experience(user.id, 300, "b").unwrap();
        assert!(!replay.change.applied);
        assert_eq!(replay.change.experience, 450);
        assert_eq!(replay.bonus_titles, vec![(5, gold.id)]);

        assert!(matches!(
            service.add_experience(user.id, 0, "c"),
            Err(LaurelError::Validation(_))
        ));
    }
}
