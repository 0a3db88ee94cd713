//! User rows: registration seed, lookup, experience and level

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use super::models::UserRow;
use super::now_rfc3339;
use crate::types::{LaurelError, Result};

/// Create a user together with their empty wallet
///
/// Registration itself belongs to the account service; this exists so the
/// ledger can be seeded and tested on its own.
pub fn create_user(conn: &mut Connection, email: Option<&str>) -> Result<UserRow> {
    let tx = conn
        .transaction()
        .map_err(|e| LaurelError::Database(format!("Transaction failed: {}", e)))?;

    tx.execute("INSERT INTO users (email) VALUES (?)", params![email])
        .map_err(|e| LaurelError::Database(format!("User insert failed: {}", e)))?;
    let user_id = tx.last_insert_rowid();

    tx.execute(
        "INSERT INTO wallets (user_id, amount) VALUES (?, 0)",
        params![user_id],
    )
    .map_err(|e| LaurelError::Database(format!("Wallet insert failed: {}", e)))?;

    tx.commit()
        .map_err(|e| LaurelError::Database(format!("Commit failed: {}", e)))?;

    debug!(user_id, "Created user with wallet");

    get_user(conn, user_id)?
        .ok_or_else(|| LaurelError::Internal("User not found after insert".to_string()))
}

/// Get a user by id
pub fn get_user(conn: &Connection, user_id: i64) -> Result<Option<UserRow>> {
    conn.query_row(
        "SELECT id, email, experience, level FROM users WHERE id = ?",
        params![user_id],
        |row| UserRow::from_row(row),
    )
    .optional()
    .map_err(|e| LaurelError::Database(format!("Query failed: {}", e)))
}

/// Level reached with `experience` points on a linear curve starting at level 1
pub fn level_for_experience(experience: i64, experience_per_level: i64) -> i64 {
    if experience_per_level <= 0 {
        return 1;
    }
    1 + experience.max(0) / experience_per_level
}

/// Outcome of an experience grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperienceChange {
    pub user_id: i64,
    /// False when `reference` had already been granted
    pub applied: bool,
    pub experience: i64,
    /// Level before the grant was first applied
    pub previous_level: i64,
    /// Level right after the grant was first applied
    pub new_level: i64,
}

impl ExperienceChange {
    /// Levels reached by this grant, lowest first
    ///
    /// A replayed grant reports the same levels as its first application.
    pub fn levels_gained(&self) -> std::ops::RangeInclusive<i64> {
        (self.previous_level + 1)..=self.new_level
    }
}

/// Add experience once per `reference` and move the stored level forward
///
/// The increment is a single `experience = experience + ?` update; the level
/// never decreases even if the curve changes between grants. The grant row
/// keeps the levels it crossed, so a replay can re-derive its level rewards.
pub fn grant_experience(
    conn: &mut Connection,
    user_id: i64,
    amount: i64,
    reference: &str,
    experience_per_level: i64,
) -> Result<ExperienceChange> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| LaurelError::Database(format!("Transaction failed: {}", e)))?;

    let user = get_user(&tx, user_id)?
        .ok_or_else(|| LaurelError::NotFound(format!("user {} not found", user_id)))?;

    let granted: Option<(i64, i64)> = tx
        .query_row(
            "SELECT level_before, level_after FROM experience_grants WHERE reference = ?",
            params![reference],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|e| LaurelError::Database(format!("Experience grant lookup failed: {}", e)))?;

    if let Some((level_before, level_after)) = granted {
        tx.commit()
            .map_err(|e| LaurelError::Database(format!("Commit failed: {}", e)))?;
        debug!(user_id, reference, "Experience grant already applied");
        return Ok(ExperienceChange {
            user_id,
            applied: false,
            experience: user.experience,
            previous_level: level_before,
            new_level: level_after,
        });
    }

    let experience: i64 = tx
        .query_row(
            "UPDATE users SET experience = experience + ? WHERE id = ? RETURNING experience",
            params![amount, user_id],
            |row| row.get(0),
        )
        .map_err(|e| LaurelError::Database(format!("Experience update failed: {}", e)))?;

    let new_level = level_for_experience(experience, experience_per_level).max(user.level);
    if new_level != user.level {
        tx.execute(
            "UPDATE users SET level = ? WHERE id = ?",
            params![new_level, user_id],
        )
        .map_err(|e| LaurelError::Database(format!("Level update failed: {}", e)))?;
    }

    tx.execute(
        "INSERT INTO experience_grants (reference, user_id, amount, level_before, level_after, granted_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![reference, user_id, amount, user.level, new_level, now_rfc3339()],
    )
    .map_err(|e| LaurelError::Database(format!("Experience grant insert failed: {}", e)))?;

    tx.commit()
        .map_err(|e| LaurelError::Database(format!("Commit failed: {}", e)))?;

    Ok(ExperienceChange {
        user_id,
        applied: true,
        experience,
        previous_level: user.level,
        new_level,
    })
}
