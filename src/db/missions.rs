//! Missions, assignments, per-user completion and mission rewards

use rusqlite::{params, Connection, OptionalExtension};

use super::models::{MissionRow, MissionStatus, UserMissionRow};
use super::now_rfc3339;
use crate::types::{LaurelError, Result};

/// Mission definition input (catalog data, used for seeding)
#[derive(Debug, Clone)]
pub struct NewMission {
    pub name: String,
    pub for_all: bool,
    pub status: MissionStatus,
    pub coins: i64,
    pub experience: i64,
}

impl NewMission {
    pub fn active(name: impl Into<String>, coins: i64, experience: i64) -> Self {
        Self {
            name: name.into(),
            for_all: true,
            status: MissionStatus::Active,
            coins,
            experience,
        }
    }
}

pub fn create_mission(conn: &Connection, input: &NewMission) -> Result<MissionRow> {
    if input.coins < 0 || input.experience < 0 {
        return Err(LaurelError::Validation(
            "mission rewards must not be negative".to_string(),
        ));
    }

    conn.execute(
        "INSERT INTO missions (name, for_all, status, coins, experience) VALUES (?, ?, ?, ?, ?)",
        params![
            input.name,
            input.for_all,
            input.status.as_str(),
            input.coins,
            input.experience
        ],
    )
    .map_err(|e| LaurelError::Database(format!("Mission insert failed: {}", e)))?;

    Ok(MissionRow {
        id: conn.last_insert_rowid(),
        name: input.name.clone(),
        for_all: input.for_all,
        status: input.status,
        coins: input.coins,
        experience: input.experience,
    })
}

pub fn get_mission(conn: &Connection, mission_id: i64) -> Result<Option<MissionRow>> {
    conn.query_row(
        "SELECT * FROM missions WHERE id = ?",
        params![mission_id],
        |row| MissionRow::from_row(row),
    )
    .optional()
    .map_err(|e| LaurelError::Database(format!("Query failed: {}", e)))
}

pub fn set_mission_status(conn: &Connection, mission_id: i64, status: MissionStatus) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE missions SET status = ? WHERE id = ?",
            params![status.as_str(), mission_id],
        )
        .map_err(|e| LaurelError::Database(format!("Mission update failed: {}", e)))?;
    if updated == 0 {
        return Err(LaurelError::NotFound(format!(
            "mission {} not found",
            mission_id
        )));
    }
    Ok(())
}

/// Assign a targeted (non `for_all`) mission to a user
pub fn assign_mission(conn: &Connection, user_id: i64, mission_id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO mission_assignments (user_id, mission_id) VALUES (?, ?)
         ON CONFLICT(user_id, mission_id) DO NOTHING",
        params![user_id, mission_id],
    )
    .map_err(|e| LaurelError::Database(format!("Assignment insert failed: {}", e)))?;
    Ok(())
}

pub fn is_assigned(conn: &Connection, user_id: i64, mission_id: i64) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM mission_assignments WHERE user_id = ? AND mission_id = ?",
            params![user_id, mission_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| LaurelError::Database(format!("Query failed: {}", e)))?;
    Ok(found.is_some())
}

/// Attach a title-type reward to a mission
pub fn add_title_reward(conn: &Connection, mission_id: i64, title_id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO mission_title_rewards (mission_id, title_id) VALUES (?, ?)
         ON CONFLICT(mission_id, title_id) DO NOTHING",
        params![mission_id, title_id],
    )
    .map_err(|e| LaurelError::Database(format!("Mission reward insert failed: {}", e)))?;
    Ok(())
}

pub fn list_title_rewards(conn: &Connection, mission_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn
        .prepare("SELECT title_id FROM mission_title_rewards WHERE mission_id = ? ORDER BY title_id")
        .map_err(|e| LaurelError::Database(format!("Prepare failed: {}", e)))?;

    let ids = stmt
        .query_map(params![mission_id], |row| row.get(0))
        .map_err(|e| LaurelError::Database(format!("Query failed: {}", e)))?
        .collect::<std::result::Result<Vec<i64>, _>>()
        .map_err(|e| LaurelError::Database(format!("Row parse failed: {}", e)))?;

    Ok(ids)
}

pub fn get_user_mission(
    conn: &Connection,
    user_id: i64,
    mission_id: i64,
) -> Result<Option<UserMissionRow>> {
    conn.query_row(
        "SELECT * FROM user_missions WHERE user_id = ? AND mission_id = ?",
        params![user_id, mission_id],
        |row| UserMissionRow::from_row(row),
    )
    .optional()
    .map_err(|e| LaurelError::Database(format!("Query failed: {}", e)))
}

pub fn get_or_create_user_mission(
    conn: &Connection,
    user_id: i64,
    mission_id: i64,
) -> Result<UserMissionRow> {
    conn.execute(
        "INSERT INTO user_missions (user_id, mission_id, completed) VALUES (?, ?, 0)
         ON CONFLICT(user_id, mission_id) DO NOTHING",
        params![user_id, mission_id],
    )
    .map_err(|e| LaurelError::Database(format!("User mission insert failed: {}", e)))?;

    get_user_mission(conn, user_id, mission_id)?
        .ok_or_else(|| LaurelError::Internal("User mission not found after insert".to_string()))
}

/// Number of the mission's requirements the user has not completed
///
/// Requirements with no progress row count as incomplete.
pub fn count_incomplete_requirements(
    conn: &Connection,
    user_id: i64,
    mission_id: i64,
) -> Result<i64> {
    conn.query_row(
        r#"
        SELECT COUNT(*) FROM mission_requirements r
        LEFT JOIN mission_progress p ON p.requirement_id = r.id AND p.user_id = ?1
        WHERE r.mission_id = ?2 AND COALESCE(p.completed, 0) = 0
        "#,
        params![user_id, mission_id],
        |row| row.get(0),
    )
    .map_err(|e| LaurelError::Database(format!("Query failed: {}", e)))
}

/// Validate and mark a mission completed for a user, in one transaction
///
/// Nothing is written unless every check passes. The final flip only matches
/// an incomplete row, so a concurrent completion that got there first is
/// reported as already completed.
pub fn complete_mission(
    conn: &mut Connection,
    user_id: i64,
    mission_id: i64,
) -> Result<UserMissionRow> {
    let tx = conn
        .transaction()
        .map_err(|e| LaurelError::Database(format!("Transaction failed: {}", e)))?;

    let mission = get_mission(&tx, mission_id)?
        .filter(|m| m.status.is_available())
        .ok_or_else(|| LaurelError::NotFound("mission not found or unavailable".to_string()))?;

    if !mission.for_all && !is_assigned(&tx, user_id, mission_id)? {
        return Err(LaurelError::Validation(
            "user is not assigned to this mission".to_string(),
        ));
    }

    let user_mission = get_or_create_user_mission(&tx, user_id, mission_id)?;
    if user_mission.completed {
        return Err(LaurelError::Conflict(
            "mission already completed by user".to_string(),
        ));
    }

    if count_incomplete_requirements(&tx, user_id, mission_id)? > 0 {
        return Err(LaurelError::Validation(
            "mission requirements not yet fully completed".to_string(),
        ));
    }

    let completed = tx
        .query_row(
            "UPDATE user_missions SET completed = 1, last_completed_at = ?
             WHERE id = ? AND completed = 0
             RETURNING *",
            params![now_rfc3339(), user_mission.id],
            |row| UserMissionRow::from_row(row),
        )
        .optional()
        .map_err(|e| LaurelError::Database(format!("User mission update failed: {}", e)))?
        .ok_or_else(|| LaurelError::Conflict("mission already completed by user".to_string()))?;

    tx.commit()
        .map_err(|e| LaurelError::Database(format!("Commit failed: {}", e)))?;

    Ok(completed)
}
