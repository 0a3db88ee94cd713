//! Per-user progress records (title and mission variants)

use rusqlite::{params, Connection, OptionalExtension};

use super::models::{ProgressRow, RequirementKind};
use crate::types::{LaurelError, Result};

/// Progress row for (user, requirement), if it exists
pub fn get_progress(
    conn: &Connection,
    kind: RequirementKind,
    user_id: i64,
    requirement_id: i64,
) -> Result<Option<ProgressRow>> {
    let sql = format!(
        "SELECT * FROM {} WHERE user_id = ? AND requirement_id = ?",
        kind.progress_table()
    );
    conn.query_row(&sql, params![user_id, requirement_id], |row| {
        ProgressRow::from_row(kind, row)
    })
    .optional()
    .map_err(|e| LaurelError::Database(format!("Query failed: {}", e)))
}

/// Get-or-create the progress row for (user, requirement)
///
/// The insert is `ON CONFLICT DO NOTHING` against the (user_id, requirement_id)
/// unique key, so concurrent first actions converge on one row.
pub fn get_or_create_progress(
    conn: &Connection,
    kind: RequirementKind,
    user_id: i64,
    requirement_id: i64,
) -> Result<ProgressRow> {
    let sql = format!(
        "INSERT INTO {} (user_id, requirement_id, progress, completed) VALUES (?, ?, 0, 0)
         ON CONFLICT(user_id, requirement_id) DO NOTHING",
        kind.progress_table()
    );
    conn.execute(&sql, params![user_id, requirement_id])
        .map_err(|e| LaurelError::Database(format!("Progress insert failed: {}", e)))?;

    get_progress(conn, kind, user_id, requirement_id)?
        .ok_or_else(|| LaurelError::Internal("Progress not found after insert".to_string()))
}

/// Add `increment` to an incomplete progress row, clamped at `goal`
///
/// Returns the updated row, or `None` when the row was already completed.
/// The clamp and the completion flag are set by the same statement, which
/// only matches rows with `completed = 0`.
pub fn advance_progress(
    conn: &Connection,
    kind: RequirementKind,
    progress_id: i64,
    increment: i64,
    goal: i64,
) -> Result<Option<ProgressRow>> {
    let sql = format!(
        "UPDATE {} SET
            progress = MIN(progress + ?1, ?2),
            completed = CASE WHEN progress + ?1 >= ?2 THEN 1 ELSE 0 END
         WHERE id = ?3 AND completed = 0
         RETURNING *",
        kind.progress_table()
    );
    conn.query_row(&sql, params![increment, goal, progress_id], |row| {
        ProgressRow::from_row(kind, row)
    })
    .optional()
    .map_err(|e| LaurelError::Database(format!("Progress update failed: {}", e)))
}

/// Mark every requirement of a title as satisfied for a user
///
/// Used when a title is awarded directly, so no incomplete rows are left behind.
pub fn satisfy_title_requirements(conn: &Connection, user_id: i64, title_id: i64) -> Result<usize> {
    conn.execute(
        r#"
        INSERT INTO title_progress (user_id, requirement_id, progress, completed)
        SELECT ?1, id, goal, 1 FROM title_requirements WHERE title_id = ?2
        ON CONFLICT(user_id, requirement_id) DO UPDATE SET
            progress = excluded.progress,
            completed = 1
        "#,
        params![user_id, title_id],
    )
    .map_err(|e| LaurelError::Database(format!("Progress backfill failed: {}", e)))
}
