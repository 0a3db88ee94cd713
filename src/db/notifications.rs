//! User notifications

use rusqlite::{params, Connection};

use super::models::NotificationRow;
use super::now_rfc3339;
use crate::types::{LaurelError, Result};

/// Insert a notification; `None` when `dedupe_key` was already used
pub fn insert_notification(
    conn: &Connection,
    user_id: i64,
    kind: &str,
    data: &serde_json::Value,
    dedupe_key: Option<&str>,
) -> Result<Option<i64>> {
    let inserted = conn
        .execute(
            r#"
            INSERT INTO notifications (type, data, user_id, dedupe_key, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(dedupe_key) DO NOTHING
            "#,
            params![kind, data, user_id, dedupe_key, now_rfc3339()],
        )
        .map_err(|e| LaurelError::Database(format!("Notification insert failed: {}", e)))?;

    if inserted == 0 {
        Ok(None)
    } else {
        Ok(Some(conn.last_insert_rowid()))
    }
}

/// Notifications for a user, newest first
pub fn list_for_user(conn: &Connection, user_id: i64) -> Result<Vec<NotificationRow>> {
    let mut stmt = conn
        .prepare("SELECT * FROM notifications WHERE user_id = ? ORDER BY id DESC")
        .map_err(|e| LaurelError::Database(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map(params![user_id], |row| NotificationRow::from_row(row))
        .map_err(|e| LaurelError::Database(format!("Query failed: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| LaurelError::Database(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}
