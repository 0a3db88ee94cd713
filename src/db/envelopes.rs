//! Consumer bookkeeping: processed idempotency keys and dead letters

use rusqlite::{params, Connection, OptionalExtension};

use super::models::DeadLetterRow;
use super::now_rfc3339;
use crate::types::{LaurelError, Result};

pub fn is_processed(conn: &Connection, idempotency_key: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM processed_envelopes WHERE idempotency_key = ?",
            params![idempotency_key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| LaurelError::Database(format!("Query failed: {}", e)))?;
    Ok(found.is_some())
}

/// Remember a handled envelope; returns false if it was already recorded
pub fn record_processed(conn: &Connection, idempotency_key: &str, event_type: &str) -> Result<bool> {
    let inserted = conn
        .execute(
            "INSERT INTO processed_envelopes (idempotency_key, event_type, processed_at)
             VALUES (?, ?, ?)
             ON CONFLICT(idempotency_key) DO NOTHING",
            params![idempotency_key, event_type, now_rfc3339()],
        )
        .map_err(|e| LaurelError::Database(format!("Processed insert failed: {}", e)))?;
    Ok(inserted > 0)
}

/// Dead letter input
#[derive(Debug, Clone)]
pub struct NewDeadLetter<'a> {
    pub idempotency_key: Option<&'a str>,
    pub event_type: Option<&'a str>,
    pub payload: &'a str,
    pub reason: &'a str,
    pub attempts: u32,
}

pub fn insert_dead_letter(conn: &Connection, input: &NewDeadLetter<'_>) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO dead_letters (idempotency_key, event_type, payload, reason, attempts, dead_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
        params![
            input.idempotency_key,
            input.event_type,
            input.payload,
            input.reason,
            input.attempts,
            now_rfc3339()
        ],
    )
    .map_err(|e| LaurelError::Database(format!("Dead letter insert failed: {}", e)))?;
    Ok(conn.last_insert_rowid())
}

/// Dead letters, newest first
pub fn list_dead_letters(conn: &Connection, limit: usize) -> Result<Vec<DeadLetterRow>> {
    let mut stmt = conn
        .prepare("SELECT * FROM dead_letters ORDER BY id DESC LIMIT ?")
        .map_err(|e| LaurelError::Database(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map(params![limit as i64], |row| DeadLetterRow::from_row(row))
        .map_err(|e| LaurelError::Database(format!("Query failed: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| LaurelError::Database(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_schema;

    #[test]
    fn test_processed_keys() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        assert!(!is_processed(&conn, "abc").unwrap());
        assert!(record_processed(&conn, "abc", "CompleteMission").unwrap());
        assert!(!record_processed(&conn, "abc", "CompleteMission").unwrap());
        assert!(is_processed(&conn, "abc").unwrap());
    }

    #[test]
    fn test_dead_letters() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        insert_dead_letter(
            &conn,
            &NewDeadLetter {
                idempotency_key: None,
                event_type: None,
                payload: "not json",
                reason: "malformed envelope",
                attempts: 1,
            },
        )
        .unwrap();
        insert_dead_letter(
            &conn,
            &NewDeadLetter {
                idempotency_key: Some("k"),
                event_type: Some("PurchaseTitle"),
                payload: "{}",
                reason: "Mail error: relay down",
                attempts: 5,
            },
        )
        .unwrap();

        let rows = list_dead_letters(&conn, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].event_type.as_deref(), Some("PurchaseTitle"));
        assert_eq!(rows[0].attempts, 5);
        assert_eq!(rows[1].payload, "not json");
    }
}
