//! Append-only transaction ledger

use rusqlite::{params, Connection};

use super::models::{TransactionKind, TransactionRow};
use super::now_rfc3339;
use crate::types::{LaurelError, Result};

/// Input for a ledger entry
#[derive(Debug, Clone)]
pub struct NewTransaction {
    /// Signed: credits positive, debits negative
    pub amount: i64,
    pub description: String,
    pub user_id: i64,
    pub kind: TransactionKind,
    /// Natural key; a second insert with the same reference is a no-op
    pub reference: Option<String>,
}

/// Insert a ledger entry; `None` when its reference was already recorded
pub fn insert_transaction(conn: &Connection, input: &NewTransaction) -> Result<Option<i64>> {
    let inserted = conn
        .execute(
            r#"
            INSERT INTO transactions (amount, description, user_id, transaction_type_id, reference, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(reference) DO NOTHING
            "#,
            params![
                input.amount,
                input.description,
                input.user_id,
                input.kind.type_id(),
                input.reference,
                now_rfc3339(),
            ],
        )
        .map_err(|e| LaurelError::Database(format!("Transaction insert failed: {}", e)))?;

    if inserted == 0 {
        Ok(None)
    } else {
        Ok(Some(conn.last_insert_rowid()))
    }
}

/// All ledger entries for a user, oldest first
pub fn list_for_user(conn: &Connection, user_id: i64) -> Result<Vec<TransactionRow>> {
    let mut stmt = conn
        .prepare("SELECT * FROM transactions WHERE user_id = ? ORDER BY id")
        .map_err(|e| LaurelError::Database(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map(params![user_id], |row| TransactionRow::from_row(row))
        .map_err(|e| LaurelError::Database(format!("Query failed: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| LaurelError::Database(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_schema;
    use crate::db::users::create_user;

    #[test]
    fn test_reference_dedupes_but_null_does_not() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let user = create_user(&mut conn, None).unwrap();

        let keyed = NewTransaction {
            amount: -40,
            description: "Purchased title Pathfinder".to_string(),
            user_id: user.id,
            kind: TransactionKind::TitlePurchase,
            reference: Some("purchase:1:3".to_string()),
        };
        assert!(insert_transaction(&conn, &keyed).unwrap().is_some());
        assert!(insert_transaction(&conn, &keyed).unwrap().is_none());

        let unkeyed = NewTransaction {
            reference: None,
            ..keyed.clone()
        };
        assert!(insert_transaction(&conn, &unkeyed).unwrap().is_some());
        assert!(insert_transaction(&conn, &unkeyed).unwrap().is_some());

        let rows = list_for_user(&conn, user.id).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].kind(), Some(TransactionKind::TitlePurchase));
        assert_eq!(rows[0].amount, -40);
    }
}
