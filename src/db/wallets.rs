//! Wallet balance mutations
//!
//! Balances only ever change through single atomic UPDATE statements; nothing
//! here reads a balance and writes it back.

use rusqlite::{params, Connection, OptionalExtension};

use super::models::TransactionKind;
use super::transactions::{insert_transaction, NewTransaction};
use crate::types::{LaurelError, Result};

/// Current balance for a user
pub fn get_balance(conn: &Connection, user_id: i64) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT amount FROM wallets WHERE user_id = ?",
        params![user_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| LaurelError::Database(format!("Query failed: {}", e)))
}

fn wallet_missing(user_id: i64) -> LaurelError {
    LaurelError::NotFound(format!("wallet for user {} not found", user_id))
}

/// `amount = amount + delta` in its own transaction; returns the new balance
pub fn add(conn: &mut Connection, user_id: i64, delta: i64) -> Result<i64> {
    let tx = conn
        .transaction()
        .map_err(|e| LaurelError::Database(format!("Transaction failed: {}", e)))?;

    let balance: Option<i64> = tx
        .query_row(
            "UPDATE wallets SET amount = amount + ? WHERE user_id = ? RETURNING amount",
            params![delta, user_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| LaurelError::Database(format!("Wallet credit failed: {}", e)))?;

    let balance = balance.ok_or_else(|| wallet_missing(user_id))?;

    tx.commit()
        .map_err(|e| LaurelError::Database(format!("Commit failed: {}", e)))?;

    Ok(balance)
}

/// `amount = amount - delta` guarded by `amount >= delta`; returns the new balance
///
/// The guard lives in the same statement as the decrement, so a concurrent
/// debit can never take the balance below zero.
pub fn subtract(conn: &mut Connection, user_id: i64, delta: i64) -> Result<i64> {
    let tx = conn
        .transaction()
        .map_err(|e| LaurelError::Database(format!("Transaction failed: {}", e)))?;

    let balance: Option<i64> = tx
        .query_row(
            "UPDATE wallets SET amount = amount - ?1 WHERE user_id = ?2 AND amount >= ?1 RETURNING amount",
            params![delta, user_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| LaurelError::Database(format!("Wallet debit failed: {}", e)))?;

    let balance = match balance {
        Some(balance) => balance,
        None => {
            // Either no wallet or not enough coins; tell them apart for the caller
            let current = get_balance(&tx, user_id)?.ok_or_else(|| wallet_missing(user_id))?;
            return Err(LaurelError::InsufficientFunds {
                balance: current,
                required: delta,
            });
        }
    };

    tx.commit()
        .map_err(|e| LaurelError::Database(format!("Commit failed: {}", e)))?;

    Ok(balance)
}

/// Result of a reference-keyed credit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditOutcome {
    /// False when the reference had already been credited
    pub applied: bool,
    pub balance: i64,
}

/// Record a credit transaction and apply it, once per `reference`
pub fn credit_once(
    conn: &mut Connection,
    user_id: i64,
    amount: i64,
    description: &str,
    kind: TransactionKind,
    reference: &str,
) -> Result<CreditOutcome> {
    let tx = conn
        .transaction()
        .map_err(|e| LaurelError::Database(format!("Transaction failed: {}", e)))?;

    get_balance(&tx, user_id)?.ok_or_else(|| wallet_missing(user_id))?;

    let inserted = insert_transaction(
        &tx,
        &NewTransaction {
            amount,
            description: description.to_string(),
            user_id,
            kind,
            reference: Some(reference.to_string()),
        },
    )?;

    let balance = if inserted.is_some() {
        tx.query_row(
            "UPDATE wallets SET amount = amount + ? WHERE user_id = ? RETURNING amount",
            params![amount, user_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| LaurelError::Database(format!("Wallet credit failed: {}", e)))?
        .ok_or_else(|| wallet_missing(user_id))?
    } else {
        get_balance(&tx, user_id)?.ok_or_else(|| wallet_missing(user_id))?
    };

    tx.commit()
        .map_err(|e| LaurelError::Database(format!("Commit failed: {}", e)))?;

    Ok(CreditOutcome {
        applied: inserted.is_some(),
        balance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_schema;
    use crate::db::users::create_user;

    fn conn_with_user() -> (Connection, i64) {
        let mut conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let user = create_user(&mut conn, None).unwrap();
        (conn, user.id)
    }

    #[test]
    fn test_add_and_subtract() {
        let (mut conn, user_id) = conn_with_user();
        assert_eq!(add(&mut conn, user_id, 1000).unwrap(), 1000);
        assert_eq!(subtract(&mut conn, user_id, 50).unwrap(), 950);
        assert_eq!(get_balance(&conn, user_id).unwrap(), Some(950));
    }

    #[test]
    fn test_subtract_never_goes_negative() {
        let (mut conn, user_id) = conn_with_user();
        add(&mut conn, user_id, 30).unwrap();

        let err = subtract(&mut conn, user_id, 31).unwrap_err();
        match err {
            LaurelError::InsufficientFunds { balance, required } => {
                assert_eq!(balance, 30);
                assert_eq!(required, 31);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(get_balance(&conn, user_id).unwrap(), Some(30));
    }

    #[test]
    fn test_missing_wallet_is_not_found() {
        let (mut conn, _) = conn_with_user();
        assert!(matches!(add(&mut conn, 999, 1), Err(LaurelError::NotFound(_))));
        assert!(matches!(subtract(&mut conn, 999, 1), Err(LaurelError::NotFound(_))));
    }

    #[test]
    fn test_credit_once_is_idempotent() {
        let (mut conn, user_id) = conn_with_user();
        let first = credit_once(
            &mut conn,
            user_id,
            10,
            "Mission reward",
            TransactionKind::MissionReward,
            "mission:5:user:1:coins",
        )
        .unwrap();
        assert!(first.applied);
        assert_eq!(first.balance, 10);

        let second = credit_once(
            &mut conn,
            user_id,
            10,
            "Mission reward",
            TransactionKind::MissionReward,
            "mission:5:user:1:coins",
        )
        .unwrap();
        assert!(!second.applied);
        assert_eq!(second.balance, 10);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
