//! Wallet ledger service

use std::sync::Arc;

use tracing::debug;

use crate::cache::UserSnapshotCache;
use crate::db::wallets::{self, CreditOutcome};
use crate::db::{LedgerDb, TransactionKind};
use crate::types::{LaurelError, Result};

/// Coin balance mutations for users
pub struct WalletLedger {
    db: Arc<LedgerDb>,
    snapshots: Arc<UserSnapshotCache>,
}

fn require_positive(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(LaurelError::Validation(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

impl WalletLedger {
    pub fn new(db: Arc<LedgerDb>, snapshots: Arc<UserSnapshotCache>) -> Self {
        Self { db, snapshots }
    }

    pub fn balance(&self, user_id: i64) -> Result<i64> {
        self.db
            .with_conn(|conn| wallets::get_balance(conn, user_id))?
            .ok_or_else(|| LaurelError::NotFound(format!("wallet for user {} not found", user_id)))
    }

    /// Credit `amount` coins; returns the new balance
    pub fn add(&self, user_id: i64, amount: i64) -> Result<i64> {
        require_positive(amount)?;
        let balance = self
            .db
            .with_conn_mut(|conn| wallets::add(conn, user_id, amount))?;
        self.snapshots.evict(user_id);
        debug!(user_id, amount, balance, "Wallet credited");
        Ok(balance)
    }

    /// Debit `amount` coins; fails with insufficient funds rather than going negative
    pub fn subtract(&self, user_id: i64, amount: i64) -> Result<i64> {
        require_positive(amount)?;
        let balance = self
            .db
            .with_conn_mut(|conn| wallets::subtract(conn, user_id, amount))?;
        self.snapshots.evict(user_id);
        debug!(user_id, amount, balance, "Wallet debited");
        Ok(balance)
    }

    /// Record a Transaction and credit the wallet, once per `reference`
    pub fn credit_once(
        &self,
        user_id: i64,
        amount: i64,
        description: &str,
        kind: TransactionKind,
        reference: &str,
    ) -> Result<CreditOutcome> {
        require_positive(amount)?;
        let outcome = self.db.with_conn_mut(|conn| {
            wallets::credit_once(conn, user_id, amount, description, kind, reference)
        })?;
        if outcome.applied {
            self.snapshots.evict(user_id);
        }
        Ok(outcome)
    }
}
