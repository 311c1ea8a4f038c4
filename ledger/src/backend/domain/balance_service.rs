//! Balance-moving operations outside the weekly schedule.
//!
//! Each operation reads the child, writes the new balance and appends the
//! matching ledger entry inside a single atomic unit over both collections.

use shared::{Transaction, TransactionType, PAYOUT_DESCRIPTION};
use std::sync::Arc;
use tracing::{debug, info};

use crate::backend::domain::clock::Clock;
use crate::backend::errors::{LedgerError, Result};
use crate::backend::storage::{ChildPatch, Collection, DbConnection};

/// Cached balance of a child compared with what its ledger accounts for.
///
/// The opening balance is not a ledger entry, so the audit reports the
/// opening balance the ledger implies rather than a pass/fail verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceAudit {
    pub child_id: String,
    pub cached_balance: f64,
    pub ledger_total: f64,
    pub transaction_count: usize,
}

impl BalanceAudit {
    pub fn implied_opening_balance(&self) -> f64 {
        self.cached_balance - self.ledger_total
    }
}

#[derive(Clone)]
pub struct BalanceService {
    db: Arc<DbConnection>,
    clock: Arc<dyn Clock>,
}

impl BalanceService {
    pub fn new(db: Arc<DbConnection>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Deduct `amount` from a child's balance. The balance may go negative.
    pub async fn add_deduction(&self, child_id: &str, amount: f64, reason: &str) -> Result<Transaction> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(LedgerError::validation("Deduction amount must be greater than 0"));
        }

        let mut unit = self.db.begin(&Collection::ALL).await?;
        let child = unit
            .get_child(child_id)
            .await?
            .ok_or_else(|| LedgerError::child_not_found(child_id))?;

        let now = self.clock.now_utc();
        let new_balance = child.balance - amount;
        let patch = ChildPatch {
            balance: Some(new_balance),
            ..Default::default()
        };
        let transaction = Transaction::new(child_id, TransactionType::Deduction, amount, reason, now);

        unit.update_child(child_id, &patch, now).await?;
        unit.add_transaction(&transaction).await?;
        unit.commit().await?;

        info!(
            child_id,
            amount,
            new_balance,
            "Deducted ${:.2} from {}: {}",
            amount,
            child.name,
            reason
        );
        Ok(transaction)
    }

    /// Pay out the whole positive balance and reset it to zero.
    ///
    /// Returns `None` without touching the store when the child is gone or has
    /// nothing to pay out.
    pub async fn pay_child(&self, child_id: &str) -> Result<Option<Transaction>> {
        let mut unit = self.db.begin(&Collection::ALL).await?;

        let Some(child) = unit.get_child(child_id).await? else {
            debug!(child_id, "Payout skipped, child not found");
            return Ok(None);
        };

        if child.balance <= 0.0 {
            debug!(child_id, balance = child.balance, "Payout skipped, nothing to pay");
            return Ok(None);
        }

        let now = self.clock.now_utc();
        let patch = ChildPatch {
            balance: Some(0.0),
            ..Default::default()
        };
        let transaction = Transaction::new(
            child_id,
            TransactionType::Payout,
            child.balance,
            PAYOUT_DESCRIPTION,
            now,
        );

        unit.update_child(child_id, &patch, now).await?;
        unit.add_transaction(&transaction).await?;
        unit.commit().await?;

        info!(child_id, amount = child.balance, "Paid out ${:.2} to {}", child.balance, child.name);
        Ok(Some(transaction))
    }

    /// Read a child and its ledger from one consistent snapshot
    pub async fn audit_child(&self, child_id: &str) -> Result<BalanceAudit> {
        let mut unit = self.db.begin(&Collection::ALL).await?;
        let child = unit
            .get_child(child_id)
            .await?
            .ok_or_else(|| LedgerError::child_not_found(child_id))?;
        let transactions = unit.transactions_for_child(child_id).await?;
        unit.commit().await?;

        let ledger_total = shared::ledger_balance(0.0, &transactions);
        Ok(BalanceAudit {
            child_id: child.id,
            cached_balance: child.balance,
            ledger_total,
            transaction_count: transactions.len(),
        })
    }
}
