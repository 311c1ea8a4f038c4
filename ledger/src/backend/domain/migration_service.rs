//! Conversion of pre-ledger child records into ledger transactions.
//!
//! Older versions stored deductions as a list embedded in each child. The
//! migration copies every embedded entry into the transactions collection and
//! strips the list, all in one atomic unit, so an interrupted run leaves the
//! store either untouched or fully migrated.

use shared::{LegacyDeduction, Transaction, TransactionType};
use std::sync::Arc;
use tracing::{debug, info};

use crate::backend::errors::{LedgerError, Result};
use crate::backend::storage::{Collection, DbConnection};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub children_migrated: usize,
    pub transactions_created: usize,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.children_migrated == 0
    }
}

#[derive(Clone)]
pub struct MigrationService {
    db: Arc<DbConnection>,
}

impl MigrationService {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    /// Move embedded deductions into the ledger. Safe to run on every startup.
    ///
    /// Balances are left alone: embedded deductions were already reflected in
    /// the cached balance when they were recorded.
    pub async fn migrate_legacy_deductions(&self) -> Result<MigrationReport> {
        let mut unit = self.db.begin(&Collection::ALL).await?;
        let legacy = unit.legacy_deductions().await?;

        if legacy.is_empty() {
            debug!("No legacy deductions to migrate");
            unit.rollback().await?;
            return Ok(MigrationReport::default());
        }

        let mut transactions = Vec::new();
        for (child_id, deductions) in &legacy {
            for deduction in deductions {
                transactions.push(Self::to_transaction(child_id, deduction)?);
            }
        }

        unit.add_transactions(&transactions).await?;
        for (child_id, _) in &legacy {
            unit.clear_legacy_deductions(child_id).await?;
        }
        unit.commit().await?;

        let report = MigrationReport {
            children_migrated: legacy.len(),
            transactions_created: transactions.len(),
        };
        info!(
            children = report.children_migrated,
            transactions = report.transactions_created,
            "Migrated legacy deductions to transactions"
        );
        Ok(report)
    }

    fn to_transaction(child_id: &str, deduction: &LegacyDeduction) -> Result<Transaction> {
        if !deduction.amount.is_finite() || deduction.amount < 0.0 {
            return Err(LedgerError::Corrupt(format!(
                "legacy deduction of child {} has invalid amount {}",
                child_id, deduction.amount
            )));
        }
        // Legacy ids are not reused; they were only unique per child
        Ok(Transaction::new(
            child_id,
            TransactionType::Deduction,
            deduction.amount,
            &deduction.reason,
            deduction.date,
        ))
    }
}
