//! All-or-nothing units of work spanning one or more collections.

use chrono::{DateTime, Utc};
use shared::{ChildProfile, LegacyDeduction, Transaction};
use sqlx::{Sqlite, SqlitePool};
use std::collections::BTreeSet;
use tokio::sync::{broadcast, OwnedMutexGuard};
use tracing::debug;

use crate::backend::errors::{LedgerError, Result};
use crate::backend::storage::queries::{self, ChildPatch};
use crate::backend::storage::{Collection, LedgerChange};

/// An open atomic unit over a declared set of collections.
///
/// Reads and writes go through one SQLite transaction. Nothing is visible to
/// other readers until [`AtomicUnit::commit`]; dropping the unit without
/// committing rolls every write back.
///
/// A unit holds the connection's write gate from begin to commit, so units
/// run one after another and a read-modify-write never races another writer.
pub struct AtomicUnit {
    // Declared before the gate: the rollback is queued before the next unit may start
    tx: sqlx::Transaction<'static, Sqlite>,
    gate: OwnedMutexGuard<()>,
    scope: BTreeSet<Collection>,
    written: BTreeSet<Collection>,
    changes: broadcast::Sender<LedgerChange>,
}

impl AtomicUnit {
    pub(crate) async fn begin(
        pool: &SqlitePool,
        scope: &[Collection],
        changes: broadcast::Sender<LedgerChange>,
        gate: OwnedMutexGuard<()>,
    ) -> Result<Self> {
        let tx = pool.begin().await?;
        Ok(Self {
            tx,
            gate,
            scope: scope.iter().copied().collect(),
            written: BTreeSet::new(),
            changes,
        })
    }

    fn check_scope(&self, collection: Collection) -> Result<()> {
        if self.scope.contains(&collection) {
            Ok(())
        } else {
            Err(LedgerError::UndeclaredCollection(collection))
        }
    }

    fn mark_written(&mut self, collection: Collection) {
        self.written.insert(collection);
    }

    pub async fn get_child(&mut self, child_id: &str) -> Result<Option<ChildProfile>> {
        self.check_scope(Collection::Children)?;
        queries::fetch_child(&mut *self.tx, child_id).await
    }

    pub async fn list_children(&mut self) -> Result<Vec<ChildProfile>> {
        self.check_scope(Collection::Children)?;
        queries::fetch_children(&mut *self.tx).await
    }

    pub async fn add_child(&mut self, child: &ChildProfile) -> Result<()> {
        self.check_scope(Collection::Children)?;
        queries::insert_child(&mut *self.tx, child).await?;
        self.mark_written(Collection::Children);
        Ok(())
    }

    pub async fn update_child(
        &mut self,
        child_id: &str,
        patch: &ChildPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.check_scope(Collection::Children)?;
        queries::patch_child(&mut *self.tx, child_id, patch, &updated_at).await?;
        self.mark_written(Collection::Children);
        Ok(())
    }

    /// No-op when the child does not exist
    pub async fn delete_child(&mut self, child_id: &str) -> Result<bool> {
        self.check_scope(Collection::Children)?;
        let deleted = queries::remove_child(&mut *self.tx, child_id).await?;
        if deleted {
            self.mark_written(Collection::Children);
        }
        Ok(deleted)
    }

    pub async fn legacy_deductions(&mut self) -> Result<Vec<(String, Vec<LegacyDeduction>)>> {
        self.check_scope(Collection::Children)?;
        queries::fetch_legacy_deductions(&mut *self.tx).await
    }

    pub async fn clear_legacy_deductions(&mut self, child_id: &str) -> Result<()> {
        self.check_scope(Collection::Children)?;
        queries::clear_legacy_deductions(&mut *self.tx, child_id).await?;
        self.mark_written(Collection::Children);
        Ok(())
    }

    pub async fn list_transactions(&mut self) -> Result<Vec<Transaction>> {
        self.check_scope(Collection::Transactions)?;
        queries::fetch_transactions(&mut *self.tx).await
    }

    pub async fn transactions_for_child(&mut self, child_id: &str) -> Result<Vec<Transaction>> {
        self.check_scope(Collection::Transactions)?;
        queries::fetch_transactions_for_child(&mut *self.tx, child_id).await
    }

    pub async fn add_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        self.check_scope(Collection::Transactions)?;
        queries::insert_transaction(&mut *self.tx, transaction).await?;
        self.mark_written(Collection::Transactions);
        Ok(())
    }

    pub async fn add_transactions(&mut self, transactions: &[Transaction]) -> Result<()> {
        for transaction in transactions {
            self.add_transaction(transaction).await?;
        }
        Ok(())
    }

    pub async fn delete_transactions_for_child(&mut self, child_id: &str) -> Result<u64> {
        self.check_scope(Collection::Transactions)?;
        let deleted = queries::remove_transactions_for_child(&mut *self.tx, child_id).await?;
        if deleted > 0 {
            self.mark_written(Collection::Transactions);
        }
        Ok(deleted)
    }

    /// Make every write durable, then notify subscribers
    pub async fn commit(self) -> Result<()> {
        let Self {
            tx,
            gate,
            written,
            changes,
            ..
        } = self;

        tx.commit().await?;
        drop(gate);

        if !written.is_empty() {
            let change = LedgerChange {
                collections: written.into_iter().collect(),
            };
            debug!(?change, "Committed atomic unit");
            // No subscribers is not an error
            let _ = changes.send(change);
        }
        Ok(())
    }

    /// Discard every write made in this unit
    pub async fn rollback(self) -> Result<()> {
        let Self { tx, gate, .. } = self;
        tx.rollback().await?;
        drop(gate);
        Ok(())
    }
}
