//! Read side: consistent snapshots of both collections and a watcher that
//! re-materializes them after every commit.

use shared::{ChildProfile, Transaction};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::backend::errors::Result;
use crate::backend::storage::{Collection, DbConnection, LedgerChange};

/// Children by name and transactions newest first, read in one unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerSnapshot {
    pub children: Vec<ChildProfile>,
    pub transactions: Vec<Transaction>,
}

impl LedgerSnapshot {
    pub async fn load(db: &DbConnection) -> Result<Self> {
        let mut unit = db.begin(&Collection::ALL).await?;
        let children = unit.list_children().await?;
        let transactions = unit.list_transactions().await?;
        unit.commit().await?;
        Ok(Self { children, transactions })
    }

    pub fn child(&self, child_id: &str) -> Option<&ChildProfile> {
        self.children.iter().find(|child| child.id == child_id)
    }

    pub fn transactions_for<'a>(&'a self, child_id: &'a str) -> impl Iterator<Item = &'a Transaction> + 'a {
        self.transactions.iter().filter(move |t| t.child_id == child_id)
    }
}

/// Live view over the ledger.
///
/// Delivery is coalescing: several commits between two calls to
/// [`LedgerWatcher::changed`] produce one snapshot reflecting all of them.
pub struct LedgerWatcher {
    db: Arc<DbConnection>,
    changes: broadcast::Receiver<LedgerChange>,
}

impl LedgerWatcher {
    pub fn new(db: Arc<DbConnection>) -> Self {
        let changes = db.subscribe();
        Self { db, changes }
    }

    /// Wait for the next commit and return the state after it.
    ///
    /// Returns `None` if the change channel is closed. The watcher keeps the
    /// store alive, so this only happens for a receiver whose sender is gone.
    pub async fn changed(&mut self) -> Result<Option<LedgerSnapshot>> {
        match self.changes.recv().await {
            Ok(change) => debug!(?change, "Ledger changed"),
            Err(RecvError::Lagged(missed)) => warn!(missed, "Ledger watcher lagged, reloading"),
            Err(RecvError::Closed) => return Ok(None),
        }

        // Fold anything already queued into this reload
        loop {
            match self.changes.try_recv() {
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }

        LedgerSnapshot::load(&self.db).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::domain::{BalanceService, ChildService, FixedClock};
    use chrono::{FixedOffset, TimeZone};
    use shared::AddChildRequest;

    async fn setup_test() -> (Arc<DbConnection>, ChildService, BalanceService) {
        let db = Arc::new(DbConnection::init_in_memory().await.unwrap());
        let offset = FixedOffset::east_opt(0).unwrap();
        let clock = Arc::new(FixedClock::new(offset.with_ymd_and_hms(2024, 3, 6, 18, 30, 0).unwrap()));
        let children = ChildService::new(db.clone(), clock.clone());
        let balances = BalanceService::new(db.clone(), clock);
        (db, children, balances)
    }

    #[tokio::test]
    async fn test_snapshot_of_empty_ledger() {
        let (db, _, _) = setup_test().await;
        let snapshot = LedgerSnapshot::load(&db).await.unwrap();
        assert_eq!(snapshot, LedgerSnapshot::default());
    }

    #[tokio::test]
    async fn test_snapshot_lookups() {
        let (db, children, balances) = setup_test().await;
        let alice = children.add_child(AddChildRequest::new("Alice", 10.0)).await.unwrap();
        let bob = children.add_child(AddChildRequest::new("Bob", 5.0)).await.unwrap();
        balances.add_deduction(&alice.id, 1.0, "snack").await.unwrap();

        let snapshot = LedgerSnapshot::load(&db).await.unwrap();
        assert_eq!(snapshot.children.len(), 2);
        assert_eq!(snapshot.child(&bob.id).map(|c| c.name.as_str()), Some("Bob"));
        assert!(snapshot.child("missing").is_none());
        assert_eq!(snapshot.transactions_for(&alice.id).count(), 1);
        assert_eq!(snapshot.transactions_for(&bob.id).count(), 0);
    }

    #[tokio::test]
    async fn test_watcher_sees_committed_state() {
        let (db, children, balances) = setup_test().await;
        let mut watcher = LedgerWatcher::new(db.clone());

        let alice = children
            .add_child(AddChildRequest::new("Alice", 10.0).with_initial_balance(5.0))
            .await
            .unwrap();
        let snapshot = watcher.changed().await.unwrap().unwrap();
        assert_eq!(snapshot.children, vec![alice.clone()]);

        // Two commits collapse into one reload
        balances.add_deduction(&alice.id, 2.0, "candy").await.unwrap();
        balances.pay_child(&alice.id).await.unwrap();
        let snapshot = watcher.changed().await.unwrap().unwrap();
        assert_eq!(snapshot.transactions.len(), 2);
        assert_eq!(snapshot.child(&alice.id).unwrap().balance, 0.0);
    }

    #[tokio::test]
    async fn test_watcher_ends_when_channel_closes() {
        let (db, _, _) = setup_test().await;
        let (sender, changes) = broadcast::channel::<LedgerChange>(1);
        drop(sender);

        let mut watcher = LedgerWatcher { db, changes };
        assert!(watcher.changed().await.unwrap().is_none());
    }
}
