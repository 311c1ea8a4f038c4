use shared::{AddChildRequest, ChildProfile, UpdateChildRequest};
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::domain::clock::Clock;
use crate::backend::errors::{LedgerError, Result};
use crate::backend::storage::{ChildPatch, Collection, DbConnection};

/// Outcome of removing a child and its ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildRemoval {
    pub child_existed: bool,
    pub transactions_removed: u64,
}

/// Service for the child lifecycle: create, edit, remove
#[derive(Clone)]
pub struct ChildService {
    db: Arc<DbConnection>,
    clock: Arc<dyn Clock>,
}

impl ChildService {
    /// Create a new ChildService
    pub fn new(db: Arc<DbConnection>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Create a new child. The opening balance is not a ledger entry.
    pub async fn add_child(&self, request: AddChildRequest) -> Result<ChildProfile> {
        info!(name = %request.name, weekly_allowance = request.weekly_allowance, "Creating child");

        Self::validate_name(&request.name)?;
        Self::validate_weekly_allowance(request.weekly_allowance)?;
        if !request.initial_balance.is_finite() {
            return Err(LedgerError::validation("Initial balance must be a finite amount"));
        }

        let now = self.clock.now_utc();
        let child = ChildProfile {
            id: ChildProfile::generate_id(),
            name: request.name.trim().to_string(),
            balance: request.initial_balance,
            weekly_allowance: request.weekly_allowance,
            last_allowance_date: now,
            created_at: now,
            updated_at: now,
        };

        let mut unit = self.db.begin(&[Collection::Children]).await?;
        unit.add_child(&child).await?;
        unit.commit().await?;

        info!(child_id = %child.id, "Created child {}", child.name);
        Ok(child)
    }

    /// Merge the supplied fields into a child and refresh `updated_at`.
    ///
    /// A supplied `balance` overwrites the cached balance without a ledger
    /// entry. This is the manual correction path and the one write allowed to
    /// break the balance/ledger correspondence.
    pub async fn update_child(&self, child_id: &str, request: UpdateChildRequest) -> Result<ChildProfile> {
        info!(child_id, "Updating child");

        if let Some(ref name) = request.name {
            Self::validate_name(name)?;
        }
        if let Some(weekly_allowance) = request.weekly_allowance {
            Self::validate_weekly_allowance(weekly_allowance)?;
        }
        if let Some(balance) = request.balance {
            if !balance.is_finite() {
                return Err(LedgerError::validation("Balance must be a finite amount"));
            }
            warn!(child_id, balance, "Overriding balance outside the ledger");
        }

        let patch = ChildPatch {
            name: request.name.map(|name| name.trim().to_string()),
            weekly_allowance: request.weekly_allowance,
            balance: request.balance,
            last_allowance_date: None,
        };

        let mut unit = self.db.begin(&[Collection::Children]).await?;
        unit.update_child(child_id, &patch, self.clock.now_utc()).await?;
        let child = unit
            .get_child(child_id)
            .await?
            .ok_or_else(|| LedgerError::child_not_found(child_id))?;
        unit.commit().await?;

        info!(child_id, "Updated child {}", child.name);
        Ok(child)
    }

    /// Change only the weekly allowance
    pub async fn update_allowance(&self, child_id: &str, weekly_allowance: f64) -> Result<ChildProfile> {
        self.update_child(
            child_id,
            UpdateChildRequest {
                weekly_allowance: Some(weekly_allowance),
                ..Default::default()
            },
        )
        .await
    }

    /// Delete a child together with its whole ledger in one atomic unit.
    /// Safe to repeat: a missing child only sweeps leftover ledger rows.
    pub async fn remove_child(&self, child_id: &str) -> Result<ChildRemoval> {
        info!(child_id, "Removing child");

        let mut unit = self.db.begin(&Collection::ALL).await?;
        let child_existed = unit.delete_child(child_id).await?;
        let transactions_removed = unit.delete_transactions_for_child(child_id).await?;
        unit.commit().await?;

        if child_existed {
            info!(child_id, transactions_removed, "Removed child");
        } else {
            warn!(child_id, transactions_removed, "Child already gone, swept orphaned ledger rows");
        }

        Ok(ChildRemoval {
            child_existed,
            transactions_removed,
        })
    }

    /// Get a child by ID
    pub async fn get_child(&self, child_id: &str) -> Result<Option<ChildProfile>> {
        self.db.get_child(child_id).await
    }

    /// List all children by name
    pub async fn list_children(&self) -> Result<Vec<ChildProfile>> {
        self.db.list_children().await
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(LedgerError::validation("Child name cannot be empty"));
        }
        Ok(())
    }

    fn validate_weekly_allowance(amount: f64) -> Result<()> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(LedgerError::validation(
                "Weekly allowance must be a non-negative amount",
            ));
        }
        Ok(())
    }
}
