//! # Backend Module
//!
//! Contains all non-UI logic for the allowance ledger.
//!
//! ## Architecture
//!
//! ```text
//! AllowanceLedger (provider surface)
//!     ↓
//! Domain Layer (balance engine, accrual, migration)
//!     ↓
//! Storage Layer (SQLite collections, atomic units, change stream)
//! ```
//!
//! [`AllowanceLedger`] is what a presentation layer holds: live `children` and
//! `transactions` reads plus every mutating operation. It is cheap to clone.

pub mod config;
pub mod domain;
pub mod errors;
pub mod storage;
pub mod views;

use anyhow::Context;
use shared::{AddChildRequest, ChildProfile, Transaction, UpdateChildRequest};
use std::sync::Arc;
use tracing::{info, warn};

pub use config::LedgerConfig;
pub use domain::*;
pub use errors::{LedgerError, Result};
pub use storage::{Collection, DbConnection, LedgerChange};
pub use views::{LedgerSnapshot, LedgerWatcher};

/// What the startup effects did
#[derive(Debug)]
pub struct StartupReport {
    /// A failed migration is kept here; it does not stop the accrual sweep
    pub migration: Result<MigrationReport>,
    pub accrual: AccrualReport,
}

/// The ledger with all services wired to one store and one clock
#[derive(Clone)]
pub struct AllowanceLedger {
    db: Arc<DbConnection>,
    child_service: ChildService,
    balance_service: BalanceService,
    allowance_service: AllowanceService,
    migration_service: MigrationService,
}

impl AllowanceLedger {
    pub fn new(db: Arc<DbConnection>, clock: Arc<dyn Clock>) -> Self {
        Self {
            child_service: ChildService::new(db.clone(), clock.clone()),
            balance_service: BalanceService::new(db.clone(), clock.clone()),
            allowance_service: AllowanceService::new(db.clone(), clock),
            migration_service: MigrationService::new(db.clone()),
            db,
        }
    }

    pub fn db(&self) -> &Arc<DbConnection> {
        &self.db
    }

    /// All children, ordered by name
    pub async fn children(&self) -> Result<Vec<ChildProfile>> {
        self.child_service.list_children().await
    }

    /// All transactions, newest first
    pub async fn transactions(&self) -> Result<Vec<Transaction>> {
        self.db.list_transactions().await
    }

    pub async fn add_child(&self, request: AddChildRequest) -> Result<ChildProfile> {
        self.child_service.add_child(request).await
    }

    pub async fn update_child(&self, child_id: &str, request: UpdateChildRequest) -> Result<ChildProfile> {
        self.child_service.update_child(child_id, request).await
    }

    pub async fn remove_child(&self, child_id: &str) -> Result<ChildRemoval> {
        self.child_service.remove_child(child_id).await
    }

    pub async fn get_child(&self, child_id: &str) -> Result<Option<ChildProfile>> {
        self.child_service.get_child(child_id).await
    }

    pub async fn update_allowance(&self, child_id: &str, weekly_allowance: f64) -> Result<ChildProfile> {
        self.child_service.update_allowance(child_id, weekly_allowance).await
    }

    pub async fn add_deduction(&self, child_id: &str, amount: f64, reason: &str) -> Result<Transaction> {
        self.balance_service.add_deduction(child_id, amount, reason).await
    }

    pub async fn pay_child(&self, child_id: &str) -> Result<Option<Transaction>> {
        self.balance_service.pay_child(child_id).await
    }

    pub async fn audit_child(&self, child_id: &str) -> Result<BalanceAudit> {
        self.balance_service.audit_child(child_id).await
    }

    pub async fn process_weekly_allowance(&self) -> Result<AccrualReport> {
        self.allowance_service.process_weekly_allowance().await
    }

    pub async fn migrate_legacy_deductions(&self) -> Result<MigrationReport> {
        self.migration_service.migrate_legacy_deductions().await
    }

    /// Startup effects: legacy migration, then the accrual sweep.
    ///
    /// The two are independent. Legacy rows that cannot be migrated stay in
    /// place and are reported, and allowance still accrues.
    pub async fn startup(&self) -> Result<StartupReport> {
        let migration = self.migrate_legacy_deductions().await;
        if let Err(ref e) = migration {
            warn!(error = %e, "Legacy migration failed, legacy deductions left in place");
        }
        let accrual = self.process_weekly_allowance().await?;
        Ok(StartupReport { migration, accrual })
    }

    pub async fn snapshot(&self) -> Result<LedgerSnapshot> {
        LedgerSnapshot::load(&self.db).await
    }

    pub fn watch(&self) -> LedgerWatcher {
        LedgerWatcher::new(self.db.clone())
    }
}

/// Open the configured store and wire the services to the system clock
pub async fn initialize_backend(config: &LedgerConfig) -> anyhow::Result<AllowanceLedger> {
    if let Some(parent) = config.database_file().as_deref().and_then(std::path::Path::parent) {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory {}", parent.display()))?;
        }
    }

    info!("Setting up database");
    let db = DbConnection::init(config).await?;

    info!("Setting up domain services");
    Ok(AllowanceLedger::new(Arc::new(db), Arc::new(SystemClock)))
}
