//! Allowance ledger: per-child balances backed by a transaction ledger,
//! weekly allowance accrual, deductions, payouts and legacy data migration.

pub mod backend;

pub use backend::{
    initialize_backend, AccrualReport, AllowanceLedger, BalanceAudit, Clock, FixedClock, LedgerChange,
    LedgerConfig, LedgerError, LedgerSnapshot, LedgerWatcher, MigrationReport, StartupReport, SystemClock,
};

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber, honouring `RUST_LOG` and defaulting to `info`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
