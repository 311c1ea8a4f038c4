use allowance_ledger::{init_logging, initialize_backend, LedgerConfig};
use shared::format_currency;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = LedgerConfig::from_env();
    info!("Opening ledger at {}", config.database_url);
    let ledger = initialize_backend(&config).await?;

    let report = ledger.startup().await?;
    if let Ok(migration) = &report.migration {
        if !migration.is_noop() {
            info!(
                "Migrated {} legacy deductions for {} children",
                migration.transactions_created, migration.children_migrated
            );
        }
    }
    match report.accrual.skipped_reason {
        Some(reason) => info!(?reason, "No weekly allowance granted"),
        None => info!(
            "Granted weekly allowance to {} children, {} in total",
            report.accrual.accrued.len(),
            format_currency(report.accrual.total_accrued())
        ),
    }

    let snapshot = ledger.snapshot().await?;
    info!(
        "{} children, {} transactions",
        snapshot.children.len(),
        snapshot.transactions.len()
    );
    for child in &snapshot.children {
        info!(
            "  {}: balance {}, weekly allowance {}",
            child.name,
            format_currency(child.balance),
            format_currency(child.weekly_allowance)
        );
    }

    Ok(())
}
