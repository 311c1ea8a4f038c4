//! SQL statements and row mapping shared by plain reads and atomic units.
//!
//! Every function is generic over the sqlx executor so the same query runs
//! against the pool or inside an open transaction.

use chrono::{DateTime, SecondsFormat, Utc};
use shared::{ChildProfile, LegacyDeduction, Transaction, TransactionType};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

use crate::backend::errors::{LedgerError, Result};
use crate::backend::storage::Collection;

const CHILD_COLUMNS: &str =
    "id, name, balance, weekly_allowance, last_allowance_date, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, child_id, type, amount, description, date";

/// Fields of a child that may change after creation.
///
/// `updated_at` is deliberately absent: it is a required argument of every
/// child update so a balance can never move without a timestamp refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChildPatch {
    pub name: Option<String>,
    pub weekly_allowance: Option<f64>,
    pub balance: Option<f64>,
    pub last_allowance_date: Option<DateTime<Utc>>,
}

/// Fixed-width UTC encoding, so string order in SQL is chronological order
pub fn encode_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn decode_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|e| LedgerError::Corrupt(format!("invalid timestamp '{}': {}", value, e)))
}

fn child_from_row(row: &SqliteRow) -> Result<ChildProfile> {
    Ok(ChildProfile {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        balance: row.try_get("balance")?,
        weekly_allowance: row.try_get("weekly_allowance")?,
        last_allowance_date: decode_timestamp(&row.try_get::<String, _>("last_allowance_date")?)?,
        created_at: decode_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: decode_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn transaction_from_row(row: &SqliteRow) -> Result<Transaction> {
    let transaction_type: TransactionType = row
        .try_get::<String, _>("type")?
        .parse()
        .map_err(|e: shared::TransactionTypeError| LedgerError::Corrupt(e.to_string()))?;

    Ok(Transaction {
        id: row.try_get("id")?,
        child_id: row.try_get("child_id")?,
        transaction_type,
        amount: row.try_get("amount")?,
        description: row.try_get("description")?,
        date: decode_timestamp(&row.try_get::<String, _>("date")?)?,
    })
}

fn map_insert_error(err: sqlx::Error, collection: Collection, id: &str) -> LedgerError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => LedgerError::DuplicateKey {
            collection,
            id: id.to_string(),
        },
        _ => LedgerError::StoreUnavailable(err),
    }
}

pub async fn fetch_child<'e, E>(executor: E, child_id: &str) -> Result<Option<ChildProfile>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM children WHERE id = ?", CHILD_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(child_id)
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(child_from_row).transpose()
}

/// All children ordered by name
pub async fn fetch_children<'e, E>(executor: E) -> Result<Vec<ChildProfile>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM children ORDER BY name ASC, created_at ASC",
        CHILD_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(executor).await?;

    rows.iter().map(child_from_row).collect()
}

pub async fn insert_child<'e, E>(executor: E, child: &ChildProfile) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO children (id, name, balance, weekly_allowance, last_allowance_date, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&child.id)
    .bind(&child.name)
    .bind(child.balance)
    .bind(child.weekly_allowance)
    .bind(encode_timestamp(&child.last_allowance_date))
    .bind(encode_timestamp(&child.created_at))
    .bind(encode_timestamp(&child.updated_at))
    .execute(executor)
    .await
    .map_err(|e| map_insert_error(e, Collection::Children, &child.id))?;
    Ok(())
}

/// Merge the patch into the stored child. Fails with `NotFound` when no row matches.
pub async fn patch_child<'e, E>(
    executor: E,
    child_id: &str,
    patch: &ChildPatch,
    updated_at: &DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE children
        SET name = COALESCE(?, name),
            weekly_allowance = COALESCE(?, weekly_allowance),
            balance = COALESCE(?, balance),
            last_allowance_date = COALESCE(?, last_allowance_date),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(patch.name.as_deref())
    .bind(patch.weekly_allowance)
    .bind(patch.balance)
    .bind(patch.last_allowance_date.as_ref().map(encode_timestamp))
    .bind(encode_timestamp(updated_at))
    .bind(child_id)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(LedgerError::child_not_found(child_id));
    }
    Ok(())
}

/// Returns true if a row was deleted
pub async fn remove_child<'e, E>(executor: E, child_id: &str) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM children WHERE id = ?")
        .bind(child_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Children still carrying the embedded pre-ledger deduction list, with the list decoded
pub async fn fetch_legacy_deductions<'e, E>(
    executor: E,
) -> Result<Vec<(String, Vec<LegacyDeduction>)>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query("SELECT id, deductions FROM children WHERE deductions IS NOT NULL ORDER BY id")
        .fetch_all(executor)
        .await?;

    rows.iter()
        .map(|row| -> Result<(String, Vec<LegacyDeduction>)> {
            let child_id: String = row.try_get("id")?;
            let raw: String = row.try_get("deductions")?;
            let deductions: Vec<LegacyDeduction> = serde_json::from_str(&raw).map_err(|e| {
                LedgerError::Corrupt(format!("legacy deductions of child {}: {}", child_id, e))
            })?;
            Ok((child_id, deductions))
        })
        .collect()
}

pub async fn clear_legacy_deductions<'e, E>(executor: E, child_id: &str) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE children SET deductions = NULL WHERE id = ?")
        .bind(child_id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Whole ledger, most recent first
pub async fn fetch_transactions<'e, E>(executor: E) -> Result<Vec<Transaction>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM transactions ORDER BY date DESC, rowid DESC",
        TRANSACTION_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(executor).await?;

    rows.iter().map(transaction_from_row).collect()
}

/// One child's ledger, most recent first
pub async fn fetch_transactions_for_child<'e, E>(executor: E, child_id: &str) -> Result<Vec<Transaction>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM transactions WHERE child_id = ? ORDER BY date DESC, rowid DESC",
        TRANSACTION_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(child_id)
        .fetch_all(executor)
        .await?;

    rows.iter().map(transaction_from_row).collect()
}

pub async fn insert_transaction<'e, E>(executor: E, transaction: &Transaction) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO transactions (id, child_id, type, amount, description, date)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&transaction.id)
    .bind(&transaction.child_id)
    .bind(transaction.transaction_type.as_str())
    .bind(transaction.amount)
    .bind(&transaction.description)
    .bind(encode_timestamp(&transaction.date))
    .execute(executor)
    .await
    .map_err(|e| map_insert_error(e, Collection::Transactions, &transaction.id))?;
    Ok(())
}

/// Returns the number of ledger rows removed
pub async fn remove_transactions_for_child<'e, E>(executor: E, child_id: &str) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM transactions WHERE child_id = ?")
        .bind(child_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}
