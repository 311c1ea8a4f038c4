use shared::{ChildProfile, Transaction};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{migrate::MigrateDatabase, Sqlite, SqlitePool};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::info;

use crate::backend::config::LedgerConfig;
use crate::backend::errors::Result;
use crate::backend::storage::atomic::AtomicUnit;
use crate::backend::storage::queries;
use crate::backend::storage::{Collection, LedgerChange};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// DbConnection owns the SQLite pool, the change channel and the write gate
/// that serializes atomic units. Clones share all three; open one
/// `DbConnection` per database and clone it.
#[derive(Clone)]
pub struct DbConnection {
    pool: Arc<SqlitePool>,
    changes: broadcast::Sender<LedgerChange>,
    write_gate: Arc<Mutex<()>>,
}

impl DbConnection {
    /// Open (creating if needed) the database at `url` and set up the schema
    pub async fn new(url: &str) -> Result<Self> {
        if !Sqlite::database_exists(url).await.unwrap_or(false) {
            info!("Creating database at {}", url);
            Sqlite::create_database(url).await?;
        }

        let pool = SqlitePool::connect(url).await?;
        Self::from_pool(pool).await
    }

    /// Open the database named by the configuration
    pub async fn init(config: &LedgerConfig) -> Result<Self> {
        Self::new(&config.database_url).await
    }

    /// Open an isolated in-memory database.
    ///
    /// A single long-lived connection keeps the database alive for the whole
    /// lifetime of the pool; atomic units and plain reads therefore queue
    /// behind each other instead of seeing locked tables.
    pub async fn init_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        Self::setup_schema(&pool).await?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            pool: Arc::new(pool),
            changes,
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Set up the required database schema
    async fn setup_schema(pool: &SqlitePool) -> Result<()> {
        // `deductions` holds the JSON list embedded by pre-ledger versions;
        // it is NULL for every migrated or newly created child
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS children (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                balance REAL NOT NULL DEFAULT 0,
                weekly_allowance REAL NOT NULL DEFAULT 0,
                last_allowance_date TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deductions TEXT
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_children_name
            ON children(name);
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                child_id TEXT NOT NULL,
                type TEXT NOT NULL CHECK (type IN ('allowance', 'deduction', 'payout')),
                amount REAL NOT NULL CHECK (amount >= 0),
                description TEXT NOT NULL,
                date TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_transactions_child_id
            ON transactions(child_id);
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_transactions_date
            ON transactions(date DESC);
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Start an atomic unit over the given collections.
    ///
    /// Waits until every earlier unit has committed or rolled back.
    pub async fn begin(&self, scope: &[Collection]) -> Result<AtomicUnit> {
        let gate = self.write_gate.clone().lock_owned().await;
        AtomicUnit::begin(&self.pool, scope, self.changes.clone(), gate).await
    }

    /// Receive a notification after every committed write
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerChange> {
        self.changes.subscribe()
    }

    pub async fn get_child(&self, child_id: &str) -> Result<Option<ChildProfile>> {
        queries::fetch_child(&*self.pool, child_id).await
    }

    /// All children ordered by name
    pub async fn list_children(&self) -> Result<Vec<ChildProfile>> {
        queries::fetch_children(&*self.pool).await
    }

    /// Whole ledger, most recent first
    pub async fn list_transactions(&self) -> Result<Vec<Transaction>> {
        queries::fetch_transactions(&*self.pool).await
    }

    /// One child's ledger, most recent first
    pub async fn transactions_for_child(&self, child_id: &str) -> Result<Vec<Transaction>> {
        queries::fetch_transactions_for_child(&*self.pool, child_id).await
    }
}
