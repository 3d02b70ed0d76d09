//! SQLite handle shared by the facility store and the enrichment cache

use crate::storage::migrations;
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const MEMORY_PATH: &str = ":memory:";

/// Lookups and cache write-backs from concurrent enrichment tasks share these
const DEFAULT_POOL_SIZE: u32 = 5;

/// How to open a gapfill database
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
    /// Apply pending schema migrations on open
    pub auto_migrate: bool,
    /// WAL on disk so cache writes do not block lookups
    pub journal_mode: SqliteJournalMode,
    pub synchronous: SqliteSynchronous,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::with_path(default_database_path())
    }
}

impl DatabaseConfig {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: DEFAULT_POOL_SIZE,
            auto_migrate: true,
            journal_mode: SqliteJournalMode::Wal,
            synchronous: SqliteSynchronous::Normal,
        }
    }

    /// A private database that disappears with its pool
    pub fn in_memory() -> Self {
        Self {
            max_connections: 1,
            journal_mode: SqliteJournalMode::Memory,
            ..Self::with_path(MEMORY_PATH)
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn no_migrate(mut self) -> Self {
        self.auto_migrate = false;
        self
    }

    fn is_memory(&self) -> bool {
        self.path.as_os_str() == MEMORY_PATH
    }

    fn connect_options(&self) -> Result<SqliteConnectOptions> {
        let url = if self.is_memory() {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", self.path.display())
        };
        Ok(SqliteConnectOptions::from_str(&url)?
            .journal_mode(self.journal_mode)
            .synchronous(self.synchronous)
            .create_if_missing(true))
    }
}

/// `<config dir>/gapfill/gapfill.db`, or `gapfill.db` in the working directory
pub fn default_database_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("gapfill").join("gapfill.db"))
        .unwrap_or_else(|| PathBuf::from("gapfill.db"))
}

/// Pooled connection to the `facilities` and `enrichment_cache` tables
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    config: DatabaseConfig,
}

impl Database {
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        if !config.is_memory() {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database directory: {}", parent.display())
                    })?;
                }
            }
        }

        let mut pool_options = SqlitePoolOptions::new().max_connections(config.max_connections);
        if config.is_memory() {
            // the database lives only as long as its single connection
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options
            .connect_with(config.connect_options()?)
            .await
            .with_context(|| format!("Failed to open database: {}", config.path.display()))?;

        let db = Self { pool, config };
        if db.config.auto_migrate {
            db.migrate().await?;
        }
        tracing::debug!(path = %db.config.path.display(), "Database opened");
        Ok(db)
    }

    /// Open (or create) the database file at `path`
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(DatabaseConfig::with_path(path)).await
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new(DatabaseConfig::in_memory()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool)
            .await
            .context("Failed to migrate the facility schema")
    }

    pub async fn migration_status(&self) -> Result<migrations::MigrationStatus> {
        migrations::migration_status(&self.pool)
            .await
            .context("Failed to read the schema version")
    }

    /// Round-trip a trivial query; used by `doctor`
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database is not answering")?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }
}
