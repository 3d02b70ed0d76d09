//! Schema migrations
//!
//! Each migration is a versioned SQL batch applied in its own transaction
//! and recorded in `schema_migrations`. Opening a database runs whatever is
//! pending.

use sqlx::SqlitePool;

/// Latest schema version
pub const CURRENT_VERSION: i32 = 2;

const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        description TEXT NOT NULL,
        applied_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
"#;

/// Migration 1: Canonical facility records
const MIGRATION_V1: &str = r#"
    CREATE TABLE IF NOT EXISTS facilities (
        id INTEGER PRIMARY KEY NOT NULL,
        npi TEXT,
        name TEXT,
        address TEXT,
        city TEXT,
        state TEXT,
        state_code TEXT,
        zip TEXT,
        phone TEXT,
        fax TEXT,
        category TEXT,
        facility_type TEXT,
        ownership TEXT,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_facilities_name ON facilities(name);
    CREATE INDEX IF NOT EXISTS idx_facilities_state_code ON facilities(state_code);
    CREATE INDEX IF NOT EXISTS idx_facilities_city ON facilities(city);
    CREATE INDEX IF NOT EXISTS idx_facilities_zip ON facilities(zip);
"#;

/// Migration 2: Enrichment cache keyed by (facility, field)
const MIGRATION_V2: &str = r#"
    CREATE TABLE IF NOT EXISTS enrichment_cache (
        facility_id INTEGER NOT NULL,
        field_name TEXT NOT NULL,
        field_value TEXT,
        source TEXT NOT NULL,
        fetched_at TEXT NOT NULL,
        PRIMARY KEY (facility_id, field_name)
    );

    CREATE INDEX IF NOT EXISTS idx_enrichment_cache_field ON enrichment_cache(field_name);
"#;

struct Migration {
    version: i32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "facility records",
        sql: MIGRATION_V1,
    },
    Migration {
        version: 2,
        description: "enrichment cache",
        sql: MIGRATION_V2,
    },
];

async fn applied_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let (version,): (Option<i32>,) = sqlx::query_as("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}

/// Apply every migration newer than the database
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let applied = applied_version(pool).await?;
    if applied >= CURRENT_VERSION {
        tracing::debug!(version = applied, "Schema up to date");
        return Ok(());
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "Applying migration"
        );
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_migrations (version, description) VALUES (?, ?)")
            .bind(migration.version)
            .bind(migration.description)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    tracing::info!(from = applied, to = CURRENT_VERSION, "Schema migrated");
    Ok(())
}

/// Where the database stands relative to [`CURRENT_VERSION`]
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = applied_version(pool).await?;
    let pending = MIGRATIONS
        .iter()
        .filter(|m| m.version > current_version)
        .map(|m| m.description)
        .collect();
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
        pending,
    })
}

#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub current_version: i32,
    pub target_version: i32,
    pub needs_migration: bool,
    /// Descriptions of migrations not yet applied, oldest first
    pub pending: Vec<&'static str>,
}
