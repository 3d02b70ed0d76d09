//! Storage layer - SQLite
//!
//! Provides database management and migrations for gapfill.
//!
//! # Architecture
//!
//! - `database`: Connection pool management and initialization
//! - `migrations`: Schema versioning and automatic migration
//!
//! Both the facility table and the enrichment cache live in the same
//! schema; they may be opened from one file or from two.
//!
//! # Usage
//!
//! ```ignore
//! use gapfill_core::storage::Database;
//!
//! let db = Database::in_memory().await?;
//! db.health_check().await?;
//! ```

pub mod database;
pub mod migrations;

pub use database::{Database, DatabaseConfig, default_database_path};
pub use migrations::{CURRENT_VERSION, MigrationStatus, migration_status, run_migrations};
