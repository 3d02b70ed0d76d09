//! Enrichment cache
//!
//! Durable memo of externally derived field values keyed by
//! `(facility_id, field)`. Writes are last-write-wins upserts and entries
//! never expire. A `None` value records that the source was asked and had
//! no answer.

mod memory;
mod sqlite;

pub use memory::MemoryCache;
pub use sqlite::SqliteEnrichmentCache;

use crate::error::Result;
use crate::facility::FieldValue;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub facility_id: i64,
    pub field: String,
}

impl CacheKey {
    pub fn new(facility_id: i64, field: impl Into<String>) -> Self {
        Self {
            facility_id,
            field: field.into(),
        }
    }
}

/// A cached field value and where it came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub value: Option<FieldValue>,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

/// Aggregate cache contents
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: u64,
    /// Unknown answers (`None` values)
    pub unknown_entries: u64,
    pub by_field: BTreeMap<String, u64>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Storage for enrichment results
///
/// Backend failures surface as `CacheUnavailable`; unknown keys are simply
/// absent.
#[async_trait]
pub trait EnrichmentCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Entries for every key that has one
    async fn batch_get(&self, keys: &[CacheKey]) -> Result<HashMap<CacheKey, CacheEntry>>;

    /// Insert or overwrite one entry
    async fn put(
        &self,
        facility_id: i64,
        field: &str,
        value: Option<FieldValue>,
        source: &str,
    ) -> Result<()>;

    async fn stats(&self) -> Result<CacheStats>;
}
