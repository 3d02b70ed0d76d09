//! Relational lookup engine
//!
//! Translates a [`ParsedQuery`] into a fixed AND-combination of predicates
//! over the canonical facility store.

mod sqlite;

pub use sqlite::{SqliteFacilityStore, build_lookup_sql};

use crate::error::Result;
use crate::facility::FacilityRecord;
use crate::query::ParsedQuery;
use async_trait::async_trait;

/// Records matched by a lookup
#[derive(Debug, Clone, Default)]
pub struct LookupResult {
    pub records: Vec<FacilityRecord>,
    /// Field names the store can hold
    pub available_fields: Vec<&'static str>,
    pub execution_time_ms: u64,
}

impl LookupResult {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Source of canonical facility records
#[async_trait]
pub trait FacilityStore: Send + Sync {
    /// Run the lookup for a parsed query.
    ///
    /// Failures surface as `DataStoreUnavailable`.
    async fn query(&self, query: &ParsedQuery) -> Result<LookupResult>;

    /// Field names this store has columns for
    fn available_fields(&self) -> Vec<&'static str>;
}
