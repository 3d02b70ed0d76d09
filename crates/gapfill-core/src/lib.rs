//! gapfill Core Library
//!
//! This crate provides the hybrid facility lookup pipeline:
//! - Query intake (spelling, intent, fields, location, criteria)
//! - Relational lookup over the canonical facility store
//! - Gap analysis against the fixed field registry
//! - Durable enrichment cache
//! - Bounded, cost-tracked enrichment from a web knowledge source
//! - Merge with per-field provenance
//! - Storage (SQLite with versioned migrations)

pub mod cache;
pub mod config;
pub mod cost;
pub mod enrichment;
pub mod error;
pub mod facility;
pub mod gaps;
pub mod lookup;
pub mod merge;
pub mod pipeline;
pub mod query;
pub mod registry;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::{EnrichmentCache, MemoryCache, SqliteEnrichmentCache};
    pub use crate::config::Config;
    pub use crate::cost::CostTracker;
    pub use crate::enrichment::{KnowledgeSource, WebSearchClient};
    pub use crate::error::{Error, Result};
    pub use crate::facility::{FacilityRecord, FieldValue};
    pub use crate::lookup::{FacilityStore, SqliteFacilityStore};
    pub use crate::merge::{DataSource, EnrichedFacility, Provenance};
    pub use crate::pipeline::{HybridSearch, SearchResponse};
    pub use crate::storage::Database;
}
