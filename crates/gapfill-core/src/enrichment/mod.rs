//! Batch enrichment from an external knowledge source
//!
//! Provides:
//! - The [`KnowledgeSource`] seam and a chat-completions implementation
//! - Prompt construction and reply parsing with per-kind extractors
//! - A bounded, concurrent batch runner that writes through to the cache

pub mod batch;
pub mod client;
pub mod extract;
pub mod prompt;
pub mod types;

pub use batch::{BatchEnricher, EnrichmentOutcome, FacilityFailure};
pub use client::{WebSearchClient, WebSearchClientBuilder};
pub use extract::{FieldExtractor, FieldMap, parse_response};
pub use types::SourceAnswer;

use crate::error::Result;
use crate::gaps::DataGap;
use async_trait::async_trait;

/// Something that can answer a facility's missing fields
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Model or backend name, used in cost records
    fn model(&self) -> &str;

    /// Provenance tag stored with cached values
    fn source_tag(&self) -> String {
        format!("web:{}", self.model())
    }

    /// One call for one facility; returns the raw reply text
    async fn ask(&self, gap: &DataGap) -> Result<SourceAnswer>;
}
