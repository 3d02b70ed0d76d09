//! Error types for gapfill

use thiserror::Error;

/// Result type alias using gapfill's Error
pub type Result<T> = std::result::Result<T, Error>;

/// gapfill error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Query errors (E001-E099)
    #[error("Invalid query: {0}. Try something like \"hospitals in Texas with more than 300 beds\".")]
    InvalidQuery(String),

    // Relational store errors (E100-E199)
    #[error("Facility store unavailable: {0}. Run `gapfill doctor` to check the database.")]
    DataStoreUnavailable(String),

    // Enrichment errors (E200-E299)
    #[error("Enrichment unavailable: {0}")]
    EnrichmentUnavailable(String),

    #[error("Malformed enrichment response for facility {facility_id}: {reason}")]
    MalformedEnrichmentResponse { facility_id: i64, reason: String },

    #[error("Knowledge source rejected credentials: {0}. Check GAPFILL_API_KEY or PERPLEXITY_API_KEY.")]
    EnrichmentAuthFailed(String),

    #[error("Knowledge source rate limited the batch (retry after {0} seconds)")]
    RateLimited(u64),

    #[error("Knowledge source call timed out after {0} seconds")]
    EnrichmentTimeout(u64),

    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    // Cache errors (E300-E399)
    #[error("Enrichment cache unavailable: {0}")]
    CacheUnavailable(String),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Serialization errors (E700-E799)
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidQuery(_) => "E001",
            Self::DataStoreUnavailable(_) => "E100",
            Self::EnrichmentUnavailable(_) => "E200",
            Self::MalformedEnrichmentResponse { .. } => "E201",
            Self::EnrichmentAuthFailed(_) => "E202",
            Self::RateLimited(_) => "E203",
            Self::EnrichmentTimeout(_) => "E204",
            Self::NetworkError(_) => "E205",
            Self::CacheUnavailable(_) => "E300",
            Self::DatabaseError(_) => "E400",
            Self::ConfigError(_) => "E600",
            Self::Serialization(_) => "E700",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Whether the error must abort a search request.
    ///
    /// Everything on the enrichment path is absorbed into provenance
    /// metadata instead.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidQuery(_)
                | Self::DataStoreUnavailable(_)
                | Self::DatabaseError(_)
                | Self::ConfigError(_)
        )
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::InvalidQuery(_) => Some("gapfill search \"clinics in Rochester, MN\"".to_string()),
            Self::DataStoreUnavailable(_) | Self::DatabaseError(_) => {
                Some("gapfill doctor".to_string())
            }
            Self::EnrichmentAuthFailed(_) => Some("export GAPFILL_API_KEY=...".to_string()),
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::ConfigError(_) => Some("gapfill config list".to_string()),
            _ => None,
        }
    }
}
