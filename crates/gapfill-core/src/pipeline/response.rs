use serde::Serialize;

use crate::cost::RequestTelemetry;
use crate::error::Error;
use crate::merge::EnrichedFacility;
use crate::query::ParsedQuery;

/// A non-fatal problem absorbed during a search
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineWarning {
    pub code: &'static str,
    pub message: String,
}

impl PipelineWarning {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&Error> for PipelineWarning {
    fn from(err: &Error) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

/// Everything a caller gets back from one search
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: ParsedQuery,
    pub facilities: Vec<EnrichedFacility>,
    pub results_count: usize,
    pub cache_hit_rate: f64,
    pub estimated_cost_usd: f64,
    pub web_search_performed: bool,
    pub data_source_explanation: String,
    pub warnings: Vec<PipelineWarning>,
    pub telemetry: RequestTelemetry,
}

impl SearchResponse {
    pub(crate) fn new(
        query: ParsedQuery,
        facilities: Vec<EnrichedFacility>,
        data_source_explanation: String,
        warnings: Vec<PipelineWarning>,
        telemetry: RequestTelemetry,
    ) -> Self {
        Self {
            results_count: facilities.len(),
            cache_hit_rate: telemetry.cache_hit_rate(),
            estimated_cost_usd: telemetry.estimated_cost_usd(),
            web_search_performed: telemetry.external_calls > 0,
            query,
            facilities,
            data_source_explanation,
            warnings,
            telemetry,
        }
    }

    pub fn has_warning(&self, code: &str) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }
}
