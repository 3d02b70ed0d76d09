use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Stages of one search request, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Intake,
    Lookup,
    GapAnalysis,
    CacheCheck,
    Enrich,
    CacheWrite,
    Merge,
    Done,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Intake => "intake",
            Self::Lookup => "lookup",
            Self::GapAnalysis => "gap_analysis",
            Self::CacheCheck => "cache_check",
            Self::Enrich => "enrich",
            Self::CacheWrite => "cache_write",
            Self::Merge => "merge",
            Self::Done => "done",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageTiming {
    pub stage: PipelineStage,
    pub elapsed_ms: u64,
}

/// Counters and timings for one request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestTelemetry {
    /// Gapped facilities fully answered by the cache
    pub cache_hits: u32,
    /// Gapped facilities the cache could not fully answer
    pub cache_misses: u32,
    /// External calls actually issued, failed ones included
    pub external_calls: u32,
    pub external_failures: u32,
    /// Unresolved facilities dropped by the batch ceiling
    pub truncated: u32,
    pub unit_cost_usd: f64,
    pub stages: Vec<StageTiming>,
}

impl RequestTelemetry {
    pub fn new(unit_cost_usd: f64) -> Self {
        Self {
            unit_cost_usd,
            ..Default::default()
        }
    }

    pub fn record_stage(&mut self, stage: PipelineStage, elapsed: Duration) {
        self.stages.push(StageTiming {
            stage,
            elapsed_ms: elapsed.as_millis() as u64,
        });
    }

    /// Fraction of checked facilities served from cache; 0.0 when none were checked
    pub fn cache_hit_rate(&self) -> f64 {
        let checked = self.cache_hits + self.cache_misses;
        if checked == 0 {
            0.0
        } else {
            self.cache_hits as f64 / checked as f64
        }
    }

    pub fn estimated_cost_usd(&self) -> f64 {
        self.external_calls as f64 * self.unit_cost_usd
    }

    pub fn total_ms(&self) -> u64 {
        self.stages.iter().map(|s| s.elapsed_ms).sum()
    }

    pub fn stage_ms(&self, stage: PipelineStage) -> Option<u64> {
        self.stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| s.elapsed_ms)
    }
}
