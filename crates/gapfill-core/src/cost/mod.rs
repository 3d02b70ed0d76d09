//! Cost management and budget enforcement
//!
//! This module provides:
//! - Per-request telemetry (cache hit rate, stage timings, call counts)
//! - A cross-request tracker recording every external call's cost
//! - Daily cost aggregation and budget enforcement

mod telemetry;

pub use telemetry::{PipelineStage, RequestTelemetry, StageTiming};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Token usage reported by the knowledge source for one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Cost record for a single external call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallCost {
    pub id: String,
    pub model: String,
    /// Zero when the call failed before usage was reported
    pub tokens: TokenUsage,
    pub cost_usd: f64,
    pub timestamp: DateTime<Utc>,
    pub facility_id: Option<i64>,
    pub succeeded: bool,
}

/// Daily cost summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyCostSummary {
    pub date: NaiveDate,
    pub total_cost_usd: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub call_count: u32,
    pub failed_calls: u32,
    pub by_model: HashMap<String, ModelCostSummary>,
}

impl DailyCostSummary {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            total_cost_usd: 0.0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            call_count: 0,
            failed_calls: 0,
            by_model: HashMap::new(),
        }
    }

    pub fn add(&mut self, cost: &CallCost) {
        self.total_cost_usd += cost.cost_usd;
        self.total_input_tokens += cost.tokens.input_tokens as u64;
        self.total_output_tokens += cost.tokens.output_tokens as u64;
        self.call_count += 1;
        if !cost.succeeded {
            self.failed_calls += 1;
        }

        self.by_model
            .entry(cost.model.clone())
            .or_insert_with(|| ModelCostSummary::new(cost.model.clone()))
            .add(cost);
    }
}

/// Cost summary for a specific model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCostSummary {
    pub model: String,
    pub total_cost_usd: f64,
    pub total_tokens: u64,
    pub call_count: u32,
}

impl ModelCostSummary {
    pub fn new(model: String) -> Self {
        Self {
            model,
            total_cost_usd: 0.0,
            total_tokens: 0,
            call_count: 0,
        }
    }

    pub fn add(&mut self, cost: &CallCost) {
        self.total_cost_usd += cost.cost_usd;
        self.total_tokens += cost.tokens.total() as u64;
        self.call_count += 1;
    }
}

/// Tracker for recording and aggregating external call costs.
///
/// Every issued call is charged the flat unit cost, whether or not it
/// succeeded. Clones share the same records.
#[derive(Debug, Clone)]
pub struct CostTracker {
    /// Cost records (most recent first)
    records: Arc<RwLock<Vec<CallCost>>>,
    daily_summaries: Arc<RwLock<HashMap<NaiveDate, DailyCostSummary>>>,
    daily_limit_usd: f64,
    /// Alert threshold (0.0 to 1.0)
    alert_threshold: f64,
    unit_cost_usd: f64,
}

impl CostTracker {
    pub fn new(daily_limit_usd: f64, alert_threshold: f64, unit_cost_usd: f64) -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            daily_summaries: Arc::new(RwLock::new(HashMap::new())),
            daily_limit_usd,
            alert_threshold,
            unit_cost_usd,
        }
    }

    /// Create a cost tracker from config
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(
            config.cost.daily_limit_usd,
            config.cost.alert_threshold,
            config.enrichment.unit_cost_usd,
        )
    }

    pub fn unit_cost(&self) -> f64 {
        self.unit_cost_usd
    }

    /// Record one issued external call
    pub fn record(
        &self,
        model: &str,
        tokens: TokenUsage,
        facility_id: Option<i64>,
        succeeded: bool,
    ) -> CallCost {
        let cost = CallCost {
            id: uuid::Uuid::new_v4().to_string(),
            model: model.to_string(),
            tokens,
            cost_usd: self.unit_cost_usd,
            timestamp: Utc::now(),
            facility_id,
            succeeded,
        };

        if let Ok(mut records) = self.records.write() {
            records.insert(0, cost.clone());
        }

        let date = cost.timestamp.date_naive();
        if let Ok(mut summaries) = self.daily_summaries.write() {
            summaries
                .entry(date)
                .or_insert_with(|| DailyCostSummary::new(date))
                .add(&cost);
        }

        cost
    }

    /// Get today's total cost
    pub fn today_total(&self) -> f64 {
        let today = Utc::now().date_naive();
        self.daily_summaries
            .read()
            .ok()
            .and_then(|s| s.get(&today).map(|d| d.total_cost_usd))
            .unwrap_or(0.0)
    }

    pub fn today_summary(&self) -> Option<DailyCostSummary> {
        self.summary_for_date(Utc::now().date_naive())
    }

    /// Check if we're approaching the daily limit
    pub fn is_approaching_limit(&self) -> bool {
        self.today_total() >= self.daily_limit_usd * self.alert_threshold
    }

    /// Check if we've exceeded the daily limit
    pub fn is_over_limit(&self) -> bool {
        self.today_total() >= self.daily_limit_usd
    }

    /// Get remaining budget for today
    pub fn remaining_budget(&self) -> f64 {
        (self.daily_limit_usd - self.today_total()).max(0.0)
    }

    /// Calls the remaining budget still pays for
    pub fn affordable_calls(&self) -> usize {
        if self.unit_cost_usd <= 0.0 {
            return usize::MAX;
        }
        // small epsilon so 0.015 / 0.005 is 3, not 2.999...
        ((self.remaining_budget() + 1e-9) / self.unit_cost_usd).floor() as usize
    }

    pub fn daily_limit(&self) -> f64 {
        self.daily_limit_usd
    }

    /// Get all cost records (most recent first)
    pub fn records(&self) -> Vec<CallCost> {
        self.records
            .read()
            .ok()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn summary_for_date(&self, date: NaiveDate) -> Option<DailyCostSummary> {
        self.daily_summaries
            .read()
            .ok()
            .and_then(|s| s.get(&date).cloned())
    }

    /// Clear all records and summaries
    pub fn clear(&self) {
        if let Ok(mut records) = self.records.write() {
            records.clear();
        }
        if let Ok(mut summaries) = self.daily_summaries.write() {
            summaries.clear();
        }
    }
}
