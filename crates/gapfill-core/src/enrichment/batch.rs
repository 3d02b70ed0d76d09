//! Bounded concurrent enrichment of a batch of gaps

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::cache::EnrichmentCache;
use crate::config::EnrichmentConfig;
use crate::cost::{CostTracker, TokenUsage};
use crate::error::{Error, Result};
use crate::gaps::DataGap;

use super::KnowledgeSource;
use super::extract::{FieldMap, parse_response};

/// A facility whose enrichment call produced nothing usable
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacilityFailure {
    pub facility_id: i64,
    pub code: &'static str,
    pub message: String,
}

impl FacilityFailure {
    fn new(facility_id: i64, err: &Error) -> Self {
        Self {
            facility_id,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// What a batch run produced
#[derive(Debug, Default)]
pub struct EnrichmentOutcome {
    /// Parsed values per facility; already written to the cache
    pub results: HashMap<i64, FieldMap>,
    /// Calls issued, failed ones included
    pub calls_made: u32,
    pub failures: Vec<FacilityFailure>,
    /// Gaps dropped by the ceiling or the remaining budget
    pub truncated: u32,
    /// Auth failure or rate limit that stopped further calls
    pub aborted: Option<Error>,
    pub cache_write_ms: u64,
}

/// Per-facility task result
enum TaskOutcome {
    /// Not started because the batch was aborted
    Skipped,
    Done {
        facility_id: i64,
        result: Result<FieldMap>,
        cache_write: Duration,
    },
}

/// Runs one external call per gap with bounded concurrency.
///
/// Calls run in spawned tasks; dropping the future returned by
/// [`BatchEnricher::enrich`] does not cancel them, so in-flight answers still
/// reach the cache.
#[derive(Clone)]
pub struct BatchEnricher {
    source: Arc<dyn KnowledgeSource>,
    cache: Arc<dyn EnrichmentCache>,
    tracker: Option<CostTracker>,
    ceiling: usize,
    concurrency: usize,
    timeout_secs: u64,
}

impl std::fmt::Debug for BatchEnricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEnricher")
            .field("model", &self.source.model())
            .field("ceiling", &self.ceiling)
            .field("concurrency", &self.concurrency)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl BatchEnricher {
    pub fn new(source: Arc<dyn KnowledgeSource>, cache: Arc<dyn EnrichmentCache>) -> Self {
        Self::from_config(source, cache, &EnrichmentConfig::default())
    }

    pub fn from_config(
        source: Arc<dyn KnowledgeSource>,
        cache: Arc<dyn EnrichmentCache>,
        config: &EnrichmentConfig,
    ) -> Self {
        Self {
            source,
            cache,
            tracker: None,
            ceiling: config.ceiling,
            concurrency: config.concurrency,
            timeout_secs: config.timeout_secs,
        }
    }

    pub fn with_ceiling(mut self, ceiling: usize) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_cost_tracker(mut self, tracker: CostTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Enrich the first `ceiling` gaps.
    ///
    /// Per-facility failures are recorded in the outcome, never returned.
    /// The only error is an exhausted daily budget, which skips the stage.
    pub async fn enrich(&self, gaps: &[DataGap]) -> Result<EnrichmentOutcome> {
        let mut limit = self.ceiling.min(gaps.len());

        if let Some(tracker) = &self.tracker {
            if tracker.is_over_limit() {
                warn!(
                    spent = tracker.today_total(),
                    limit = tracker.daily_limit(),
                    "Daily enrichment budget exhausted"
                );
                return Err(Error::EnrichmentUnavailable(format!(
                    "daily budget of ${:.2} exhausted",
                    tracker.daily_limit()
                )));
            }
            let affordable = tracker.affordable_calls();
            if affordable < limit {
                warn!(affordable, wanted = limit, "Remaining budget limits the batch");
                limit = affordable;
            }
        }

        let batch = &gaps[..limit];
        let mut outcome = EnrichmentOutcome {
            truncated: (gaps.len() - batch.len()) as u32,
            ..Default::default()
        };
        if outcome.truncated > 0 {
            debug!(
                sent = batch.len(),
                dropped = outcome.truncated,
                "Batch ceiling applied"
            );
        }
        if batch.is_empty() {
            return Ok(outcome);
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let abort = Arc::new(AtomicBool::new(false));
        let source_tag = self.source.source_tag();

        let handles: Vec<_> = batch
            .iter()
            .cloned()
            .map(|gap| {
                let source = Arc::clone(&self.source);
                let cache = Arc::clone(&self.cache);
                let tracker = self.tracker.clone();
                let semaphore = Arc::clone(&semaphore);
                let abort = Arc::clone(&abort);
                let source_tag = source_tag.clone();
                let limit = Duration::from_secs(self.timeout_secs);

                tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return TaskOutcome::Skipped;
                    };
                    if abort.load(Ordering::SeqCst) {
                        return TaskOutcome::Skipped;
                    }
                    enrich_one(gap, source, cache, tracker, &abort, &source_tag, limit).await
                })
            })
            .collect();

        let mut cache_write = Duration::ZERO;
        for joined in join_all(handles).await {
            match joined {
                Ok(TaskOutcome::Skipped) => {}
                Ok(TaskOutcome::Done {
                    facility_id,
                    result,
                    cache_write: spent,
                }) => {
                    outcome.calls_made += 1;
                    cache_write += spent;
                    match result {
                        Ok(values) => {
                            outcome.results.insert(facility_id, values);
                        }
                        Err(e) => {
                            outcome.failures.push(FacilityFailure::new(facility_id, &e));
                            let aborting =
                                matches!(e, Error::EnrichmentAuthFailed(_) | Error::RateLimited(_));
                            if aborting && outcome.aborted.is_none() {
                                outcome.aborted = Some(e);
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Enrichment task panicked");
                    outcome.calls_made += 1;
                    outcome.failures.push(FacilityFailure {
                        facility_id: -1,
                        code: "E9999",
                        message: e.to_string(),
                    });
                }
            }
        }
        outcome.cache_write_ms = cache_write.as_millis() as u64;

        if let Some(reason) = &outcome.aborted {
            warn!(code = reason.code(), error = %reason, "Enrichment batch aborted");
        }
        info!(
            calls = outcome.calls_made,
            enriched = outcome.results.len(),
            failures = outcome.failures.len(),
            truncated = outcome.truncated,
            "Enrichment batch finished"
        );

        Ok(outcome)
    }
}

async fn enrich_one(
    gap: DataGap,
    source: Arc<dyn KnowledgeSource>,
    cache: Arc<dyn EnrichmentCache>,
    tracker: Option<CostTracker>,
    abort: &AtomicBool,
    source_tag: &str,
    limit: Duration,
) -> TaskOutcome {
    let facility_id = gap.facility_id;
    let started = Instant::now();

    let answer = match timeout(limit, source.ask(&gap)).await {
        Ok(answer) => answer,
        Err(_) => Err(Error::EnrichmentTimeout(limit.as_secs())),
    };

    let tokens = answer
        .as_ref()
        .map(|a| TokenUsage::new(a.input_tokens, a.output_tokens))
        .unwrap_or_default();
    let result = answer.and_then(|a| parse_response(facility_id, &a.content, &gap.missing_fields));

    if let Some(tracker) = &tracker {
        tracker.record(source.model(), tokens, Some(facility_id), result.is_ok());
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let values = match result {
        Ok(values) => values,
        Err(e) => {
            if matches!(e, Error::EnrichmentAuthFailed(_) | Error::RateLimited(_)) {
                abort.store(true, Ordering::SeqCst);
            }
            warn!(facility_id, code = e.code(), error = %e, elapsed_ms, "Enrichment call failed");
            return TaskOutcome::Done {
                facility_id,
                result: Err(e),
                cache_write: Duration::ZERO,
            };
        }
    };

    debug!(facility_id, fields = values.len(), elapsed_ms, "Enrichment call succeeded");

    let write_started = Instant::now();
    for (field, value) in &values {
        if let Err(e) = cache.put(facility_id, field, value.clone(), source_tag).await {
            warn!(facility_id, field = %field, error = %e, "Cache write failed");
        }
    }

    TaskOutcome::Done {
        facility_id,
        result: Ok(values),
        cache_write: write_started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, MemoryCache};
    use crate::enrichment::SourceAnswer;
    use crate::facility::FieldValue;
    use crate::query::FieldRequest;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;

    #[derive(Clone)]
    enum Reply {
        Json(&'static str),
        Unauthorized,
        RateLimited,
        ServerError,
        Hang,
    }

    struct ScriptedSource {
        replies: HashMap<i64, Reply>,
        calls: AtomicU32,
        asked: Mutex<Vec<i64>>,
    }

    impl ScriptedSource {
        fn new(replies: &[(i64, Reply)]) -> Self {
            Self {
                replies: replies.iter().cloned().collect(),
                calls: AtomicU32::new(0),
                asked: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl KnowledgeSource for ScriptedSource {
        fn model(&self) -> &str {
            "sonar"
        }

        async fn ask(&self, gap: &DataGap) -> Result<SourceAnswer> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.asked.lock().unwrap().push(gap.facility_id);
            match self.replies.get(&gap.facility_id).cloned().unwrap_or(Reply::Json("{}")) {
                Reply::Json(body) => Ok(SourceAnswer::text(body)),
                Reply::Unauthorized => Err(Error::EnrichmentAuthFailed("401".into())),
                Reply::RateLimited => Err(Error::RateLimited(30)),
                Reply::ServerError => Err(Error::EnrichmentUnavailable("502".into())),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(SourceAnswer::text("{}"))
                }
            }
        }
    }

    fn gap(id: i64) -> DataGap {
        DataGap {
            facility_id: id,
            name: format!("Facility {}", id),
            city: Some("Houston".into()),
            state: Some("Texas".into()),
            missing_fields: vec![FieldRequest::named("bed_count").unwrap()],
            search_phrase: format!("Facility {} Houston Texas bed count capacity", id),
        }
    }

    fn enricher(source: &Arc<ScriptedSource>, cache: &MemoryCache) -> BatchEnricher {
        BatchEnricher::new(source.clone(), Arc::new(cache.clone()))
            .with_concurrency(1)
            .with_timeout_secs(2)
    }

    #[tokio::test]
    async fn test_results_are_cached_before_return() {
        let source = Arc::new(ScriptedSource::new(&[(1, Reply::Json(r#"{"beds": 320}"#))]));
        let cache = MemoryCache::new();

        let outcome = enricher(&source, &cache).enrich(&[gap(1)]).await.unwrap();

        assert_eq!(outcome.calls_made, 1);
        assert_eq!(outcome.results[&1]["bed_count"], Some(FieldValue::Integer(320)));
        let entry = cache.get(&CacheKey::new(1, "bed_count")).await.unwrap().unwrap();
        assert_eq!(entry.value, Some(FieldValue::Integer(320)));
        assert_eq!(entry.source, "web:sonar");
    }

    #[tokio::test]
    async fn test_ceiling_limits_calls() {
        let source = Arc::new(ScriptedSource::new(&[]));
        let cache = MemoryCache::new();
        let gaps: Vec<DataGap> = (1..=12).map(gap).collect();

        let outcome = enricher(&source, &cache)
            .with_ceiling(5)
            .enrich(&gaps)
            .await
            .unwrap();

        assert_eq!(outcome.calls_made, 5);
        assert_eq!(outcome.truncated, 7);
        assert_eq!(*source.asked.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_sink_the_batch() {
        let source = Arc::new(ScriptedSource::new(&[
            (1, Reply::Json(r#"{"bed_count": 100}"#)),
            (2, Reply::ServerError),
            (3, Reply::Json("nothing useful here")),
            (4, Reply::Json(r#"{"bed_count": 400}"#)),
        ]));
        let cache = MemoryCache::new();

        let outcome = enricher(&source, &cache)
            .enrich(&[gap(1), gap(2), gap(3), gap(4)])
            .await
            .unwrap();

        assert_eq!(outcome.calls_made, 4);
        assert_eq!(outcome.results.len(), 2);
        let codes: Vec<_> = outcome.failures.iter().map(|f| (f.facility_id, f.code)).collect();
        assert_eq!(codes, vec![(2, "E200"), (3, "E201")]);
        assert!(outcome.aborted.is_none());
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_stops_further_calls() {
        let source = Arc::new(ScriptedSource::new(&[
            (1, Reply::Json(r#"{"bed_count": 100}"#)),
            (2, Reply::Unauthorized),
        ]));
        let cache = MemoryCache::new();

        let outcome = enricher(&source, &cache)
            .enrich(&[gap(1), gap(2), gap(3), gap(4)])
            .await
            .unwrap();

        assert_eq!(outcome.calls_made, 2);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(matches!(outcome.aborted, Some(Error::EnrichmentAuthFailed(_))));
        assert!(outcome.results.contains_key(&1));
    }

    #[tokio::test]
    async fn test_rate_limit_stops_further_calls() {
        let source = Arc::new(ScriptedSource::new(&[(1, Reply::RateLimited)]));
        let cache = MemoryCache::new();

        let outcome = enricher(&source, &cache)
            .enrich(&[gap(1), gap(2)])
            .await
            .unwrap();

        assert_eq!(outcome.calls_made, 1);
        assert!(matches!(outcome.aborted, Some(Error::RateLimited(30))));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_isolated() {
        let source = Arc::new(ScriptedSource::new(&[
            (1, Reply::Hang),
            (2, Reply::Json(r#"{"bed_count": 250}"#)),
        ]));
        let cache = MemoryCache::new();

        let outcome = enricher(&source, &cache)
            .with_concurrency(2)
            .enrich(&[gap(1), gap(2)])
            .await
            .unwrap();

        assert_eq!(outcome.calls_made, 2);
        assert_eq!(outcome.failures[0].code, "E204");
        assert!(outcome.results.contains_key(&2));
    }

    #[tokio::test]
    async fn test_calls_are_charged_and_budget_enforced() {
        let source = Arc::new(ScriptedSource::new(&[(2, Reply::ServerError)]));
        let cache = MemoryCache::new();
        let tracker = CostTracker::new(0.01, 0.8, 0.005);
        let enricher = enricher(&source, &cache).with_cost_tracker(tracker.clone());

        let outcome = enricher.enrich(&[gap(1), gap(2), gap(3)]).await.unwrap();
        assert_eq!(outcome.calls_made, 2);
        assert_eq!(outcome.truncated, 1);
        assert_eq!(tracker.records().len(), 2);

        let err = enricher.enrich(&[gap(3)]).await.unwrap_err();
        assert!(matches!(err, Error::EnrichmentUnavailable(_)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_calls() {
        let source = Arc::new(ScriptedSource::new(&[]));
        let cache = MemoryCache::new();
        let outcome = enricher(&source, &cache).enrich(&[]).await.unwrap();
        assert_eq!(outcome.calls_made, 0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
