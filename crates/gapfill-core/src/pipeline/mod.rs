//! Search orchestration
//!
//! Drives one request through the stages
//! `Intake -> Lookup -> GapAnalysis -> CacheCheck -> Enrich -> CacheWrite -> Merge -> Done`,
//! short-circuiting forward when a stage leaves nothing to do. There is no
//! retry loop: only intake and lookup failures end a request, everything on
//! the enrichment path degrades into warnings.

mod response;

pub use crate::cost::PipelineStage;
pub use response::{PipelineWarning, SearchResponse};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheKey, EnrichmentCache};
use crate::config::EnrichmentConfig;
use crate::cost::{CostTracker, RequestTelemetry};
use crate::enrichment::{BatchEnricher, FieldMap, KnowledgeSource};
use crate::error::{Error, Result};
use crate::gaps::{DataGap, detect_gaps};
use crate::lookup::FacilityStore;
use crate::merge::{EnrichedFacility, explain_sources, merge};
use crate::query::{self, Criterion};

/// The hybrid lookup pipeline with its collaborators
#[derive(Clone)]
pub struct HybridSearch {
    store: Arc<dyn FacilityStore>,
    cache: Arc<dyn EnrichmentCache>,
    enricher: Option<BatchEnricher>,
    unit_cost_usd: f64,
}

impl std::fmt::Debug for HybridSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridSearch")
            .field("enricher", &self.enricher)
            .field("unit_cost_usd", &self.unit_cost_usd)
            .finish()
    }
}

/// Builder for creating a HybridSearch
#[derive(Default)]
pub struct HybridSearchBuilder {
    store: Option<Arc<dyn FacilityStore>>,
    cache: Option<Arc<dyn EnrichmentCache>>,
    source: Option<Arc<dyn KnowledgeSource>>,
    tracker: Option<CostTracker>,
    config: Option<EnrichmentConfig>,
}

impl HybridSearchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: Arc<dyn FacilityStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn EnrichmentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Without a source, gaps the cache cannot answer stay unfilled
    pub fn knowledge_source(mut self, source: Arc<dyn KnowledgeSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn cost_tracker(mut self, tracker: CostTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn enrichment_config(mut self, config: EnrichmentConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<HybridSearch> {
        let store = self
            .store
            .ok_or_else(|| Error::ConfigError("a facility store is required".to_string()))?;
        let cache = self
            .cache
            .ok_or_else(|| Error::ConfigError("an enrichment cache is required".to_string()))?;
        let config = self.config.unwrap_or_default();

        let enricher = self.source.map(|source| {
            let enricher = BatchEnricher::from_config(source, Arc::clone(&cache), &config);
            match self.tracker {
                Some(tracker) => enricher.with_cost_tracker(tracker),
                None => enricher,
            }
        });

        Ok(HybridSearch {
            store,
            cache,
            enricher,
            unit_cost_usd: config.unit_cost_usd,
        })
    }
}

impl HybridSearch {
    pub fn builder() -> HybridSearchBuilder {
        HybridSearchBuilder::new()
    }

    /// Answer a free-text query
    ///
    /// Fails only with `InvalidQuery` or `DataStoreUnavailable`.
    pub async fn search(&self, raw: &str) -> Result<SearchResponse> {
        let mut telemetry = RequestTelemetry::new(self.unit_cost_usd);
        let mut warnings: Vec<PipelineWarning> = Vec::new();

        let started = Instant::now();
        let mut query = query::parse(raw)?;
        telemetry.record_stage(PipelineStage::Intake, started.elapsed());
        debug!(
            stage = %PipelineStage::Intake,
            intent = ?query.intent,
            fields = ?query.field_names(),
            "Query parsed"
        );

        let started = Instant::now();
        let mut lookup = self.store.query(&query).await?;
        if lookup.is_empty() && query.corrected != raw.trim() {
            // a correction may have rewritten a real name; retry as typed
            let verbatim = query::parse_verbatim(raw)?;
            let retry = self.store.query(&verbatim).await?;
            if !retry.is_empty() {
                debug!(corrected = %query.corrected, "Spelling correction discarded");
                query = verbatim;
                lookup = retry;
            }
        }
        telemetry.record_stage(PipelineStage::Lookup, started.elapsed());
        info!(
            stage = %PipelineStage::Lookup,
            records = lookup.records.len(),
            elapsed_ms = lookup.execution_time_ms,
            "Lookup complete"
        );

        if lookup.is_empty() {
            return Ok(self.finish(query, Vec::new(), warnings, telemetry));
        }

        let started = Instant::now();
        let gaps = detect_gaps(&lookup.records, &query.fields, &lookup.available_fields);
        telemetry.record_stage(PipelineStage::GapAnalysis, started.elapsed());
        debug!(stage = %PipelineStage::GapAnalysis, gaps = gaps.len(), "Gaps detected");

        let mut cache_hits: HashMap<CacheKey, CacheEntry> = HashMap::new();
        let mut web_hits: HashMap<i64, FieldMap> = HashMap::new();

        if !gaps.is_empty() {
            let started = Instant::now();
            cache_hits = self.check_cache(&gaps, &mut warnings).await;
            let unresolved: Vec<DataGap> = gaps
                .iter()
                .filter(|gap| !is_resolved(gap, &cache_hits))
                .cloned()
                .collect();
            telemetry.cache_hits = (gaps.len() - unresolved.len()) as u32;
            telemetry.cache_misses = unresolved.len() as u32;
            telemetry.record_stage(PipelineStage::CacheCheck, started.elapsed());
            info!(
                stage = %PipelineStage::CacheCheck,
                hits = telemetry.cache_hits,
                misses = telemetry.cache_misses,
                "Cache checked"
            );

            if !unresolved.is_empty() {
                web_hits = self.enrich(&unresolved, &mut telemetry, &mut warnings).await;
            }
        }

        let started = Instant::now();
        let merged = merge(&lookup.records, &cache_hits, &web_hits, &query.fields);
        let facilities = apply_criteria(merged, &query.criteria);
        telemetry.record_stage(PipelineStage::Merge, started.elapsed());

        Ok(self.finish(query, facilities, warnings, telemetry))
    }

    async fn check_cache(
        &self,
        gaps: &[DataGap],
        warnings: &mut Vec<PipelineWarning>,
    ) -> HashMap<CacheKey, CacheEntry> {
        let keys: Vec<CacheKey> = gaps
            .iter()
            .flat_map(|gap| {
                gap.missing_fields
                    .iter()
                    .map(move |f| CacheKey::new(gap.facility_id, f.name()))
            })
            .collect();

        match self.cache.batch_get(&keys).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(code = e.code(), error = %e, "Cache check failed, treating as misses");
                push_unique(warnings, PipelineWarning::from(&e));
                HashMap::new()
            }
        }
    }

    async fn enrich(
        &self,
        unresolved: &[DataGap],
        telemetry: &mut RequestTelemetry,
        warnings: &mut Vec<PipelineWarning>,
    ) -> HashMap<i64, FieldMap> {
        let Some(enricher) = &self.enricher else {
            warn!(
                unresolved = unresolved.len(),
                "No knowledge source configured, leaving gaps unfilled"
            );
            push_unique(
                warnings,
                PipelineWarning::new("E200", "Enrichment unavailable: no knowledge source configured"),
            );
            return HashMap::new();
        };

        let started = Instant::now();
        let outcome = enricher.enrich(unresolved).await;
        telemetry.record_stage(PipelineStage::Enrich, started.elapsed());

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                push_unique(warnings, PipelineWarning::from(&e));
                return HashMap::new();
            }
        };

        telemetry.external_calls = outcome.calls_made;
        telemetry.external_failures = outcome.failures.len() as u32;
        telemetry.truncated = outcome.truncated;
        telemetry.record_stage(
            PipelineStage::CacheWrite,
            std::time::Duration::from_millis(outcome.cache_write_ms),
        );

        if let Some(reason) = &outcome.aborted {
            push_unique(warnings, PipelineWarning::from(reason));
        }
        for failure in &outcome.failures {
            push_unique(warnings, PipelineWarning::new(failure.code, failure.message.clone()));
        }

        info!(
            stage = %PipelineStage::Enrich,
            calls = outcome.calls_made,
            enriched = outcome.results.len(),
            "Enrichment complete"
        );
        outcome.results
    }

    fn finish(
        &self,
        query: query::ParsedQuery,
        facilities: Vec<EnrichedFacility>,
        warnings: Vec<PipelineWarning>,
        telemetry: RequestTelemetry,
    ) -> SearchResponse {
        let explanation = explain_sources(&facilities);
        info!(
            stage = %PipelineStage::Done,
            results = facilities.len(),
            calls = telemetry.external_calls,
            hit_rate = telemetry.cache_hit_rate(),
            elapsed_ms = telemetry.total_ms(),
            "Search complete"
        );
        SearchResponse::new(query, facilities, explanation, warnings, telemetry)
    }
}

/// A gap is cache-resolved only when every missing field has an entry
fn is_resolved(gap: &DataGap, hits: &HashMap<CacheKey, CacheEntry>) -> bool {
    gap.missing_fields
        .iter()
        .all(|f| hits.contains_key(&CacheKey::new(gap.facility_id, f.name())))
}

/// Keep facilities whose merged values satisfy every criterion
pub fn apply_criteria(
    facilities: Vec<EnrichedFacility>,
    criteria: &[Criterion],
) -> Vec<EnrichedFacility> {
    if criteria.is_empty() {
        return facilities;
    }
    facilities
        .into_iter()
        .filter(|facility| {
            criteria.iter().all(|c| {
                facility
                    .value(c.field.name())
                    .and_then(|v| v.as_f64())
                    .is_some_and(|v| c.comparison.matches(v))
            })
        })
        .collect()
}

fn push_unique(warnings: &mut Vec<PipelineWarning>, warning: PipelineWarning) {
    if !warnings.iter().any(|w| w.code == warning.code) {
        warnings.push(warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::LookupConfig;
    use crate::enrichment::SourceAnswer;
    use crate::facility::{FacilityRecord, FieldValue};
    use crate::lookup::SqliteFacilityStore;
    use crate::merge::{DataSource, Provenance};
    use crate::query::{Comparison, FieldRequest};
    use crate::storage::Database;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedSource {
        reply: &'static str,
        calls: AtomicU32,
    }

    #[async_trait]
    impl KnowledgeSource for FixedSource {
        fn model(&self) -> &str {
            "sonar"
        }

        async fn ask(&self, _gap: &DataGap) -> Result<SourceAnswer> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SourceAnswer::text(self.reply))
        }
    }

    fn facility(id: i64, name: &str, city: &str) -> FacilityRecord {
        FacilityRecord {
            id,
            name: Some(name.into()),
            address: Some(format!("{} Main St", id)),
            city: Some(city.into()),
            state: Some("Texas".into()),
            state_code: Some("TX".into()),
            phone: Some("555-0100".into()),
            facility_type: Some("Hospital".into()),
            ..Default::default()
        }
    }

    async fn store_with(records: &[FacilityRecord]) -> Arc<SqliteFacilityStore> {
        let db = Database::in_memory().await.unwrap();
        let store = SqliteFacilityStore::new(&db, &LookupConfig::default());
        store.import(records).await.unwrap();
        Arc::new(store)
    }

    async fn store() -> Arc<SqliteFacilityStore> {
        store_with(&[
            facility(1, "Austin General Hospital", "Austin"),
            facility(2, "Dallas Regional Hospital", "Dallas"),
        ])
        .await
    }

    /// A cache whose backend is always down
    struct DownCache;

    #[async_trait]
    impl EnrichmentCache for DownCache {
        async fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>> {
            Err(Error::CacheUnavailable("database is locked".into()))
        }

        async fn batch_get(&self, _keys: &[CacheKey]) -> Result<HashMap<CacheKey, CacheEntry>> {
            Err(Error::CacheUnavailable("database is locked".into()))
        }

        async fn put(
            &self,
            _facility_id: i64,
            _field: &str,
            _value: Option<FieldValue>,
            _source: &str,
        ) -> Result<()> {
            Err(Error::CacheUnavailable("database is locked".into()))
        }

        async fn stats(&self) -> Result<crate::cache::CacheStats> {
            Err(Error::CacheUnavailable("database is locked".into()))
        }
    }

    fn search(
        store: Arc<SqliteFacilityStore>,
        cache: &MemoryCache,
        source: Option<Arc<FixedSource>>,
    ) -> HybridSearch {
        let mut builder = HybridSearch::builder()
            .store(store)
            .cache(Arc::new(cache.clone()));
        if let Some(source) = source {
            builder = builder.knowledge_source(source);
        }
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn test_database_only_request_makes_no_calls() {
        let source = Arc::new(FixedSource { reply: "{}", calls: AtomicU32::new(0) });
        let cache = MemoryCache::new();
        let response = search(store().await, &cache, Some(source.clone()))
            .search("hospitals in Texas")
            .await
            .unwrap();

        assert_eq!(response.results_count, 2);
        assert!(!response.web_search_performed);
        assert_eq!(response.cache_hit_rate, 0.0);
        assert_eq!(response.facilities[0].data_source, DataSource::DatabaseOnly);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_matches_short_circuits() {
        let cache = MemoryCache::new();
        let response = search(store().await, &cache, None)
            .search("hospitals in Ohio with more than 10 beds")
            .await
            .unwrap();

        assert_eq!(response.results_count, 0);
        assert_eq!(response.estimated_cost_usd, 0.0);
        assert!(response.telemetry.stage_ms(PipelineStage::GapAnalysis).is_none());
    }

    #[tokio::test]
    async fn test_gaps_filled_from_web_and_cached() {
        let source = Arc::new(FixedSource {
            reply: r#"{"bed_count": 410}"#,
            calls: AtomicU32::new(0),
        });
        let cache = MemoryCache::new();
        let pipeline = search(store().await, &cache, Some(source.clone()));

        let first = pipeline.search("hospitals in Texas with beds").await.unwrap();
        assert_eq!(first.telemetry.external_calls, 2);
        assert!(first.web_search_performed);
        assert_eq!(first.facilities[0].provenance("bed_count"), Provenance::Web);
        assert_eq!(cache.len(), 2);

        let second = pipeline.search("hospitals in Texas with beds").await.unwrap();
        assert_eq!(second.telemetry.external_calls, 0);
        assert_eq!(second.cache_hit_rate, 1.0);
        assert_eq!(second.facilities[0].provenance("bed_count"), Provenance::Cache);
        assert_eq!(second.facilities[0].value("bed_count"), Some(&FieldValue::Integer(410)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_source_is_a_warning() {
        let cache = MemoryCache::new();
        let response = search(store().await, &cache, None)
            .search("hospitals in Texas with websites")
            .await
            .unwrap();

        assert_eq!(response.results_count, 2);
        assert!(response.has_warning("E200"));
        assert_eq!(response.facilities[0].provenance("website"), Provenance::Absent);
    }

    #[tokio::test]
    async fn test_cache_outage_degrades_to_enrichment() {
        let source = Arc::new(FixedSource {
            reply: r#"{"bed_count": 410}"#,
            calls: AtomicU32::new(0),
        });
        let pipeline = HybridSearch::builder()
            .store(store().await)
            .cache(Arc::new(DownCache))
            .knowledge_source(source.clone())
            .build()
            .unwrap();

        for round in 1..=2u32 {
            let response = pipeline.search("hospitals in Texas with beds").await.unwrap();
            assert_eq!(response.results_count, 2);
            assert!(response.has_warning("E300"));
            assert_eq!(response.cache_hit_rate, 0.0);
            assert_eq!(response.telemetry.external_calls, 2);
            assert_eq!(response.facilities[0].value("bed_count"), Some(&FieldValue::Integer(410)));
            assert_eq!(source.calls.load(Ordering::SeqCst), 2 * round);
        }
    }

    #[tokio::test]
    async fn test_facility_name_is_not_spell_corrected() {
        let cache = MemoryCache::new();
        let store = store_with(&[
            facility(1, "Parkland Memorial Hospital", "Dallas"),
            facility(2, "Dallas Regional Hospital", "Dallas"),
        ])
        .await;
        let response = search(store, &cache, None)
            .search("Parkland Memorial Hospital phone")
            .await
            .unwrap();

        assert_eq!(response.results_count, 1);
        assert_eq!(response.facilities[0].id(), 1);
    }

    #[tokio::test]
    async fn test_lookup_retries_uncorrected_text() {
        let cache = MemoryCache::new();
        let store = store_with(&[facility(7, "Parkland Memorial Hospital", "Dallas")]).await;
        let response = search(store, &cache, None)
            .search("hospitals named Parkland")
            .await
            .unwrap();

        assert_eq!(response.results_count, 1);
        assert_eq!(response.facilities[0].id(), 7);
        assert_eq!(response.query.corrected, "hospitals named Parkland");
        assert_eq!(response.query.entity_name.as_deref(), Some("Parkland"));
    }

    #[tokio::test]
    async fn test_invalid_query_is_fatal() {
        let cache = MemoryCache::new();
        let err = search(store().await, &cache, None).search("   ").await.unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    #[test]
    fn test_builder_requires_store_and_cache() {
        assert!(HybridSearch::builder().build().is_err());
        assert!(
            HybridSearch::builder()
                .cache(Arc::new(MemoryCache::new()))
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_criteria_exclude_missing_values() {
        let fields = vec![FieldRequest::named("bed_count").unwrap()];
        let web: HashMap<i64, FieldMap> = [(
            1,
            [("bed_count".to_string(), Some(FieldValue::Integer(450)))]
                .into_iter()
                .collect(),
        )]
        .into_iter()
        .collect();
        let merged = merge(
            &[facility(1, "A Hospital", "Austin"), facility(2, "B Hospital", "Dallas")],
            &HashMap::new(),
            &web,
            &fields,
        );
        let criteria = vec![Criterion {
            field: fields[0],
            comparison: Comparison::Gt { value: 300.0 },
        }];

        let kept = apply_criteria(merged, &criteria);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id(), 1);
    }
}
