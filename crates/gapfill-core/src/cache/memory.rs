use super::{CacheEntry, CacheKey, CacheStats, EnrichmentCache};
use crate::error::{Error, Result};
use crate::facility::FieldValue;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Process-local cache, shared by clones
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<CacheKey, CacheEntry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::CacheUnavailable("cache lock poisoned".to_string())
}

#[async_trait]
impl EnrichmentCache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    async fn batch_get(&self, keys: &[CacheKey]) -> Result<HashMap<CacheKey, CacheEntry>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(k).map(|e| (k.clone(), e.clone())))
            .collect())
    }

    async fn put(
        &self,
        facility_id: i64,
        field: &str,
        value: Option<FieldValue>,
        source: &str,
    ) -> Result<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.insert(
            CacheKey::new(facility_id, field),
            CacheEntry {
                value,
                source: source.to_string(),
                fetched_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let entries = self.entries.read().map_err(poisoned)?;
        let mut stats = CacheStats::default();
        for (key, entry) in entries.iter() {
            stats.total_entries += 1;
            if entry.value.is_none() {
                stats.unknown_entries += 1;
            }
            *stats.by_field.entry(key.field.clone()).or_insert(0) += 1;
            stats.oldest = Some(stats.oldest.map_or(entry.fetched_at, |o| o.min(entry.fetched_at)));
            stats.newest = Some(stats.newest.map_or(entry.fetched_at, |n| n.max(entry.fetched_at)));
        }
        Ok(stats)
    }
}
