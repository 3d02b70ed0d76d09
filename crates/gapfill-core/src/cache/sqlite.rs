use super::{CacheEntry, CacheKey, CacheStats, EnrichmentCache};
use crate::error::{Error, Result};
use crate::facility::FieldValue;
use crate::storage::Database;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{FromRow, SqlitePool};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

/// Facility ids per `IN (...)` batch, well under SQLite's parameter limit
const BATCH_CHUNK: usize = 500;

/// Durable cache over the `enrichment_cache` table
#[derive(Debug, Clone)]
pub struct SqliteEnrichmentCache {
    pool: SqlitePool,
}

impl SqliteEnrichmentCache {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Remove every entry for one facility
    pub async fn invalidate(&self, facility_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM enrichment_cache WHERE facility_id = ?")
            .bind(facility_id)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(result.rows_affected())
    }
}

fn unavailable(e: sqlx::Error) -> Error {
    Error::CacheUnavailable(e.to_string())
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[async_trait]
impl EnrichmentCache for SqliteEnrichmentCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let row = sqlx::query_as::<_, CacheRow>(
            "SELECT facility_id, field_name, field_value, source, fetched_at \
             FROM enrichment_cache WHERE facility_id = ? AND field_name = ?",
        )
        .bind(key.facility_id)
        .bind(&key.field)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(row.and_then(|r| r.into_entry().map(|(_, entry)| entry)))
    }

    async fn batch_get(&self, keys: &[CacheKey]) -> Result<HashMap<CacheKey, CacheEntry>> {
        let wanted: HashSet<&CacheKey> = keys.iter().collect();
        let ids: Vec<i64> = keys
            .iter()
            .map(|k| k.facility_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut hits = HashMap::new();
        for chunk in ids.chunks(BATCH_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT facility_id, field_name, field_value, source, fetched_at \
                 FROM enrichment_cache WHERE facility_id IN ({})",
                placeholders
            );
            let mut q = sqlx::query_as::<_, CacheRow>(&sql);
            for id in chunk {
                q = q.bind(*id);
            }
            let rows = q.fetch_all(&self.pool).await.map_err(unavailable)?;

            for row in rows {
                if let Some((key, entry)) = row.into_entry() {
                    if wanted.contains(&key) {
                        hits.insert(key, entry);
                    }
                }
            }
        }

        debug!(requested = keys.len(), hits = hits.len(), "Cache batch lookup");
        Ok(hits)
    }

    async fn put(
        &self,
        facility_id: i64,
        field: &str,
        value: Option<FieldValue>,
        source: &str,
    ) -> Result<()> {
        let encoded = value.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO enrichment_cache (facility_id, field_name, field_value, source, fetched_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(facility_id, field_name) DO UPDATE SET
                field_value = excluded.field_value,
                source = excluded.source,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(facility_id)
        .bind(field)
        .bind(encoded)
        .bind(source)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        debug!(facility_id, field, source, "Cached enrichment value");
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let (total, unknown, oldest, newest): (i64, i64, Option<String>, Option<String>) =
            sqlx::query_as(
                "SELECT COUNT(*), COALESCE(SUM(CASE WHEN field_value IS NULL THEN 1 ELSE 0 END), 0), \
                 MIN(fetched_at), MAX(fetched_at) FROM enrichment_cache",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?;

        let per_field: Vec<(String, i64)> = sqlx::query_as(
            "SELECT field_name, COUNT(*) FROM enrichment_cache GROUP BY field_name ORDER BY field_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(CacheStats {
            total_entries: total as u64,
            unknown_entries: unknown as u64,
            by_field: per_field
                .into_iter()
                .map(|(field, count)| (field, count as u64))
                .collect(),
            oldest: oldest.as_deref().and_then(parse_timestamp),
            newest: newest.as_deref().and_then(parse_timestamp),
        })
    }
}

#[derive(Debug, FromRow)]
struct CacheRow {
    facility_id: i64,
    field_name: String,
    field_value: Option<String>,
    source: String,
    fetched_at: String,
}

impl CacheRow {
    /// Decode a row; undecodable rows are skipped as misses
    fn into_entry(self) -> Option<(CacheKey, CacheEntry)> {
        let value = match self.field_value.as_deref().map(serde_json::from_str::<FieldValue>) {
            None => None,
            Some(Ok(v)) => Some(v),
            Some(Err(e)) => {
                warn!(
                    facility_id = self.facility_id,
                    field = %self.field_name,
                    error = %e,
                    "Skipping undecodable cache entry"
                );
                return None;
            }
        };
        let fetched_at = parse_timestamp(&self.fetched_at).unwrap_or_else(Utc::now);

        Some((
            CacheKey::new(self.facility_id, self.field_name),
            CacheEntry {
                value,
                source: self.source,
                fetched_at,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::contract;

    async fn cache() -> SqliteEnrichmentCache {
        let db = Database::in_memory().await.expect("in-memory db");
        SqliteEnrichmentCache::new(&db)
    }

    #[tokio::test]
    async fn test_unknown_key_is_absent() {
        contract::unknown_key_is_absent(&cache().await).await;
    }

    #[tokio::test]
    async fn test_put_then_get() {
        contract::put_then_get(&cache().await).await;
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        contract::put_overwrites(&cache().await).await;
    }

    #[tokio::test]
    async fn test_unknown_value_is_an_entry() {
        contract::unknown_value_is_an_entry(&cache().await).await;
    }

    #[tokio::test]
    async fn test_batch_get_returns_only_hits() {
        contract::batch_get_returns_only_hits(&cache().await).await;
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        let db = Database::open(&path).await.unwrap();
        SqliteEnrichmentCache::new(&db)
            .put(7, "specialties", Some(FieldValue::List(vec!["Cardiology".into()])), "web:sonar")
            .await
            .unwrap();
        db.close().await;

        let db = Database::open(&path).await.unwrap();
        let entry = SqliteEnrichmentCache::new(&db)
            .get(&CacheKey::new(7, "specialties"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.value, Some(FieldValue::List(vec!["Cardiology".into()])));
    }

    #[tokio::test]
    async fn test_invalidate_and_closed_backend() {
        let db = Database::in_memory().await.unwrap();
        let cache = SqliteEnrichmentCache::new(&db);
        cache.put(1, "email", None, "web:sonar").await.unwrap();
        cache.put(1, "website", None, "web:sonar").await.unwrap();
        assert_eq!(cache.invalidate(1).await.unwrap(), 2);

        db.close().await;
        let err = cache.get(&CacheKey::new(1, "email")).await.unwrap_err();
        assert!(matches!(err, Error::CacheUnavailable(_)));
        assert!(!err.is_fatal());
    }
}
