//! SQLite-backed facility store

use super::{FacilityStore, LookupResult};
use crate::config::LookupConfig;
use crate::error::{Error, Result};
use crate::facility::FacilityRecord;
use crate::query::{Intent, ParsedQuery};
use crate::registry::{self, NEW_YORK_BOROUGHS};
use crate::storage::Database;
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};
use std::time::Instant;
use tracing::{debug, info, warn};

const SELECT_COLUMNS: &str = "SELECT id, npi, name, address, city, state, state_code, zip, \
     phone, fax, category, facility_type, ownership FROM facilities";

/// A lookup statement with its positional parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupSql {
    pub sql: String,
    pub params: Vec<String>,
    pub limit: i64,
}

/// Build the lookup statement for a parsed query.
///
/// Every present predicate is ANDed; the limit is `query.limit` (or the
/// page size) capped at `max_page_size`.
pub fn build_lookup_sql(query: &ParsedQuery, page_size: u32, max_page_size: u32) -> LookupSql {
    let mut conditions = vec!["is_active = 1".to_string()];
    let mut params: Vec<String> = Vec::new();

    if let Some(entity) = &query.entity_name {
        conditions.push(r"LOWER(name) LIKE LOWER(?) ESCAPE '\'".to_string());
        params.push(contains_pattern(entity));
    }

    if let Some(npi) = &query.npi {
        conditions.push("npi = ?".to_string());
        params.push(npi.clone());
    }

    let variants = query.type_variants();
    if !variants.is_empty() {
        let group =
            vec![r"LOWER(facility_type) LIKE LOWER(?) ESCAPE '\'"; variants.len()].join(" OR ");
        conditions.push(format!("({})", group));
        params.extend(variants.iter().map(|v| contains_pattern(v)));
    }

    if let Some(state) = &query.location.state {
        conditions.push("(state_code = ? OR LOWER(state) = LOWER(?))".to_string());
        params.push(state.code.clone());
        params.push(state.name.clone());
    }

    if let Some(zip) = &query.location.zip {
        conditions.push("substr(zip, 1, 5) = ?".to_string());
        params.push(zip.clone());
    }

    if let Some(city) = &query.location.city {
        let mut cities = vec![city.clone()];
        if city.eq_ignore_ascii_case("New York") {
            cities.extend(NEW_YORK_BOROUGHS.iter().map(|b| b.to_string()));
        }
        let group = vec![r"LOWER(city) LIKE LOWER(?) ESCAPE '\'"; cities.len()].join(" OR ");
        conditions.push(format!("({})", group));
        params.extend(cities.iter().map(|c| contains_pattern(c)));
    }

    let mut sql = format!("{} WHERE {}", SELECT_COLUMNS, conditions.join(" AND "));

    match (&query.entity_name, query.intent) {
        (Some(entity), Intent::Lookup) => {
            sql.push_str(" ORDER BY CASE WHEN LOWER(name) = LOWER(?) THEN 0 ELSE 1 END, name");
            params.push(entity.clone());
        }
        _ => sql.push_str(" ORDER BY name"),
    }
    sql.push_str(" LIMIT ?");

    let limit = query.limit.unwrap_or(page_size).clamp(1, max_page_size.max(1));

    LookupSql {
        sql,
        params,
        limit: i64::from(limit),
    }
}

/// `LIKE` pattern matching `text` anywhere, with wildcards in `text` taken literally
fn contains_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for ch in text.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// Facility store over the `facilities` table
#[derive(Debug, Clone)]
pub struct SqliteFacilityStore {
    pool: SqlitePool,
    page_size: u32,
    max_page_size: u32,
}

impl SqliteFacilityStore {
    pub fn new(db: &Database, config: &LookupConfig) -> Self {
        Self::from_pool(db.pool().clone(), config)
    }

    pub fn from_pool(pool: SqlitePool, config: &LookupConfig) -> Self {
        Self {
            pool,
            page_size: config.page_size,
            max_page_size: config.max_page_size,
        }
    }

    /// Insert or replace facility records by id
    pub async fn import(&self, records: &[FacilityRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(Error::DatabaseError)?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO facilities (
                    id, npi, name, address, city, state, state_code, zip,
                    phone, fax, category, facility_type, ownership, is_active
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
                ON CONFLICT(id) DO UPDATE SET
                    npi = excluded.npi,
                    name = excluded.name,
                    address = excluded.address,
                    city = excluded.city,
                    state = excluded.state,
                    state_code = excluded.state_code,
                    zip = excluded.zip,
                    phone = excluded.phone,
                    fax = excluded.fax,
                    category = excluded.category,
                    facility_type = excluded.facility_type,
                    ownership = excluded.ownership,
                    is_active = 1
                "#,
            )
            .bind(record.id)
            .bind(&record.npi)
            .bind(&record.name)
            .bind(&record.address)
            .bind(&record.city)
            .bind(&record.state)
            .bind(&record.state_code)
            .bind(&record.zip)
            .bind(&record.phone)
            .bind(&record.fax)
            .bind(&record.category)
            .bind(&record.facility_type)
            .bind(&record.ownership)
            .execute(&mut *tx)
            .await
            .map_err(Error::DatabaseError)?;
        }

        tx.commit().await.map_err(Error::DatabaseError)?;

        info!(count = records.len(), "Imported facility records");
        Ok(records.len())
    }

    /// Hide a facility from lookups without deleting it
    pub async fn deactivate(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE facilities SET is_active = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of active facilities
    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM facilities WHERE is_active = 1")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::DatabaseError)?;
        Ok(count)
    }
}

#[async_trait]
impl FacilityStore for SqliteFacilityStore {
    async fn query(&self, query: &ParsedQuery) -> Result<LookupResult> {
        let start = Instant::now();
        let statement = build_lookup_sql(query, self.page_size, self.max_page_size);

        let mut q = sqlx::query_as::<_, FacilityRow>(&statement.sql);
        for param in &statement.params {
            q = q.bind(param);
        }
        let rows = q
            .bind(statement.limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                warn!(error = %e, "Facility lookup failed");
                Error::DataStoreUnavailable(e.to_string())
            })?;

        let records: Vec<FacilityRecord> = rows.into_iter().map(FacilityRow::into_record).collect();
        let execution_time_ms = start.elapsed().as_millis() as u64;

        debug!(
            matches = records.len(),
            limit = statement.limit,
            elapsed_ms = execution_time_ms,
            "Facility lookup completed"
        );

        Ok(LookupResult {
            records,
            available_fields: self.available_fields(),
            execution_time_ms,
        })
    }

    fn available_fields(&self) -> Vec<&'static str> {
        registry::fields()
            .iter()
            .filter(|f| !f.external_only)
            .map(|f| f.name)
            .collect()
    }
}

#[derive(Debug, FromRow)]
struct FacilityRow {
    id: i64,
    npi: Option<String>,
    name: Option<String>,
    address: Option<String>,
    city: Option<String>,
    state: Option<String>,
    state_code: Option<String>,
    zip: Option<String>,
    phone: Option<String>,
    fax: Option<String>,
    category: Option<String>,
    facility_type: Option<String>,
    ownership: Option<String>,
}

impl FacilityRow {
    fn into_record(self) -> FacilityRecord {
        FacilityRecord {
            id: self.id,
            npi: self.npi,
            name: self.name,
            address: self.address,
            city: self.city,
            state: self.state,
            state_code: self.state_code,
            zip: self.zip,
            phone: self.phone,
            fax: self.fax,
            category: self.category,
            facility_type: self.facility_type,
            ownership: self.ownership,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse;

    fn record(id: i64, name: &str, city: &str, code: &str, kind: &str) -> FacilityRecord {
        FacilityRecord {
            id,
            name: Some(name.to_string()),
            city: Some(city.to_string()),
            state_code: Some(code.to_string()),
            facility_type: Some(kind.to_string()),
            phone: Some("555-0100".to_string()),
            ..Default::default()
        }
    }

    async fn store_with_fixtures() -> SqliteFacilityStore {
        let db = Database::in_memory().await.expect("in-memory db");
        let store = SqliteFacilityStore::new(&db, &LookupConfig::default());
        let mut houston = record(1, "Houston Methodist Hospital", "Houston", "TX", "Acute Care Hospital");
        houston.zip = Some("77030-2707".to_string());
        store
            .import(&[
                houston,
                record(2, "Baylor University Medical Center", "Dallas", "TX", "General Medical Hospital"),
                record(3, "Austin Urgent Care", "Austin", "TX", "Urgent Care Center"),
                record(4, "Mayo Clinic", "Rochester", "MN", "Clinic"),
                record(5, "Mayo Clinic Health System", "Mankato", "MN", "Clinic"),
                record(6, "Brooklyn Hospital Center", "Brooklyn", "NY", "Hospital"),
                record(7, "Bellevue Hospital", "New York", "NY", "Hospital"),
            ])
            .await
            .expect("import fixtures");
        store
    }

    fn ids(result: &LookupResult) -> Vec<i64> {
        result.records.iter().map(|r| r.id).collect()
    }

    #[tokio::test]
    async fn test_state_and_type_filters() {
        let store = store_with_fixtures().await;
        let result = store.query(&parse("hospitals in Texas").unwrap()).await.unwrap();
        // ordered by name
        assert_eq!(ids(&result), vec![2, 1]);
        assert!(result.available_fields.contains(&"phone"));
        assert!(!result.available_fields.contains(&"bed_count"));
    }

    #[tokio::test]
    async fn test_new_york_expands_to_boroughs() {
        let store = store_with_fixtures().await;
        let result = store.query(&parse("hospitals in Manhattan").unwrap()).await.unwrap();
        assert_eq!(ids(&result), vec![7, 6]);
    }

    #[tokio::test]
    async fn test_zip_prefix_match() {
        let store = store_with_fixtures().await;
        let result = store.query(&parse("hospitals near 77030").unwrap()).await.unwrap();
        assert_eq!(ids(&result), vec![1]);
    }

    #[tokio::test]
    async fn test_exact_entity_match_first() {
        let store = store_with_fixtures().await;
        let query = parse("Mayo Clinic phone number").unwrap();
        assert_eq!(query.entity_name.as_deref(), Some("Mayo Clinic"));
        let result = store.query(&query).await.unwrap();
        assert_eq!(ids(&result), vec![4, 5]);
    }

    #[tokio::test]
    async fn test_entity_wildcards_are_literal() {
        let store = store_with_fixtures().await;
        let query = parse("\"Mayo_Clinic\" phone").unwrap();
        assert_eq!(query.entity_name.as_deref(), Some("Mayo_Clinic"));
        // `_` would otherwise match the space in "Mayo Clinic"
        assert!(store.query(&query).await.unwrap().is_empty());

        assert_eq!(contains_pattern("10%_a\\b"), "%10\\%\\_a\\\\b%");
    }

    #[tokio::test]
    async fn test_limit_and_inactive_rows() {
        let store = store_with_fixtures().await;
        assert!(store.deactivate(2).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 6);

        let result = store.query(&parse("top 1 hospitals in Texas").unwrap()).await.unwrap();
        assert_eq!(ids(&result), vec![1]);
    }

    #[tokio::test]
    async fn test_zero_matches() {
        let store = store_with_fixtures().await;
        let result = store.query(&parse("pharmacies in Alaska").unwrap()).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_closed_store_is_unavailable() {
        let db = Database::in_memory().await.unwrap();
        let store = SqliteFacilityStore::new(&db, &LookupConfig::default());
        db.close().await;

        let err = store.query(&parse("clinics in Ohio").unwrap()).await.unwrap_err();
        assert!(matches!(err, Error::DataStoreUnavailable(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_limit_is_capped() {
        let query = parse("top 500 clinics").unwrap();
        let statement = build_lookup_sql(&query, 10, 100);
        assert_eq!(statement.limit, 100);

        let query = parse("clinics in Ohio").unwrap();
        let statement = build_lookup_sql(&query, 10, 100);
        assert_eq!(statement.limit, 10);
        assert!(statement.sql.ends_with("ORDER BY name LIMIT ?"));
        assert_eq!(statement.params.len(), 3 + 2);
    }
}
