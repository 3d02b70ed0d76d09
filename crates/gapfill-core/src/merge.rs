//! Merge & provenance
//!
//! Combines database rows, cached values and fresh web values into one view
//! per facility. Per field, the most recent tier with a real value wins:
//! web, then cache, then database. An unknown (`None`) answer from the cache
//! or the web never hides a lower tier.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Serialize, Serializer};

use crate::cache::{CacheEntry, CacheKey};
use crate::enrichment::FieldMap;
use crate::facility::{FacilityRecord, FieldValue};
use crate::query::FieldRequest;

/// Where a merged field value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Database,
    Cache,
    Web,
    Absent,
}

/// Summary of the tiers used for one facility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    DatabaseOnly,
    DatabaseAndCachedWeb,
    DatabaseAndWeb,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DatabaseOnly => "database_only",
            Self::DatabaseAndCachedWeb => "database + cached_web",
            Self::DatabaseAndWeb => "database + web",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DataSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One facility with its requested fields resolved across tiers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedFacility {
    pub facility: FacilityRecord,
    /// Requested fields that have a value
    pub values: BTreeMap<String, FieldValue>,
    /// Every requested field, including absent ones
    pub provenance: BTreeMap<String, Provenance>,
    pub data_source: DataSource,
}

impl EnrichedFacility {
    pub fn id(&self) -> i64 {
        self.facility.id
    }

    pub fn value(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn provenance(&self, field: &str) -> Provenance {
        self.provenance
            .get(field)
            .copied()
            .unwrap_or(Provenance::Absent)
    }
}

/// Merge every record's requested fields; records keep their order
pub fn merge(
    records: &[FacilityRecord],
    cache_hits: &HashMap<CacheKey, CacheEntry>,
    web_hits: &HashMap<i64, FieldMap>,
    fields: &[FieldRequest],
) -> Vec<EnrichedFacility> {
    records
        .iter()
        .map(|record| merge_one(record, cache_hits, web_hits.get(&record.id), fields))
        .collect()
}

fn merge_one(
    record: &FacilityRecord,
    cache_hits: &HashMap<CacheKey, CacheEntry>,
    web: Option<&FieldMap>,
    fields: &[FieldRequest],
) -> EnrichedFacility {
    let mut values = BTreeMap::new();
    let mut provenance = BTreeMap::new();

    for field in fields {
        let name = field.name();

        let from_web = web
            .and_then(|w| w.get(name))
            .and_then(|v| v.clone())
            .filter(|v| !v.is_empty())
            .map(|v| (v, Provenance::Web));
        let resolved = from_web
            .or_else(|| {
                cache_hits
                    .get(&CacheKey::new(record.id, name))
                    .and_then(|e| e.value.clone())
                    .filter(|v| !v.is_empty())
                    .map(|v| (v, Provenance::Cache))
            })
            .or_else(|| record.value(name).map(|v| (v, Provenance::Database)));

        match resolved {
            Some((value, source)) => {
                values.insert(name.to_string(), value);
                provenance.insert(name.to_string(), source);
            }
            None => {
                provenance.insert(name.to_string(), Provenance::Absent);
            }
        }
    }

    let data_source = if provenance.values().any(|p| *p == Provenance::Web) {
        DataSource::DatabaseAndWeb
    } else if provenance.values().any(|p| *p == Provenance::Cache) {
        DataSource::DatabaseAndCachedWeb
    } else {
        DataSource::DatabaseOnly
    };

    EnrichedFacility {
        facility: record.clone(),
        values,
        provenance,
        data_source,
    }
}

/// One-line explanation of the tiers used across a result set
pub fn explain_sources(facilities: &[EnrichedFacility]) -> String {
    let web = facilities
        .iter()
        .filter(|f| f.data_source == DataSource::DatabaseAndWeb)
        .count();
    let cached = facilities
        .iter()
        .filter(|f| f.data_source == DataSource::DatabaseAndCachedWeb)
        .count();

    match (web, cached) {
        (0, 0) => "All data from the facility database".to_string(),
        (0, c) => format!("Facility database plus cached web data for {} facilities", c),
        (w, 0) => format!("Facility database plus fresh web data for {} facilities", w),
        (w, c) => format!(
            "Facility database plus fresh web data for {} and cached web data for {} facilities",
            w, c
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn req(names: &[&str]) -> Vec<FieldRequest> {
        names.iter().map(|n| FieldRequest::named(n).unwrap()).collect()
    }

    fn record() -> FacilityRecord {
        FacilityRecord {
            id: 1,
            name: Some("Texas Children's Hospital".into()),
            phone: Some("832-824-1000".into()),
            ..Default::default()
        }
    }

    fn cached(id: i64, field: &str, value: Option<FieldValue>) -> (CacheKey, CacheEntry) {
        (
            CacheKey::new(id, field),
            CacheEntry {
                value,
                source: "web:sonar".into(),
                fetched_at: Utc::now(),
            },
        )
    }

    #[test]
    fn test_database_only() {
        let merged = merge(&[record()], &HashMap::new(), &HashMap::new(), &req(&["name", "phone"]));
        assert_eq!(merged[0].data_source, DataSource::DatabaseOnly);
        assert_eq!(merged[0].provenance("phone"), Provenance::Database);
    }

    #[test]
    fn test_precedence_web_over_cache_over_database() {
        let cache: HashMap<_, _> = [
            cached(1, "phone", Some(FieldValue::from("000"))),
            cached(1, "bed_count", Some(FieldValue::Integer(300))),
        ]
        .into_iter()
        .collect();
        let web: HashMap<i64, FieldMap> =
            [(1, [("bed_count".to_string(), Some(FieldValue::Integer(973)))].into_iter().collect())]
                .into_iter()
                .collect();

        let merged = &merge(&[record()], &cache, &web, &req(&["phone", "bed_count"]))[0];

        assert_eq!(merged.value("bed_count"), Some(&FieldValue::Integer(973)));
        assert_eq!(merged.provenance("bed_count"), Provenance::Web);
        assert_eq!(merged.value("phone"), Some(&FieldValue::from("000")));
        assert_eq!(merged.provenance("phone"), Provenance::Cache);
        assert_eq!(merged.data_source, DataSource::DatabaseAndWeb);
    }

    #[test]
    fn test_unknown_never_overrides() {
        let cache: HashMap<_, _> = [cached(1, "phone", None)].into_iter().collect();
        let web: HashMap<i64, FieldMap> =
            [(1, [("phone".to_string(), None)].into_iter().collect())].into_iter().collect();

        let merged = &merge(&[record()], &cache, &web, &req(&["phone"]))[0];
        assert_eq!(merged.value("phone"), Some(&FieldValue::from("832-824-1000")));
        assert_eq!(merged.provenance("phone"), Provenance::Database);
        assert_eq!(merged.data_source, DataSource::DatabaseOnly);
    }

    #[test]
    fn test_absent_fields_and_cached_summary() {
        let cache: HashMap<_, _> =
            [cached(1, "rating", Some(FieldValue::Number(4.5)))].into_iter().collect();

        let merged = &merge(&[record()], &cache, &HashMap::new(), &req(&["rating", "email"]))[0];
        assert_eq!(merged.provenance("email"), Provenance::Absent);
        assert!(merged.value("email").is_none());
        assert_eq!(merged.data_source.to_string(), "database + cached_web");
    }

    #[test]
    fn test_input_records_untouched_and_order_kept() {
        let mut second = record();
        second.id = 2;
        let records = vec![record(), second];
        let before = records.clone();

        let merged = merge(&records, &HashMap::new(), &HashMap::new(), &req(&["name"]));
        assert_eq!(records, before);
        assert_eq!(merged.iter().map(|m| m.id()).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_explain_sources() {
        let merged = merge(&[record()], &HashMap::new(), &HashMap::new(), &req(&["name"]));
        assert_eq!(explain_sources(&merged), "All data from the facility database");
        assert_eq!(explain_sources(&[]), "All data from the facility database");
    }

    #[test]
    fn test_data_source_serializes_as_label() {
        assert_eq!(
            serde_json::to_string(&DataSource::DatabaseAndWeb).unwrap(),
            "\"database + web\""
        );
    }
}
