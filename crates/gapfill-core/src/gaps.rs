//! Gap analysis
//!
//! Decides, per facility, which requested fields the canonical store cannot
//! answer and builds the phrase an external source is searched with.

use crate::facility::FacilityRecord;
use crate::query::FieldRequest;
use serde::Serialize;

/// Requested fields one facility is missing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataGap {
    pub facility_id: i64,
    pub name: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub missing_fields: Vec<FieldRequest>,
    pub search_phrase: String,
}

impl DataGap {
    pub fn field_names(&self) -> Vec<&'static str> {
        self.missing_fields.iter().map(|f| f.name()).collect()
    }
}

/// Detect gaps across lookup results.
///
/// A field is gapped for a record when it was requested and is either
/// external-only, not held by the store, or empty on that record. Records
/// keep their order; facilities without gaps are skipped.
pub fn detect_gaps(
    records: &[FacilityRecord],
    fields: &[FieldRequest],
    available_fields: &[&str],
) -> Vec<DataGap> {
    let mut requested: Vec<FieldRequest> = Vec::with_capacity(fields.len());
    for field in fields {
        if !requested.contains(field) {
            requested.push(*field);
        }
    }

    records
        .iter()
        .filter_map(|record| {
            let missing: Vec<FieldRequest> = requested
                .iter()
                .copied()
                .filter(|f| {
                    f.spec.external_only
                        || !available_fields.contains(&f.name())
                        || record.value(f.name()).is_none()
                })
                .collect();

            if missing.is_empty() {
                return None;
            }

            Some(DataGap {
                facility_id: record.id,
                name: record.display_name().to_string(),
                city: record.city.clone(),
                state: record.state_label().map(str::to_string),
                search_phrase: build_search_phrase(record, &missing),
                missing_fields: missing,
            })
        })
        .collect()
}

/// Facility identity followed by each missing field's search keyword
pub fn build_search_phrase(record: &FacilityRecord, missing: &[FieldRequest]) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(name) = record.name.as_deref() {
        parts.push(name);
    }
    if let Some(city) = record.city.as_deref() {
        parts.push(city);
    }
    if let Some(state) = record.state_label() {
        parts.push(state);
    }
    parts.extend(missing.iter().map(|f| f.spec.search_keyword()));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;

    fn req(names: &[&str]) -> Vec<FieldRequest> {
        names.iter().map(|n| FieldRequest::named(n).unwrap()).collect()
    }

    fn available() -> Vec<&'static str> {
        registry::fields()
            .iter()
            .filter(|f| !f.external_only)
            .map(|f| f.name)
            .collect()
    }

    fn mayo() -> FacilityRecord {
        FacilityRecord {
            id: 4,
            name: Some("Mayo Clinic".into()),
            city: Some("Rochester".into()),
            state: Some("Minnesota".into()),
            phone: Some("507-284-2511".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_external_only_always_gapped() {
        let gaps = detect_gaps(&[mayo()], &req(&["phone", "bed_count"]), &available());
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].field_names(), vec!["bed_count"]);
        assert_eq!(
            gaps[0].search_phrase,
            "Mayo Clinic Rochester Minnesota bed count capacity"
        );
    }

    #[test]
    fn test_store_field_present_is_not_gapped() {
        let gaps = detect_gaps(&[mayo()], &req(&["name", "phone"]), &available());
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_empty_store_value_is_gapped() {
        let mut record = mayo();
        record.phone = Some(String::new());
        let gaps = detect_gaps(&[record], &req(&["phone", "fax"]), &available());
        assert_eq!(gaps[0].field_names(), vec!["phone", "fax"]);
    }

    #[test]
    fn test_field_missing_from_store_schema_is_gapped() {
        let gaps = detect_gaps(&[mayo()], &req(&["phone"]), &["name"]);
        assert_eq!(gaps[0].field_names(), vec!["phone"]);
    }

    #[test]
    fn test_duplicates_collapse_and_order_kept() {
        let mut other = mayo();
        other.id = 9;
        other.name = Some("Mayo Clinic Health System".into());
        let gaps = detect_gaps(
            &[mayo(), other],
            &req(&["website", "bed_count", "website"]),
            &available(),
        );
        assert_eq!(gaps.iter().map(|g| g.facility_id).collect::<Vec<_>>(), vec![4, 9]);
        assert_eq!(gaps[0].field_names(), vec!["website", "bed_count"]);
        // no registry keyword: falls back to the field name
        assert!(gaps[0].search_phrase.contains("Minnesota website bed count capacity"));
    }

    #[test]
    fn test_no_records_no_gaps() {
        assert!(detect_gaps(&[], &req(&["bed_count"]), &available()).is_empty());
    }
}
