//! Facility records and field values

use serde::{Deserialize, Serialize};
use std::fmt;

/// A typed field value
///
/// Serialized without a tag so cached values read back as plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Boolean(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    /// Numeric view used by criteria filtering
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(n) => Some(*n as f64),
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().replace(',', "").parse().ok(),
            Self::Boolean(_) | Self::List(_) => None,
        }
    }

    /// Empty text or an empty list counts as absent
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::List(items) => items.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{}", if *b { "yes" } else { "no" }),
            Self::Integer(n) => write!(f, "{}", n),
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s),
            Self::List(items) => write!(f, "{}", items.join(", ")),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

/// A canonical facility row; read-only to the pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityRecord {
    pub id: i64,
    #[serde(default)]
    pub npi: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    /// Full state name
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub state_code: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub fax: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub facility_type: Option<String>,
    #[serde(default)]
    pub ownership: Option<String>,
}

impl FacilityRecord {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Value of a canonical store field; empty strings are treated as absent
    pub fn value(&self, field: &str) -> Option<FieldValue> {
        let raw = match field {
            "npi" => &self.npi,
            "name" => &self.name,
            "address" => &self.address,
            "city" => &self.city,
            "state" => &self.state,
            "zip" => &self.zip,
            "phone" => &self.phone,
            "fax" => &self.fax,
            "category" => &self.category,
            "facility_type" => &self.facility_type,
            "ownership" => &self.ownership,
            _ => return None,
        };
        raw.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(FieldValue::from)
    }

    /// Display name, or a placeholder for unnamed rows
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("(unnamed facility)")
    }

    /// State for search phrases: full name when known, else the code
    pub fn state_label(&self) -> Option<&str> {
        self.state.as_deref().or(self.state_code.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_treats_empty_as_absent() {
        let mut record = FacilityRecord::new(1, "Mayo Clinic");
        record.phone = Some("   ".to_string());
        record.city = Some("Rochester".to_string());

        assert_eq!(record.value("name"), Some(FieldValue::from("Mayo Clinic")));
        assert_eq!(record.value("city"), Some(FieldValue::from("Rochester")));
        assert_eq!(record.value("phone"), None);
        assert_eq!(record.value("bed_count"), None);
    }

    #[test]
    fn test_untagged_roundtrip_keeps_kind() {
        let values = vec![
            FieldValue::Integer(450),
            FieldValue::Number(4.5),
            FieldValue::Boolean(true),
            FieldValue::Text("Level I".into()),
            FieldValue::List(vec!["Cardiology".into(), "Oncology".into()]),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[450,4.5,true,"Level I",["Cardiology","Oncology"]]"#);
        let back: Vec<FieldValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn test_numeric_view() {
        assert_eq!(FieldValue::Integer(280).as_f64(), Some(280.0));
        assert_eq!(FieldValue::Text("1,200".into()).as_f64(), Some(1200.0));
        assert_eq!(FieldValue::Boolean(true).as_f64(), None);
    }

    #[test]
    fn test_record_deserializes_with_missing_fields() {
        let record: FacilityRecord =
            serde_json::from_str(r#"{"id": 9, "name": "Baylor", "state_code": "TX"}"#).unwrap();
        assert_eq!(record.id, 9);
        assert_eq!(record.state_label(), Some("TX"));
        assert!(record.phone.is_none());
    }
}
