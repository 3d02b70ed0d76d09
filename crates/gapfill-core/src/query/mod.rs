//! Query intake and normalisation
//!
//! Turns free text into a [`ParsedQuery`]: corrected text, intent, requested
//! fields, location, facility types, entity name, numeric criteria and an
//! optional result limit. Parsing is deterministic and has no side effects.

mod parser;
pub mod spelling;

pub use parser::{parse, parse_verbatim};

use crate::registry::{self, FacilityTypeSpec, FieldSpec};
use serde::{Serialize, Serializer};

/// What the user is trying to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// A specific facility
    Lookup,
    /// Facilities matching criteria
    List,
    Compare,
    Analyze,
}

/// A requested field, resolved against the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRequest {
    pub spec: &'static FieldSpec,
}

impl FieldRequest {
    /// Request a field by canonical name
    pub fn named(name: &str) -> Option<Self> {
        registry::field(name).map(|spec| Self { spec })
    }

    pub fn name(&self) -> &'static str {
        self.spec.name
    }
}

impl Serialize for FieldRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.spec.name)
    }
}

/// A state as both code and full name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateRef {
    pub code: String,
    pub name: String,
}

/// Location predicates; all present parts are combined with AND
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Location {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<StateRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

impl Location {
    pub fn is_empty(&self) -> bool {
        self.zip.is_none() && self.state.is_none() && self.city.is_none()
    }
}

/// Numeric comparison applied after merge
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Comparison {
    Gt { value: f64 },
    Ge { value: f64 },
    Lt { value: f64 },
    Le { value: f64 },
    Eq { value: f64 },
    Between { low: f64, high: f64 },
}

impl Comparison {
    pub fn matches(&self, v: f64) -> bool {
        match *self {
            Self::Gt { value } => v > value,
            Self::Ge { value } => v >= value,
            Self::Lt { value } => v < value,
            Self::Le { value } => v <= value,
            Self::Eq { value } => (v - value).abs() < f64::EPSILON,
            Self::Between { low, high } => v >= low && v <= high,
        }
    }
}

/// A numeric post-filter on one field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Criterion {
    pub field: FieldRequest,
    #[serde(flatten)]
    pub comparison: Comparison,
}

/// Structured form of a free-text query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedQuery {
    pub original: String,
    pub corrected: String,
    pub intent: Intent,
    /// Ordered, deduplicated
    pub fields: Vec<FieldRequest>,
    pub location: Location,
    /// Canonical facility type names
    pub facility_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub npi: Option<String>,
    pub criteria: Vec<Criterion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl ParsedQuery {
    /// Store values matched by the requested facility types
    pub fn type_variants(&self) -> Vec<&'static str> {
        let mut variants: Vec<&'static str> = Vec::new();
        for spec in self.facility_type_specs() {
            for v in spec.variants {
                if !variants.contains(v) {
                    variants.push(v);
                }
            }
        }
        variants
    }

    fn facility_type_specs(&self) -> impl Iterator<Item = &'static FacilityTypeSpec> + '_ {
        self.facility_types.iter().filter_map(|canonical| {
            registry::FACILITY_TYPES
                .iter()
                .find(|t| t.canonical == canonical.as_str())
        })
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name()).collect()
    }
}
