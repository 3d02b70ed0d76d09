//! Fixed field registry and query vocabularies
//!
//! Every field the pipeline understands is declared once here: its canonical
//! name, value kind, the synonyms users type, the keyword appended to an
//! external search phrase, and whether the relational store can ever hold it.
//! Lookups never go through dynamically keyed maps elsewhere in the crate.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Value kind of a registered field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    /// Whole-number counts (beds)
    Count,
    /// Money in millions of USD
    Currency,
    /// Score on a 0-5 scale
    Rating,
    Boolean,
    StringList,
    Email,
    Url,
}

impl FieldKind {
    /// Short hint placed next to the field in an enrichment prompt
    pub fn type_hint(&self) -> &'static str {
        match self {
            Self::Text => "string or null",
            Self::Count => "integer or null",
            Self::Currency => "number in millions of USD or null",
            Self::Rating => "number from 0 to 5 or null",
            Self::Boolean => "true, false or null",
            Self::StringList => "array of strings (empty if none)",
            Self::Email => "email address string or null",
            Self::Url => "website URL string or null",
        }
    }

    /// Whether values of this kind can be compared numerically
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Count | Self::Currency | Self::Rating)
    }
}

/// A registered field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Canonical name
    pub name: &'static str,
    pub kind: FieldKind,
    /// Lowercase terms that refer to this field in queries and JSON keys
    pub synonyms: &'static [&'static str],
    /// Extra search keywords for external lookups
    pub keyword: Option<&'static str>,
    /// Never present in the relational store
    pub external_only: bool,
}

impl FieldSpec {
    /// Keyword used in an external search phrase, falling back to the name
    pub fn search_keyword(&self) -> &'static str {
        self.keyword.unwrap_or(self.name)
    }
}

/// Fields requested when a query mentions none
pub const DEFAULT_FIELDS: [&str; 3] = ["name", "address", "phone"];

const fn db(
    name: &'static str,
    synonyms: &'static [&'static str],
) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Text,
        synonyms,
        keyword: None,
        external_only: false,
    }
}

const fn ext(
    name: &'static str,
    kind: FieldKind,
    synonyms: &'static [&'static str],
    keyword: Option<&'static str>,
) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        synonyms,
        keyword,
        external_only: true,
    }
}

static FIELDS: &[FieldSpec] = &[
    db("name", &["name", "names"]),
    db("npi", &["npi", "npi number"]),
    db("address", &["address", "addresses", "street address"]),
    db("city", &["city", "cities"]),
    db("state", &["state", "states"]),
    db("zip", &["zip", "zip code", "zip codes", "zipcode", "postal code"]),
    db(
        "phone",
        &["phone", "phones", "phone number", "phone numbers", "telephone", "contact number"],
    ),
    db("fax", &["fax", "fax number"]),
    db("category", &["category", "categories"]),
    db("facility_type", &["facility type", "type of facility"]),
    db("ownership", &["ownership", "owner", "owners", "owned by"]),
    ext(
        "bed_count",
        FieldKind::Count,
        &["beds", "bed", "bed count", "bed_count", "number of beds", "capacity"],
        Some("bed count capacity"),
    ),
    ext(
        "specialties",
        FieldKind::StringList,
        &["specialties", "specialty", "services", "departments"],
        Some("specialties services departments"),
    ),
    ext(
        "emergency_services",
        FieldKind::Boolean,
        &[
            "emergency services",
            "emergency_services",
            "emergency room",
            "emergency",
            "er",
        ],
        Some("emergency room ER"),
    ),
    ext(
        "trauma_level",
        FieldKind::Text,
        &["trauma level", "trauma_level", "trauma center", "trauma"],
        Some("trauma level center"),
    ),
    ext(
        "rating",
        FieldKind::Rating,
        &["rating", "ratings", "reviews", "stars"],
        Some("ratings reviews quality"),
    ),
    ext(
        "annual_revenue",
        FieldKind::Currency,
        &["annual revenue", "annual_revenue", "revenue", "income", "sales"],
        Some("annual revenue income financial performance"),
    ),
    ext(
        "email",
        FieldKind::Email,
        &["email", "emails", "e-mail", "email address", "email_address", "contact email", "contact_email"],
        Some("contact email address"),
    ),
    ext("website", FieldKind::Url, &["website", "websites", "url", "web site"], None),
];

/// All registered fields in declaration order
pub fn fields() -> &'static [FieldSpec] {
    FIELDS
}

/// Look up a field by canonical name
pub fn field(name: &str) -> Option<&'static FieldSpec> {
    FIELDS.iter().find(|f| f.name == name)
}

/// Resolve a user term or JSON key to a field (case-insensitive)
pub fn resolve(term: &str) -> Option<&'static FieldSpec> {
    let term = term.trim().to_lowercase();
    FIELDS
        .iter()
        .find(|f| f.name == term || f.synonyms.contains(&term.as_str()))
}

/// Every (synonym, field) pair, longest synonym first
pub static SYNONYMS: LazyLock<Vec<(&'static str, &'static FieldSpec)>> = LazyLock::new(|| {
    let mut pairs: Vec<(&'static str, &'static FieldSpec)> = FIELDS
        .iter()
        .flat_map(|f| f.synonyms.iter().map(move |s| (*s, f)))
        .filter(|(s, _)| !s.contains('_'))
        .collect();
    pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    pairs
});

/// A facility type and the store values it expands to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacilityTypeSpec {
    pub canonical: &'static str,
    /// Singular query terms
    pub terms: &'static [&'static str],
    /// Plural query terms (these imply a list intent)
    pub plurals: &'static [&'static str],
    /// Values matched against the store's `facility_type` column
    pub variants: &'static [&'static str],
}

pub static FACILITY_TYPES: &[FacilityTypeSpec] = &[
    FacilityTypeSpec {
        canonical: "urgent care",
        terms: &["urgent care", "urgent care center"],
        plurals: &["urgent cares", "urgent care centers"],
        variants: &["Urgent Care", "Urgent Care Center"],
    },
    FacilityTypeSpec {
        canonical: "hospital",
        terms: &["hospital"],
        plurals: &["hospitals"],
        variants: &["Hospital", "Acute Care Hospital", "General Medical Hospital"],
    },
    FacilityTypeSpec {
        canonical: "mental health",
        terms: &["mental health", "mental health clinic", "psychiatric"],
        plurals: &["mental health clinics", "mental health centers"],
        variants: &["Mental Health", "Mental Health Clinic", "Psychiatric"],
    },
    FacilityTypeSpec {
        canonical: "clinic",
        terms: &["clinic"],
        plurals: &["clinics"],
        variants: &["Clinic", "Outpatient Clinic", "Community Health Clinic"],
    },
    FacilityTypeSpec {
        canonical: "nursing home",
        terms: &["nursing home", "skilled nursing facility"],
        plurals: &["nursing homes", "skilled nursing facilities"],
        variants: &["Nursing Home", "Skilled Nursing Facility", "SNF"],
    },
    FacilityTypeSpec {
        canonical: "pharmacy",
        terms: &["pharmacy", "drug store"],
        plurals: &["pharmacies", "drug stores"],
        variants: &["Pharmacy", "Drug Store"],
    },
];

/// Nouns that end a facility's proper name ("Mayo Clinic", "Baylor Hospital")
pub const FACILITY_NOUNS: [&str; 8] = [
    "hospital",
    "clinic",
    "center",
    "centre",
    "pharmacy",
    "medical",
    "health",
    "infirmary",
];

/// US states and territories as (code, name)
pub static STATES: &[(&str, &str)] = &[
    ("AL", "Alabama"),
    ("AK", "Alaska"),
    ("AZ", "Arizona"),
    ("AR", "Arkansas"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DE", "Delaware"),
    ("DC", "District of Columbia"),
    ("FL", "Florida"),
    ("GA", "Georgia"),
    ("HI", "Hawaii"),
    ("ID", "Idaho"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("IA", "Iowa"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("ME", "Maine"),
    ("MD", "Maryland"),
    ("MA", "Massachusetts"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MS", "Mississippi"),
    ("MO", "Missouri"),
    ("MT", "Montana"),
    ("NE", "Nebraska"),
    ("NV", "Nevada"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NY", "New York"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VT", "Vermont"),
    ("VA", "Virginia"),
    ("WA", "Washington"),
    ("WV", "West Virginia"),
    ("WI", "Wisconsin"),
    ("WY", "Wyoming"),
];

/// Look up a state by its two-letter code (case-sensitive, uppercase)
pub fn state_by_code(code: &str) -> Option<(&'static str, &'static str)> {
    STATES.iter().copied().find(|(c, _)| *c == code)
}

/// Look up a state by its full name (case-insensitive)
pub fn state_by_name(name: &str) -> Option<(&'static str, &'static str)> {
    STATES
        .iter()
        .copied()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
}

/// Cities recognised in queries
pub static CITIES: &[&str] = &[
    "New York",
    "Los Angeles",
    "Chicago",
    "Houston",
    "Phoenix",
    "Philadelphia",
    "San Antonio",
    "San Diego",
    "Dallas",
    "San Jose",
    "Austin",
    "Jacksonville",
    "San Francisco",
    "Columbus",
    "Fort Worth",
    "Indianapolis",
    "Charlotte",
    "Seattle",
    "Denver",
    "Washington",
    "Boston",
    "Nashville",
    "Detroit",
    "Portland",
    "Las Vegas",
    "Memphis",
    "Louisville",
    "Baltimore",
    "Milwaukee",
    "Albuquerque",
    "Atlanta",
    "Miami",
    "Minneapolis",
    "Cleveland",
    "Pittsburgh",
    "Rochester",
    "St. Louis",
    "New Orleans",
    "Salt Lake City",
    "Sacramento",
    "Kansas City",
    "Omaha",
    "Tampa",
    "Orlando",
    "Raleigh",
    "Buffalo",
    "Birmingham",
    "El Paso",
];

/// Lowercase alias → (city, implied state code)
pub static CITY_ALIASES: &[(&str, &str, &str)] = &[
    ("staten island", "New York", "NY"),
    ("manhattan", "New York", "NY"),
    ("brooklyn", "New York", "NY"),
    ("queens", "New York", "NY"),
    ("bronx", "New York", "NY"),
    ("nyc", "New York", "NY"),
];

/// Uppercase abbreviations that name a city rather than a state.
///
/// `LA` is also Louisiana's code; as a standalone token it is read as
/// Los Angeles.
pub static CITY_ABBREVIATIONS: &[(&str, &str, &str)] = &[
    ("LA", "Los Angeles", "CA"),
    ("SF", "San Francisco", "CA"),
];

/// Store `city` values that belong to New York City
pub const NEW_YORK_BOROUGHS: [&str; 5] =
    ["Manhattan", "Brooklyn", "Queens", "Bronx", "Staten Island"];

/// Common query words; known words are never spell-corrected
pub const QUERY_WORDS: &[&str] = &[
    "find", "show", "list", "search", "which", "all", "compare", "versus", "analyze",
    "analysis", "insight", "insights", "trend", "trends", "named", "called", "near", "with",
    "more", "than", "less", "fewer", "greater", "above", "below", "under", "over", "least",
    "most", "exactly", "between", "first", "their", "these", "those", "what", "where",
    "about", "facilities", "facility", "there", "please", "number", "located", "within",
    "having", "offer", "offers", "provide", "provides", "largest", "biggest", "highest",
    "lowest", "contact", "information", "details", "doctors", "around", "downtown", "county",
    "nearby", "other", "would", "could", "should", "whose", "million", "billion",
];

/// Known single words used for spelling correction, in tie-break order
pub static VOCABULARY: LazyLock<Vec<String>> = LazyLock::new(|| {
    let mut seen = HashSet::new();
    let mut words = Vec::new();

    let phrases = FACILITY_TYPES
        .iter()
        .flat_map(|t| t.terms.iter().chain(t.plurals.iter()).copied())
        .chain(FACILITY_NOUNS.iter().copied())
        .chain(FIELDS.iter().flat_map(|f| f.synonyms.iter().copied()))
        .chain(STATES.iter().map(|(_, name)| *name))
        .chain(CITIES.iter().copied())
        .chain(NEW_YORK_BOROUGHS.iter().copied())
        .chain(QUERY_WORDS.iter().copied());

    for phrase in phrases {
        for word in phrase.split_whitespace() {
            let word = word.to_lowercase();
            if word.chars().all(|c| c.is_alphabetic()) && seen.insert(word.clone()) {
                words.push(word);
            }
        }
    }
    words
});
