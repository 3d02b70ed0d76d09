//! Turning a knowledge-source reply into typed field values
//!
//! Replies are read in three passes: the whole text as a JSON object, a JSON
//! object embedded in code fences or prose, and finally a prose scan with one
//! [`FieldExtractor`] per field kind. JSON keys resolve through the registry
//! synonyms, so `beds` lands on `bed_count`.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::facility::FieldValue;
use crate::query::FieldRequest;
use crate::registry::{self, FieldKind, FieldSpec};

/// Parsed values keyed by canonical field name; `None` is a resolved unknown
pub type FieldMap = BTreeMap<String, Option<FieldValue>>;

/// Most list items kept from a single answer
const MAX_LIST_ITEMS: usize = 5;

static COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d[\d,]*)\s*(?:licensed\s+|staffed\s+|inpatient\s+)?(?:beds?\b|bed\s*capacity)")
        .expect("valid regex")
});
static FIRST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("valid regex"));
static CURRENCY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$?\s*(\d[\d,]*(?:\.\d+)?)\s*(million|billion|m|b)\b").expect("valid regex")
});
static RATING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d(?:\.\d+)?)\s*(?:/\s*5|out\s+of\s+5|stars?)").expect("valid regex")
});
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-zA-Z0-9._-]+@[a-zA-Z0-9._-]+\.[a-zA-Z0-9_-]+)").expect("valid regex")
});
static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(https?://[^\s)\]]+)|(?:www\.)([^\s)\]]+\.[a-z]{2,})").expect("valid regex")
});
static LIST_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*(?:,|;|\band\b)\s*").expect("valid regex"));

/// Reads one field kind out of JSON values and free text
pub trait FieldExtractor: Send + Sync {
    /// Coerce a non-null JSON value; `None` when it is unusable
    fn from_json(&self, value: &Value) -> Option<FieldValue>;

    /// Find a value for `spec` in unstructured text
    fn from_prose(&self, spec: &FieldSpec, text: &str) -> Option<FieldValue>;
}

pub struct CountExtractor;
pub struct CurrencyExtractor;
pub struct RatingExtractor;
pub struct BooleanExtractor;
pub struct StringListExtractor;
pub struct EmailExtractor;
pub struct UrlExtractor;
pub struct TextExtractor;

/// The extractor registered for a field kind
pub fn extractor_for(kind: FieldKind) -> &'static dyn FieldExtractor {
    match kind {
        FieldKind::Count => &CountExtractor,
        FieldKind::Currency => &CurrencyExtractor,
        FieldKind::Rating => &RatingExtractor,
        FieldKind::Boolean => &BooleanExtractor,
        FieldKind::StringList => &StringListExtractor,
        FieldKind::Email => &EmailExtractor,
        FieldKind::Url => &UrlExtractor,
        FieldKind::Text => &TextExtractor,
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse::<f64>().ok().filter(|n| n.is_finite())
}

fn round2(n: f64) -> f64 {
    (n * 100.0).round() / 100.0
}

/// Synonyms usable as literal text patterns
fn prose_terms(spec: &FieldSpec) -> impl Iterator<Item = &'static str> + '_ {
    spec.synonyms.iter().copied().filter(|s| !s.contains('_'))
}

/// Text following `<synonym>:` up to the end of the sentence
fn labelled_value(spec: &FieldSpec, text: &str) -> Option<String> {
    prose_terms(spec).find_map(|term| {
        let pattern = format!(r"(?i)\b{}\s*:\s*([^\n.]+)", regex::escape(term));
        let re = Regex::new(&pattern).ok()?;
        let value = re.captures(text)?.get(1)?.as_str().trim().to_string();
        (!value.is_empty()).then_some(value)
    })
}

impl FieldExtractor for CountExtractor {
    fn from_json(&self, value: &Value) -> Option<FieldValue> {
        let n = match value {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => parse_number(FIRST_NUMBER.find(s)?.as_str())?,
            _ => return None,
        };
        (n >= 0.0).then(|| FieldValue::Integer(n.round() as i64))
    }

    fn from_prose(&self, _spec: &FieldSpec, text: &str) -> Option<FieldValue> {
        let caps = COUNT.captures(text)?;
        let n = parse_number(caps.get(1)?.as_str())?;
        Some(FieldValue::Integer(n.round() as i64))
    }
}

impl CurrencyExtractor {
    /// Amount in millions from a number and its unit word
    fn millions(amount: &str, unit: &str) -> Option<f64> {
        let amount = parse_number(amount)?;
        let factor = match unit.to_ascii_lowercase().as_str() {
            "billion" | "b" => 1000.0,
            _ => 1.0,
        };
        Some(round2(amount * factor))
    }
}

impl FieldExtractor for CurrencyExtractor {
    fn from_json(&self, value: &Value) -> Option<FieldValue> {
        match value {
            Value::Number(n) => n.as_f64().map(|n| FieldValue::Number(round2(n))),
            Value::String(s) => {
                if let Some(caps) = CURRENCY.captures(s) {
                    return Self::millions(caps.get(1)?.as_str(), caps.get(2)?.as_str())
                        .map(FieldValue::Number);
                }
                parse_number(FIRST_NUMBER.find(s)?.as_str()).map(|n| FieldValue::Number(round2(n)))
            }
            _ => None,
        }
    }

    fn from_prose(&self, _spec: &FieldSpec, text: &str) -> Option<FieldValue> {
        let caps = CURRENCY.captures(text)?;
        Self::millions(caps.get(1)?.as_str(), caps.get(2)?.as_str()).map(FieldValue::Number)
    }
}

impl FieldExtractor for RatingExtractor {
    fn from_json(&self, value: &Value) -> Option<FieldValue> {
        let n = match value {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => parse_number(FIRST_NUMBER.find(s)?.as_str())?,
            _ => return None,
        };
        (0.0..=5.0).contains(&n).then(|| FieldValue::Number(n))
    }

    fn from_prose(&self, _spec: &FieldSpec, text: &str) -> Option<FieldValue> {
        let n = parse_number(RATING.captures(text)?.get(1)?.as_str())?;
        (0.0..=5.0).contains(&n).then(|| FieldValue::Number(n))
    }
}

impl FieldExtractor for BooleanExtractor {
    fn from_json(&self, value: &Value) -> Option<FieldValue> {
        match value {
            Value::Bool(b) => Some(FieldValue::Boolean(*b)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "yes" | "true" | "y" => Some(FieldValue::Boolean(true)),
                "no" | "false" | "n" => Some(FieldValue::Boolean(false)),
                _ => None,
            },
            _ => None,
        }
    }

    /// A mention of the field is a yes, unless it is negated
    fn from_prose(&self, spec: &FieldSpec, text: &str) -> Option<FieldValue> {
        prose_terms(spec).find_map(|term| {
            let pattern = format!(
                r"(?i)\b(?:(no|not|without|lacks?)\s+(?:an?\s+)?)?{}\b",
                regex::escape(term)
            );
            let caps = Regex::new(&pattern).ok()?.captures(text)?;
            Some(FieldValue::Boolean(caps.get(1).is_none()))
        })
    }
}

impl StringListExtractor {
    fn split(raw: &str) -> Vec<String> {
        LIST_SPLIT
            .split(raw)
            .map(|s| s.trim().trim_end_matches('.').to_string())
            .filter(|s| !s.is_empty())
            .take(MAX_LIST_ITEMS)
            .collect()
    }

    fn non_empty(items: Vec<String>) -> Option<FieldValue> {
        (!items.is_empty()).then_some(FieldValue::List(items))
    }
}

impl FieldExtractor for StringListExtractor {
    fn from_json(&self, value: &Value) -> Option<FieldValue> {
        match value {
            Value::Array(items) => Self::non_empty(
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
            Value::String(s) => Self::non_empty(Self::split(s)),
            _ => None,
        }
    }

    fn from_prose(&self, spec: &FieldSpec, text: &str) -> Option<FieldValue> {
        Self::non_empty(Self::split(&labelled_value(spec, text)?))
    }
}

impl FieldExtractor for EmailExtractor {
    fn from_json(&self, value: &Value) -> Option<FieldValue> {
        let found = EMAIL.find(value.as_str()?)?;
        Some(FieldValue::Text(found.as_str().to_string()))
    }

    fn from_prose(&self, _spec: &FieldSpec, text: &str) -> Option<FieldValue> {
        let found = EMAIL.find(text)?;
        Some(FieldValue::Text(found.as_str().trim_end_matches('.').to_string()))
    }
}

impl UrlExtractor {
    fn normalize(raw: &str) -> Option<String> {
        let raw = raw.trim().trim_end_matches(['.', ',', ';']);
        if raw.is_empty() || raw.contains(char::is_whitespace) || !raw.contains('.') {
            return None;
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Some(raw.to_string())
        } else {
            Some(format!("https://{}", raw))
        }
    }
}

impl FieldExtractor for UrlExtractor {
    fn from_json(&self, value: &Value) -> Option<FieldValue> {
        Self::normalize(value.as_str()?).map(FieldValue::Text)
    }

    fn from_prose(&self, _spec: &FieldSpec, text: &str) -> Option<FieldValue> {
        let caps = URL.captures(text)?;
        let url = match (caps.get(1), caps.get(2)) {
            (Some(full), _) => full.as_str().to_string(),
            (None, Some(host)) => format!("www.{}", host.as_str()),
            (None, None) => return None,
        };
        Self::normalize(&url).map(FieldValue::Text)
    }
}

impl FieldExtractor for TextExtractor {
    fn from_json(&self, value: &Value) -> Option<FieldValue> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(FieldValue::Text(s.trim().to_string())),
            Value::Number(n) => Some(FieldValue::Text(n.to_string())),
            Value::Bool(b) => Some(FieldValue::Text(b.to_string())),
            _ => None,
        }
    }

    fn from_prose(&self, spec: &FieldSpec, text: &str) -> Option<FieldValue> {
        labelled_value(spec, text).map(FieldValue::Text)
    }
}

/// Extract JSON from a response that might contain markdown or other text
pub fn extract_json_from_response(response: &str) -> Option<&str> {
    if let Some(start) = response.find("```json") {
        let json_start = start + 7;
        if let Some(end) = response[json_start..].find("```") {
            return Some(response[json_start..json_start + end].trim());
        }
    }

    if let Some(start) = response.find("```") {
        let fence_start = start + 3;
        let json_start = match response[fence_start..].find('\n') {
            Some(newline) => fence_start + newline + 1,
            None => fence_start,
        };
        if let Some(end) = response[json_start..].find("```") {
            return Some(response[json_start..json_start + end].trim());
        }
    }

    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (end > start).then(|| &response[start..=end])
}

fn as_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn requested_spec(fields: &[FieldRequest], key: &str) -> Option<&'static FieldSpec> {
    let spec = registry::resolve(key)?;
    fields.iter().any(|f| f.name() == spec.name).then_some(spec)
}

/// Parse one facility's answer into values for the requested fields.
///
/// Every requested field appears in the result: a value that was null,
/// omitted, or unusable is recorded as `None`. A reply with neither a JSON
/// object nor any recognisable prose value is malformed.
pub fn parse_response(facility_id: i64, content: &str, fields: &[FieldRequest]) -> Result<FieldMap> {
    let object = as_object(content).or_else(|| extract_json_from_response(content).and_then(as_object));

    let mut values: FieldMap = FieldMap::new();

    match object {
        Some(object) => {
            for (key, raw) in &object {
                let Some(spec) = requested_spec(fields, key) else {
                    debug!(facility_id, key = %key, "Ignoring unrequested key");
                    continue;
                };
                let value = if raw.is_null() {
                    None
                } else {
                    extractor_for(spec.kind).from_json(raw)
                };
                // the first usable value wins when synonyms collide
                let slot = values.entry(spec.name.to_string()).or_insert(None);
                if slot.is_none() {
                    *slot = value;
                }
            }
        }
        None => {
            for field in fields {
                if let Some(value) = extractor_for(field.spec.kind).from_prose(field.spec, content) {
                    values.insert(field.name().to_string(), Some(value));
                }
            }
            if values.is_empty() {
                return Err(Error::MalformedEnrichmentResponse {
                    facility_id,
                    reason: "no JSON object or recognisable values in reply".to_string(),
                });
            }
            debug!(facility_id, fields = values.len(), "Used prose fallback");
        }
    }

    for field in fields {
        values.entry(field.name().to_string()).or_insert(None);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn req(names: &[&str]) -> Vec<FieldRequest> {
        names.iter().map(|n| FieldRequest::named(n).unwrap()).collect()
    }

    fn spec(name: &str) -> &'static FieldSpec {
        registry::field(name).unwrap()
    }

    #[test]
    fn test_whole_reply_json() {
        let map = parse_response(
            1,
            r#"{"bed_count": 907, "website": "https://www.houstonmethodist.org"}"#,
            &req(&["bed_count", "website"]),
        )
        .unwrap();
        assert_eq!(map["bed_count"], Some(FieldValue::Integer(907)));
        assert_eq!(
            map["website"],
            Some(FieldValue::from("https://www.houstonmethodist.org"))
        );
    }

    #[test]
    fn test_synonym_keys_and_unrequested_keys() {
        let map = parse_response(
            1,
            r#"{"beds": "about 1,200", "rating": 4.5}"#,
            &req(&["bed_count"]),
        )
        .unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["bed_count"], Some(FieldValue::Integer(1200)));
    }

    #[test]
    fn test_null_and_omitted_are_unknown() {
        let map = parse_response(1, r#"{"email": null}"#, &req(&["email", "specialties"])).unwrap();
        assert_eq!(map.get("email"), Some(&None));
        assert_eq!(map.get("specialties"), Some(&None));
    }

    #[test]
    fn test_fenced_json() {
        let reply = "Here is what I found:\n```json\n{\"emergency_services\": \"yes\", \"trauma_level\": \"Level I\"}\n```";
        let map = parse_response(2, reply, &req(&["emergency_services", "trauma_level"])).unwrap();
        assert_eq!(map["emergency_services"], Some(FieldValue::Boolean(true)));
        assert_eq!(map["trauma_level"], Some(FieldValue::from("Level I")));
    }

    #[test]
    fn test_json_embedded_in_prose() {
        let reply = r#"Sure. {"annual_revenue": "$2.1 billion"} Let me know if you need more."#;
        let map = parse_response(3, reply, &req(&["annual_revenue"])).unwrap();
        assert_eq!(map["annual_revenue"], Some(FieldValue::Number(2100.0)));
    }

    #[test]
    fn test_prose_fallback() {
        let reply = "The hospital has 450 beds and a 24/7 emergency room. \
                     Specialties: cardiology, oncology and neurology. \
                     Contact info@stlukes.org or visit www.stlukes.org for details.";
        let map = parse_response(
            4,
            reply,
            &req(&["bed_count", "emergency_services", "specialties", "email", "website"]),
        )
        .unwrap();
        assert_eq!(map["bed_count"], Some(FieldValue::Integer(450)));
        assert_eq!(map["emergency_services"], Some(FieldValue::Boolean(true)));
        assert_eq!(
            map["specialties"],
            Some(FieldValue::List(vec![
                "cardiology".into(),
                "oncology".into(),
                "neurology".into()
            ]))
        );
        assert_eq!(map["email"], Some(FieldValue::from("info@stlukes.org")));
        assert_eq!(map["website"], Some(FieldValue::from("https://www.stlukes.org")));
    }

    #[test]
    fn test_prose_with_nothing_usable_is_malformed() {
        let err = parse_response(9, "I could not find that facility.", &req(&["bed_count"])).unwrap_err();
        assert!(matches!(err, Error::MalformedEnrichmentResponse { facility_id: 9, .. }));
    }

    #[test]
    fn test_prose_partial_marks_rest_unknown() {
        let map = parse_response(5, "Roughly 120 beds.", &req(&["bed_count", "email"])).unwrap();
        assert_eq!(map["bed_count"], Some(FieldValue::Integer(120)));
        assert_eq!(map["email"], None);
    }

    #[test]
    fn test_count_extractor() {
        assert_eq!(CountExtractor.from_json(&json!(300)), Some(FieldValue::Integer(300)));
        assert_eq!(CountExtractor.from_json(&json!(-3)), None);
        assert_eq!(CountExtractor.from_json(&json!("n/a")), None);
        assert_eq!(
            CountExtractor.from_prose(spec("bed_count"), "a 1,050 licensed beds campus"),
            Some(FieldValue::Integer(1050))
        );
        assert_eq!(CountExtractor.from_prose(spec("bed_count"), "opened in 1998"), None);
    }

    #[test]
    fn test_currency_extractor() {
        assert_eq!(
            CurrencyExtractor.from_json(&json!("$450 million")),
            Some(FieldValue::Number(450.0))
        );
        assert_eq!(CurrencyExtractor.from_json(&json!(12.346)), Some(FieldValue::Number(12.35)));
        assert_eq!(
            CurrencyExtractor.from_prose(spec("annual_revenue"), "revenue of $1.25B last year"),
            Some(FieldValue::Number(1250.0))
        );
        assert_eq!(CurrencyExtractor.from_prose(spec("annual_revenue"), "500 beds"), None);
    }

    #[test]
    fn test_rating_extractor_bounds() {
        assert_eq!(RatingExtractor.from_json(&json!(4.2)), Some(FieldValue::Number(4.2)));
        assert_eq!(RatingExtractor.from_json(&json!(8)), None);
        assert_eq!(
            RatingExtractor.from_prose(spec("rating"), "rated 3.5 out of 5 by patients"),
            Some(FieldValue::Number(3.5))
        );
    }

    #[test]
    fn test_boolean_extractor_negation() {
        assert_eq!(
            BooleanExtractor.from_prose(spec("emergency_services"), "This clinic has no emergency room."),
            Some(FieldValue::Boolean(false))
        );
        assert_eq!(BooleanExtractor.from_json(&json!("maybe")), None);
        assert_eq!(BooleanExtractor.from_json(&json!(false)), Some(FieldValue::Boolean(false)));
    }

    #[test]
    fn test_list_extractor() {
        assert_eq!(StringListExtractor.from_json(&json!([])), None);
        assert_eq!(
            StringListExtractor.from_json(&json!(["Cardiology", " ", "Oncology"])),
            Some(FieldValue::List(vec!["Cardiology".into(), "Oncology".into()]))
        );
        let many = StringListExtractor.from_json(&json!("a, b, c, d, e, f, g")).unwrap();
        assert_eq!(many, FieldValue::List(vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()]));
    }

    #[test]
    fn test_url_extractor() {
        assert_eq!(
            UrlExtractor.from_json(&json!("mayoclinic.org")),
            Some(FieldValue::from("https://mayoclinic.org"))
        );
        assert_eq!(UrlExtractor.from_json(&json!("not available")), None);
        assert_eq!(
            UrlExtractor.from_prose(spec("website"), "See https://www.mayoclinic.org."),
            Some(FieldValue::from("https://www.mayoclinic.org"))
        );
    }

    #[test]
    fn test_extract_json_from_response() {
        assert_eq!(extract_json_from_response("```\n{\"a\": 1}\n```"), Some("{\"a\": 1}"));
        assert_eq!(extract_json_from_response("x {\"a\": 1} y"), Some("{\"a\": 1}"));
        assert_eq!(extract_json_from_response("no json here"), None);
    }
}
