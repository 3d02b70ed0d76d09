use super::{
    Comparison, Criterion, FieldRequest, Intent, Location, ParsedQuery, StateRef, spelling,
};
use crate::error::{Error, Result};
use crate::registry::{
    self, CITIES, CITY_ABBREVIATIONS, CITY_ALIASES, DEFAULT_FIELDS, FACILITY_NOUNS,
    FACILITY_TYPES, FieldSpec, STATES, SYNONYMS,
};
use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)""#).expect("valid regex"));

static NAMED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?i:named|called)\s+([A-Z][\w'&.-]*(?:\s+(?:of\s+)?[A-Z][\w'&.-]*)*)")
        .expect("valid regex")
});

static PROPER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    let nouns = FACILITY_NOUNS
        .iter()
        .map(|n| {
            let mut chars = n.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\b((?:[A-Z][\w'&.-]*\s+)+(?:{nouns}))\b")).expect("valid regex")
});

static NPI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bnpi\s*(?:#|number)?\s*:?\s*(\d{10})\b").expect("valid regex")
});

static LIMIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:top|first)\s+(\d{1,4})\b").expect("valid regex"));

static COMPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(more than|greater than|over|above|at least|less than|fewer than|under|below|at most|exactly)\s+\$?(\d[\d,]*(?:\.\d+)?)(?:\s*(million|billion|m|b)\b)?",
    )
    .expect("valid regex")
});

static BETWEEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bbetween\s+\$?(\d[\d,]*(?:\.\d+)?)\s+and\s+\$?(\d[\d,]*(?:\.\d+)?)(?:\s*(million|billion|m|b)\b)?",
    )
    .expect("valid regex")
});

static RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(\d[\d,]*(?:\.\d+)?)\s*-\s*(\d[\d,]*(?:\.\d+)?)(?:\s*(million|billion|m|b)\b)?",
    )
    .expect("valid regex")
});

static ZIP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{5})(?:-\d{4})?\b").expect("valid regex"));

static STATE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z]{2})\b").expect("valid regex"));

/// Words stripped from the front of a capitalised facility name
const LEADING_NOISE: [&str; 12] = [
    "what", "is", "the", "does", "how", "many", "get", "tell", "me", "give", "for", "at",
];

/// Byte ranges already consumed by an earlier interpretation
#[derive(Debug, Default)]
struct Claims(Vec<Range<usize>>);

impl Claims {
    fn is_free(&self, span: &Range<usize>) -> bool {
        self.0
            .iter()
            .all(|c| span.end <= c.start || span.start >= c.end)
    }

    fn claim(&mut self, span: Range<usize>) {
        self.0.push(span);
    }
}

/// Parse a free-text facility query.
///
/// Fails only on empty input.
pub fn parse(raw: &str) -> Result<ParsedQuery> {
    parse_with(raw, true)
}

/// Parse without spelling correction; `corrected` equals the trimmed input
pub fn parse_verbatim(raw: &str) -> Result<ParsedQuery> {
    parse_with(raw, false)
}

fn parse_with(raw: &str, correct_spelling: bool) -> Result<ParsedQuery> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidQuery("query is empty".to_string()));
    }

    let corrected = if correct_spelling {
        spelling::correct(trimmed)
    } else {
        trimmed.to_string()
    };
    // ASCII lowercasing keeps byte offsets aligned with `corrected`
    let lower = corrected.to_ascii_lowercase();
    let mut claims = Claims::default();

    let intent = detect_intent(&lower);
    let entity_name = extract_entity(&corrected, intent, &mut claims);
    let npi = extract_npi(&corrected, &mut claims);
    let limit = extract_limit(&corrected, &mut claims);
    let mut positioned_fields = Vec::new();
    let criteria = extract_criteria(&corrected, &lower, &mut claims, &mut positioned_fields);
    let facility_types = extract_facility_types(&lower, &mut claims);
    let location = extract_location(&corrected, &lower, &mut claims);
    positioned_fields.extend(extract_fields(&lower, &mut claims));

    positioned_fields.sort_by_key(|(pos, _)| *pos);
    let mut fields: Vec<FieldRequest> = Vec::new();
    for (_, spec) in positioned_fields {
        let request = FieldRequest { spec };
        if !fields.contains(&request) {
            fields.push(request);
        }
    }
    if fields.is_empty() {
        fields = DEFAULT_FIELDS
            .iter()
            .filter_map(|name| FieldRequest::named(name))
            .collect();
    }

    let parsed = ParsedQuery {
        original: raw.to_string(),
        corrected,
        intent,
        fields,
        location,
        facility_types,
        entity_name,
        npi,
        criteria,
        limit,
    };

    tracing::debug!(
        intent = ?parsed.intent,
        fields = ?parsed.field_names(),
        location = ?parsed.location,
        criteria = parsed.criteria.len(),
        "Parsed query"
    );
    Ok(parsed)
}

fn words(lower: &str) -> impl Iterator<Item = &str> {
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
}

fn detect_intent(lower: &str) -> Intent {
    let has_any = |list: &[&str]| words(lower).any(|w| list.contains(&w));

    if has_any(&["compare", "vs", "versus"]) {
        return Intent::Compare;
    }
    if has_any(&["analyze", "analyse", "analysis", "insight", "insights", "trend", "trends"]) {
        return Intent::Analyze;
    }
    let plural_type = FACILITY_TYPES
        .iter()
        .flat_map(|t| t.plurals.iter())
        .any(|p| find_phrase(lower, p, &Claims::default()).is_some());
    if plural_type || has_any(&["find", "show", "list", "search", "which", "all"]) {
        return Intent::List;
    }
    Intent::Lookup
}

/// First whole-word occurrence of `phrase` in `lower` outside claimed spans
fn find_phrase(lower: &str, phrase: &str, claims: &Claims) -> Option<Range<usize>> {
    find_all_phrases(lower, phrase, claims).into_iter().next()
}

fn find_all_phrases(lower: &str, phrase: &str, claims: &Claims) -> Vec<Range<usize>> {
    let mut found = Vec::new();
    let mut from = 0;
    while let Some(offset) = lower[from..].find(phrase) {
        let start = from + offset;
        let end = start + phrase.len();
        let before_ok = lower[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let after_ok = lower[end..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric());
        let span = start..end;
        if before_ok && after_ok && claims.is_free(&span) {
            found.push(span);
        }
        from = end.max(start + 1);
        if from >= lower.len() {
            break;
        }
    }
    found
}

fn extract_entity(corrected: &str, intent: Intent, claims: &mut Claims) -> Option<String> {
    if let Some(caps) = QUOTED.captures(corrected) {
        let whole = caps.get(0)?;
        let name = caps.get(1)?.as_str().trim();
        if !name.is_empty() {
            claims.claim(whole.range());
            return Some(name.to_string());
        }
    }

    if let Some(caps) = NAMED.captures(corrected) {
        let whole = caps.get(0)?;
        let name = caps.get(1)?.as_str().trim_end_matches(['.', ',', '?', '!']);
        claims.claim(whole.range());
        return Some(name.to_string());
    }

    if intent != Intent::Lookup {
        return None;
    }

    for caps in PROPER_NAME.captures_iter(corrected) {
        let Some(m) = caps.get(1) else { continue };
        let mut name = m.as_str();
        let mut offset = m.start();
        while let Some(first) = name.split_whitespace().next() {
            if !LEADING_NOISE.contains(&first.to_ascii_lowercase().as_str()) {
                break;
            }
            let rest = name[first.len()..].trim_start();
            offset += name.len() - rest.len();
            name = rest;
        }
        if name.split_whitespace().count() >= 2 {
            claims.claim(offset..m.end());
            return Some(name.to_string());
        }
    }
    None
}

fn extract_npi(corrected: &str, claims: &mut Claims) -> Option<String> {
    let caps = NPI.captures(corrected)?;
    let whole = caps.get(0)?;
    claims.claim(whole.range());
    Some(caps.get(1)?.as_str().to_string())
}

fn extract_limit(corrected: &str, claims: &mut Claims) -> Option<u32> {
    for caps in LIMIT.captures_iter(corrected) {
        let Some(whole) = caps.get(0) else { continue };
        if !claims.is_free(&whole.range()) {
            continue;
        }
        let limit: u32 = caps.get(1)?.as_str().parse().ok()?;
        claims.claim(whole.range());
        return (limit > 0).then_some(limit);
    }
    None
}

fn parse_number(s: &str) -> Option<f64> {
    s.replace(',', "").parse().ok()
}

/// Scale a number to the field's unit (currency is held in millions)
fn scale(value: f64, unit: Option<&str>, spec: &FieldSpec) -> f64 {
    if spec.kind != registry::FieldKind::Currency {
        return value;
    }
    match unit.map(|u| u.to_ascii_lowercase()).as_deref() {
        Some("billion") | Some("b") => value * 1000.0,
        _ => value,
    }
}

/// A numeric field named right after `end`, e.g. "300 beds" or "$5 million in revenue"
fn field_after(lower: &str, end: usize) -> Option<(&'static FieldSpec, Range<usize>)> {
    let mut start = end + (lower[end..].len() - lower[end..].trim_start().len());
    for filler in ["in ", "of "] {
        if lower[start..].starts_with(filler) {
            start += filler.len();
        }
    }
    let rest = &lower[start..];
    SYNONYMS
        .iter()
        .filter(|(_, spec)| spec.kind.is_numeric())
        .find_map(|(syn, spec)| {
            let after = rest.strip_prefix(syn)?;
            let boundary = after.chars().next().is_none_or(|c| !c.is_alphanumeric());
            boundary.then(|| (*spec, start..start + syn.len()))
        })
}

/// A numeric field named right before `start`, e.g. "rating above 4"
fn field_before(lower: &str, start: usize) -> Option<(&'static FieldSpec, Range<usize>)> {
    let mut head = lower[..start].trim_end();
    for filler in [" of", " with", " is"] {
        if let Some(stripped) = head.strip_suffix(filler) {
            head = stripped.trim_end();
        }
    }
    SYNONYMS
        .iter()
        .filter(|(_, spec)| spec.kind.is_numeric())
        .find_map(|(syn, spec)| {
            let prefix = head.strip_suffix(syn)?;
            let boundary = prefix
                .chars()
                .next_back()
                .is_none_or(|c| !c.is_alphanumeric());
            boundary.then(|| (*spec, prefix.len()..head.len()))
        })
}

fn extract_criteria(
    corrected: &str,
    lower: &str,
    claims: &mut Claims,
    fields: &mut Vec<(usize, &'static FieldSpec)>,
) -> Vec<Criterion> {
    let mut found: Vec<(usize, Criterion)> = Vec::new();

    let mut record = |claims: &mut Claims,
                      whole: Range<usize>,
                      build: &dyn Fn(&'static FieldSpec) -> Comparison| {
        if !claims.is_free(&whole) {
            return;
        }
        let located = field_after(lower, whole.end).or_else(|| field_before(lower, whole.start));
        let Some((spec, field_span)) = located else {
            return;
        };
        if !claims.is_free(&field_span) {
            return;
        }
        let span = whole.start.min(field_span.start)..whole.end.max(field_span.end);
        claims.claim(span.clone());
        fields.push((field_span.start, spec));
        found.push((
            span.start,
            Criterion {
                field: FieldRequest { spec },
                comparison: build(spec),
            },
        ));
    };

    for caps in BETWEEN.captures_iter(corrected).chain(RANGE.captures_iter(corrected)) {
        let (Some(whole), Some(low), Some(high)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let (Some(low), Some(high)) = (parse_number(low.as_str()), parse_number(high.as_str()))
        else {
            continue;
        };
        let unit = caps.get(3).map(|m| m.as_str());
        record(claims, whole.range(), &|spec| {
            let (a, b) = (scale(low, unit, spec), scale(high, unit, spec));
            Comparison::Between {
                low: a.min(b),
                high: a.max(b),
            }
        });
    }

    for caps in COMPARATOR.captures_iter(corrected) {
        let (Some(whole), Some(op), Some(number)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let Some(value) = parse_number(number.as_str()) else {
            continue;
        };
        let unit = caps.get(3).map(|m| m.as_str());
        let op = op.as_str().to_ascii_lowercase();
        record(claims, whole.range(), &|spec| {
            let value = scale(value, unit, spec);
            match op.as_str() {
                "at least" => Comparison::Ge { value },
                "less than" | "fewer than" | "under" | "below" => Comparison::Lt { value },
                "at most" => Comparison::Le { value },
                "exactly" => Comparison::Eq { value },
                _ => Comparison::Gt { value },
            }
        });
    }

    found.sort_by_key(|(pos, _)| *pos);
    found.into_iter().map(|(_, c)| c).collect()
}

fn extract_facility_types(lower: &str, claims: &mut Claims) -> Vec<String> {
    let mut phrases: Vec<(&str, &str)> = FACILITY_TYPES
        .iter()
        .flat_map(|t| {
            t.terms
                .iter()
                .chain(t.plurals.iter())
                .map(move |p| (*p, t.canonical))
        })
        .collect();
    phrases.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut found: Vec<(usize, &str)> = Vec::new();
    for (phrase, canonical) in phrases {
        for span in find_all_phrases(lower, phrase, claims) {
            claims.claim(span.clone());
            found.push((span.start, canonical));
        }
    }
    found.sort_by_key(|(pos, _)| *pos);

    let mut types: Vec<String> = Vec::new();
    for (_, canonical) in found {
        if !types.iter().any(|t| t == canonical) {
            types.push(canonical.to_string());
        }
    }
    types
}

fn extract_location(corrected: &str, lower: &str, claims: &mut Claims) -> Location {
    let mut location = Location::default();
    let mut implied_state: Option<&str> = None;

    if let Some(m) = ZIP
        .captures_iter(corrected)
        .filter_map(|c| c.get(0).zip(c.get(1)))
        .find(|(whole, _)| claims.is_free(&whole.range()))
    {
        claims.claim(m.0.range());
        location.zip = Some(m.1.as_str().to_string());
    }

    for caps in STATE_CODE.captures_iter(corrected) {
        let Some(m) = caps.get(1) else { continue };
        if !claims.is_free(&m.range()) {
            continue;
        }
        if let Some((_, city, state)) = CITY_ABBREVIATIONS.iter().find(|(a, _, _)| *a == m.as_str())
        {
            if location.city.is_none() {
                claims.claim(m.range());
                location.city = Some(city.to_string());
                implied_state = Some(*state);
            }
            continue;
        }
        if location.state.is_none() {
            if let Some((code, name)) = registry::state_by_code(m.as_str()) {
                claims.claim(m.range());
                location.state = Some(StateRef {
                    code: code.to_string(),
                    name: name.to_string(),
                });
            }
        }
    }

    if location.city.is_none() {
        let mut candidates: Vec<(&str, &str, Option<&str>)> = CITY_ALIASES
            .iter()
            .map(|(alias, city, state)| (*alias, *city, Some(*state)))
            .chain(CITIES.iter().map(|c| (*c, *c, None)))
            .collect();
        candidates.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        for (phrase, city, state) in candidates {
            if let Some(span) = find_phrase(lower, &phrase.to_ascii_lowercase(), claims) {
                claims.claim(span);
                location.city = Some(city.to_string());
                implied_state = state;
                break;
            }
        }
    }

    if location.state.is_none() {
        let mut states: Vec<&(&str, &str)> = STATES.iter().collect();
        states.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        for (code, name) in states {
            if let Some(span) = find_phrase(lower, &name.to_ascii_lowercase(), claims) {
                claims.claim(span);
                location.state = Some(StateRef {
                    code: code.to_string(),
                    name: name.to_string(),
                });
                break;
            }
        }
    }

    if location.state.is_none() {
        if let Some((code, name)) = implied_state.and_then(registry::state_by_code) {
            location.state = Some(StateRef {
                code: code.to_string(),
                name: name.to_string(),
            });
        }
    }

    location
}

fn extract_fields(lower: &str, claims: &mut Claims) -> Vec<(usize, &'static FieldSpec)> {
    let mut found = Vec::new();
    for (synonym, spec) in SYNONYMS.iter() {
        for span in find_all_phrases(lower, synonym, claims) {
            claims.claim(span.clone());
            found.push((span.start, *spec));
        }
    }
    found
}
