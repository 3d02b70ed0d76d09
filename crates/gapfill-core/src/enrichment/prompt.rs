//! Prompt construction for one facility's enrichment call

use crate::gaps::DataGap;

use super::types::Message;

const SYSTEM_PROMPT: &str = "You are a data lookup service for healthcare facilities. \
Answer only with facts you can find on the web. Respond with a single JSON object and nothing else.";

/// Messages sent to the knowledge source for one gap
pub fn build_messages(gap: &DataGap) -> Vec<Message> {
    vec![Message::system(SYSTEM_PROMPT), Message::user(build_prompt(gap))]
}

/// User prompt: identity, wanted fields with type hints, strict JSON reply
pub fn build_prompt(gap: &DataGap) -> String {
    let place = match (gap.city.as_deref(), gap.state.as_deref()) {
        (Some(city), Some(state)) => format!(" in {}, {}", city, state),
        (Some(place), None) | (None, Some(place)) => format!(" in {}", place),
        (None, None) => String::new(),
    };

    let needed: Vec<&str> = gap.missing_fields.iter().map(|f| f.name()).collect();
    let template: Vec<String> = gap
        .missing_fields
        .iter()
        .map(|f| format!("  \"{}\": {}", f.name(), f.spec.kind.type_hint()))
        .collect();

    format!(
        "Find ONLY factual data about {name}{place}.\n\
         Search for: {phrase}\n\
         Needed information: {needed}\n\n\
         Return JSON with ONLY these fields (use null if not found):\n\
         {{\n{template}\n}}\n\n\
         Be concise and factual. No explanations, no markdown.",
        name = gap.name,
        place = place,
        phrase = gap.search_phrase,
        needed = needed.join(", "),
        template = template.join(",\n"),
    )
}
