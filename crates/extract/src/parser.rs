//! Turns raw model text into validated entities.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{ExtractError, Result};
use crate::schema::Entity;

/// Outcome of parsing one reply, with counts of what was left out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedEntities {
    pub entities: Vec<Entity>,
    pub dropped: usize,
    pub unknown_labels: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseParser;

impl ResponseParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, raw: &str) -> Result<Vec<Entity>> {
        self.parse_with_report(raw).map(|parsed| parsed.entities)
    }

    /// Outer JSON must parse; individual entities that fail validation are skipped.
    pub fn parse_with_report(&self, raw: &str) -> Result<ParsedEntities> {
        let payload = strip_code_fence(raw);
        let json: Value = serde_json::from_str(payload)
            .map_err(|e| ExtractError::MalformedResponse(format!("invalid JSON: {e}")))?;

        let items = match &json {
            Value::Object(obj) => obj
                .get("entities")
                .and_then(Value::as_array)
                .ok_or_else(|| ExtractError::MalformedResponse("missing \"entities\" array".to_string()))?,
            Value::Array(items) => items,
            _ => {
                return Err(ExtractError::MalformedResponse(
                    "expected a JSON object with an \"entities\" array".to_string(),
                ));
            }
        };

        let mut parsed = ParsedEntities::default();
        for (idx, item) in items.iter().enumerate() {
            match entity_from_json(item) {
                Ok(entity) => {
                    if entity.sensitivity().is_none() {
                        warn!(index = idx, label = %entity.label, "Entity has an unknown sensitivity tier");
                        parsed.unknown_labels += 1;
                    }
                    parsed.entities.push(entity);
                }
                Err(reason) => {
                    warn!(index = idx, reason = %reason, "Dropping invalid entity");
                    parsed.dropped += 1;
                }
            }
        }

        debug!(
            kept = parsed.entities.len(),
            dropped = parsed.dropped,
            "Parsed model response"
        );
        Ok(parsed)
    }
}

/// Remove surrounding whitespace and a ```json fence, if present.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the info string (e.g. `json`) on the opening line; a one-line fence has no newline.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest.strip_prefix("json").or_else(|| rest.strip_prefix("JSON")).unwrap_or(rest),
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn entity_from_json(item: &Value) -> std::result::Result<Entity, String> {
    let obj = item.as_object().ok_or_else(|| "entity is not a JSON object".to_string())?;

    Ok(Entity {
        name: required_string(obj, "name")?,
        category: required_string(obj, "category")?,
        label: required_string(obj, "label")?,
        purpose: required_string(obj, "purpose")?,
        situation: required_string(obj, "situation")?,
        subject: required_string(obj, "subject")?,
    })
}

fn required_string(obj: &Map<String, Value>, field: &str) -> std::result::Result<String, String> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Null) | None => Err(format!("missing required field '{field}'")),
        Some(other) => Err(format!("field '{field}' is not a string: {other}")),
    }
}
