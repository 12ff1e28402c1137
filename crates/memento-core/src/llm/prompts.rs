//! Prompt library and response parsing.
//!
//! Three fixed templates (entity extraction, relationship extraction,
//! summarization), each demanding strict JSON with per-item confidence.
//!
//! Parsing is tolerant by contract: malformed JSON is a hard failure, but a
//! single bad item (unknown type, out-of-range confidence, missing fields)
//! is dropped without killing the batch. Dropped type names are returned so
//! the pipeline can record them in `unknown_type_stats`.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::memory::{EntityType, RelationshipType};

// ============================================================================
// EXTRACTED ITEMS
// ============================================================================

/// A valid entity extracted from an LLM response.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: EntityType,
    pub description: String,
    pub confidence: f64,
}

/// A valid relationship extracted from an LLM response. Endpoints are
/// entity names, resolved against known entities by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRelationship {
    pub source: String,
    pub target: String,
    pub relationship_type: RelationshipType,
    pub context: String,
    pub confidence: f64,
}

/// Valid items plus the type names of items dropped for being outside the
/// allow-list.
#[derive(Debug, Clone)]
pub struct Parsed<T> {
    pub items: Vec<T>,
    pub unknown_types: Vec<String>,
}

impl<T> Default for Parsed<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            unknown_types: Vec::new(),
        }
    }
}

// ============================================================================
// TEMPLATES
// ============================================================================

fn type_list(names: impl Iterator<Item = &'static str>) -> String {
    names.collect::<Vec<_>>().join(", ")
}

/// Render the entity extraction prompt for one content chunk.
pub fn entity_extraction_prompt(content: &str) -> String {
    format!(
        "Extract the named entities from the text below.\n\
         Respond with a JSON array ONLY, no prose, no markdown fences.\n\
         Each item must be an object with exactly these fields:\n\
         - \"name\": the entity name as it appears in the text\n\
         - \"type\": one of [{types}]\n\
         - \"description\": one short sentence, may be empty\n\
         - \"confidence\": a number between 0 and 1\n\n\
         Text:\n{content}",
        types = type_list(EntityType::ALL.iter().map(|t| t.as_str())),
        content = content,
    )
}

/// Render the relationship extraction prompt, given the entities found in
/// the prior step.
pub fn relationship_extraction_prompt(content: &str, entities: &[ExtractedEntity]) -> String {
    let entity_lines: Vec<String> = entities
        .iter()
        .map(|e| format!("- {} ({})", e.name, e.entity_type))
        .collect();
    format!(
        "Given the text and the entities already extracted from it, list the\n\
         relationships between those entities.\n\
         Respond with a JSON array ONLY, no prose, no markdown fences.\n\
         Each item must be an object with exactly these fields:\n\
         - \"source\": name of an entity from the list\n\
         - \"target\": name of an entity from the list\n\
         - \"type\": one of [{types}]\n\
         - \"context\": one short phrase describing the relationship, may be empty\n\
         - \"confidence\": a number between 0 and 1\n\n\
         Entities:\n{entities}\n\n\
         Text:\n{content}",
        types = type_list(RelationshipType::ALL.iter().map(|t| t.as_str())),
        entities = entity_lines.join("\n"),
        content = content,
    )
}

/// Render the summarization prompt used by memory consolidation.
pub fn summarization_prompt(title: &str, contents: &[&str]) -> String {
    let numbered: Vec<String> = contents
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[{}] {}", i + 1, c))
        .collect();
    format!(
        "Summarize the memories below into a single coherent note titled\n\
         \"{title}\". Keep every concrete fact; drop duplicated phrasing.\n\
         Respond with a JSON object ONLY, no prose, no markdown fences:\n\
         {{\"summary\": \"...\", \"keywords\": [\"...\"], \"confidence\": 0.0}}\n\n\
         Memories:\n{memories}",
        title = title,
        memories = numbered.join("\n"),
    )
}

// ============================================================================
// PARSING
// ============================================================================

/// Strip a leading/trailing markdown fence, a common LLM tic.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// The top-level array from a response; accepts a bare array or an object
/// wrapping one under `key`.
fn top_level_array(raw: &str, key: &str) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_str(strip_fences(raw))
        .map_err(|e| Error::Transient(format!("malformed llm response: {}", e)))?;
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut obj) => match obj.remove(key) {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(Error::Transient(format!(
                "llm response object has no {:?} array",
                key
            ))),
        },
        _ => Err(Error::Transient(
            "llm response is neither array nor object".to_string(),
        )),
    }
}

fn str_field(item: &Value, field: &str) -> Option<String> {
    item.get(field).and_then(Value::as_str).map(str::to_string)
}

fn confidence_field(item: &Value) -> Option<f64> {
    let confidence = item.get("confidence")?.as_f64()?;
    (0.0..=1.0).contains(&confidence).then_some(confidence)
}

/// Parse an entity extraction response.
///
/// Zero valid items is not an error; only malformed JSON is.
pub fn parse_entity_response(raw: &str) -> Result<Parsed<ExtractedEntity>> {
    let mut parsed = Parsed::default();

    for item in top_level_array(raw, "entities")? {
        let Some(name) = str_field(&item, "name").filter(|n| !n.trim().is_empty()) else {
            continue;
        };
        let Some(type_name) = str_field(&item, "type") else {
            continue;
        };
        let Some(entity_type) = EntityType::parse_name(&type_name) else {
            parsed.unknown_types.push(type_name);
            continue;
        };
        let Some(confidence) = confidence_field(&item) else {
            continue;
        };
        parsed.items.push(ExtractedEntity {
            name: name.trim().to_string(),
            entity_type,
            description: str_field(&item, "description").unwrap_or_default(),
            confidence,
        });
    }
    Ok(parsed)
}

/// Parse a relationship extraction response.
pub fn parse_relationship_response(raw: &str) -> Result<Parsed<ExtractedRelationship>> {
    let mut parsed = Parsed::default();

    for item in top_level_array(raw, "relationships")? {
        let Some(source) = str_field(&item, "source").filter(|n| !n.trim().is_empty()) else {
            continue;
        };
        let Some(target) = str_field(&item, "target").filter(|n| !n.trim().is_empty()) else {
            continue;
        };
        let Some(type_name) = str_field(&item, "type") else {
            continue;
        };
        let Some(relationship_type) = RelationshipType::parse_name(&type_name) else {
            parsed.unknown_types.push(type_name);
            continue;
        };
        let Some(confidence) = confidence_field(&item) else {
            continue;
        };
        parsed.items.push(ExtractedRelationship {
            source: source.trim().to_string(),
            target: target.trim().to_string(),
            relationship_type,
            context: str_field(&item, "context").unwrap_or_default(),
            confidence,
        });
    }
    Ok(parsed)
}

/// Parse a summarization response into `(summary, keywords)`.
pub fn parse_summary_response(raw: &str) -> Result<(String, Vec<String>)> {
    let value: Value = serde_json::from_str(strip_fences(raw))
        .map_err(|e| Error::Transient(format!("malformed llm response: {}", e)))?;
    let summary = value
        .get("summary")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::Transient("summary response missing summary".to_string()))?
        .to_string();
    let keywords = value
        .get("keywords")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Ok((summary, keywords))
}

// ============================================================================
// TESTS
// ============================================================================
