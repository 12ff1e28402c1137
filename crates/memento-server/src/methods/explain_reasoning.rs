//! `explain_reasoning` - explain why a set of memories answers a query.
//!
//! The explanation is assembled from observable evidence: search ranks,
//! shared entities and memory links. No LLM round-trip is needed.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Value};

use memento_core::{Memory, SearchOptions};

use crate::protocol::types::JsonRpcError;
use crate::server::AppContext;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    query: String,
    #[serde(default)]
    memory_ids: Vec<String>,
    limit: Option<u32>,
}

pub async fn execute(ctx: &AppContext, params: Value) -> Result<Value, JsonRpcError> {
    let params: Params = super::parse_params(params)?;
    let mut steps: Vec<Value> = Vec::new();
    let mut step = |description: String, steps: &mut Vec<Value>| {
        steps.push(json!({ "step": steps.len() + 1, "description": description }));
    };

    // Resolve the working set: explicit IDs, else a search.
    let memories: Vec<Memory> = if params.memory_ids.is_empty() {
        let results = ctx
            .search
            .hybrid_search(
                &params.query,
                SearchOptions {
                    limit: params.limit.unwrap_or(5),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| JsonRpcError::from_core(&e))?;
        step(
            format!(
                "Ran {} search for {:?} over the memory store ({} candidates).",
                match results.mode {
                    memento_core::SearchMode::Hybrid => "hybrid (full-text + vector)",
                    memento_core::SearchMode::Fts => "full-text",
                    memento_core::SearchMode::Recency => "recency",
                },
                params.query,
                results.total
            ),
            &mut steps,
        );
        results.items.into_iter().map(|s| s.memory).collect()
    } else {
        let mut memories = Vec::new();
        for id in &params.memory_ids {
            memories.push(ctx.store.get(id).map_err(|e| JsonRpcError::from_core(&e))?);
        }
        step(
            format!("Loaded {} caller-named memories.", memories.len()),
            &mut steps,
        );
        memories
    };

    if memories.is_empty() {
        return Ok(json!({
            "explanation": format!("No stored memories relate to {:?}.", params.query),
            "reasoning": steps,
        }));
    }

    // Shared entities across the working set.
    let mut entity_hits: BTreeMap<String, usize> = BTreeMap::new();
    for memory in &memories {
        let entities = ctx
            .store
            .get_memory_entities(&memory.id)
            .map_err(|e| JsonRpcError::from_core(&e))?;
        for entity in entities {
            *entity_hits.entry(entity.name).or_default() += 1;
        }
    }
    let shared: Vec<&String> = entity_hits
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(name, _)| name)
        .collect();
    if !shared.is_empty() {
        step(
            format!(
                "The matches share extracted entities: {}.",
                shared
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            &mut steps,
        );
    }

    for memory in &memories {
        step(
            format!(
                "{} (source {:?}, decay {:.2}): {}",
                memory.id,
                memory.source,
                memory.decay_score,
                snippet(&memory.content)
            ),
            &mut steps,
        );
    }

    let explanation = format!(
        "{} stored memor{} relate to {:?}{}",
        memories.len(),
        if memories.len() == 1 { "y" } else { "ies" },
        params.query,
        if shared.is_empty() {
            ", ranked by search relevance.".to_string()
        } else {
            format!(", connected through {} shared entit{}.", shared.len(), {
                if shared.len() == 1 {
                    "y"
                } else {
                    "ies"
                }
            })
        }
    );

    Ok(json!({
        "explanation": explanation,
        "reasoning": steps,
    }))
}

fn snippet(content: &str) -> String {
    let flat = content.replace('\n', " ");
    if flat.chars().count() <= 80 {
        flat
    } else {
        let cut: String = flat.chars().take(80).collect();
        format!("{}...", cut)
    }
}
