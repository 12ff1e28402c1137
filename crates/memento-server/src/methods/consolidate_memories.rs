//! `consolidate_memories` - merge several memories into one summary memory.
//!
//! The new memory links to its sources with `contains` memory links. The
//! summary comes from the LLM's summarization template when the server is
//! reachable, with a deterministic concatenation fallback.

use serde::Deserialize;
use serde_json::{json, Value};

use memento_core::llm::prompts;
use memento_core::{Memory, NewMemory, SearchOptions};

use crate::protocol::types::JsonRpcError;
use crate::server::AppContext;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    title: String,
    #[serde(default)]
    ids: Vec<String>,
    query: Option<String>,
    limit: Option<u32>,
}

pub async fn execute(ctx: &AppContext, params: Value) -> Result<Value, JsonRpcError> {
    let params: Params = super::parse_params(params)?;
    if params.title.trim().is_empty() {
        return Err(JsonRpcError::invalid_params("title must not be empty"));
    }

    // Resolve the set to consolidate.
    let memories: Vec<Memory> = if !params.ids.is_empty() {
        let mut memories = Vec::new();
        for id in &params.ids {
            memories.push(ctx.store.get(id).map_err(|e| JsonRpcError::from_core(&e))?);
        }
        memories
    } else if let Some(query) = &params.query {
        ctx.search
            .hybrid_search(
                query,
                SearchOptions {
                    limit: params.limit.unwrap_or(10),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| JsonRpcError::from_core(&e))?
            .items
            .into_iter()
            .map(|s| s.memory)
            .collect()
    } else {
        return Err(JsonRpcError::invalid_params(
            "consolidate_memories requires ids or a query",
        ));
    };

    if memories.len() < 2 {
        return Err(JsonRpcError::invalid_params(
            "consolidation requires at least 2 memories",
        ));
    }

    let contents: Vec<&str> = memories.iter().map(|m| m.content.as_str()).collect();
    let (content, summarized) = summarize(ctx, &params.title, &contents).await;

    let consolidated_ids: Vec<String> = memories.iter().map(|m| m.id.clone()).collect();
    let domain = memories[0].domain.clone();

    let mut metadata = serde_json::Map::new();
    metadata.insert("title".to_string(), json!(params.title));
    metadata.insert("consolidatedIds".to_string(), json!(consolidated_ids));

    let new_memory = ctx
        .pipeline
        .ingest(NewMemory {
            content: content.clone(),
            source: "consolidation".to_string(),
            domain,
            memory_type: "consolidated".to_string(),
            metadata,
            ..Default::default()
        })
        .map_err(|e| JsonRpcError::from_core(&e))?;

    for id in &consolidated_ids {
        ctx.store
            .add_memory_link(&new_memory.id, id, "contains")
            .map_err(|e| JsonRpcError::from_core(&e))?;
    }

    Ok(json!({
        "new_id": new_memory.id,
        "content": content,
        "consolidated_ids": consolidated_ids,
        "message": if summarized {
            "memories consolidated with llm summary"
        } else {
            "memories consolidated (concatenated, llm unavailable)"
        }
    }))
}

/// LLM summary with deterministic fallback. Returns `(content, used_llm)`.
async fn summarize(ctx: &AppContext, title: &str, contents: &[&str]) -> (String, bool) {
    if let Some(llm) = &ctx.llm {
        let prompt = prompts::summarization_prompt(title, contents);
        match llm.complete(&prompt, ctx.llm_deadline).await {
            Ok(raw) => match prompts::parse_summary_response(&raw) {
                Ok((summary, _keywords)) => return (format!("{}\n\n{}", title, summary), true),
                Err(err) => {
                    tracing::warn!(error = %err, "summary parse failed, concatenating");
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "summarization call failed, concatenating");
            }
        }
    }

    let mut content = String::from(title);
    content.push('\n');
    for item in contents {
        content.push_str("\n- ");
        content.push_str(item);
    }
    (content, false)
}
