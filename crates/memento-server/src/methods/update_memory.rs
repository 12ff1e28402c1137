//! `update_memory` - targeted update of content, tags or metadata.
//!
//! A content change re-queues enrichment, since the derived entities and
//! embedding are stale.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::protocol::types::JsonRpcError;
use crate::server::AppContext;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    id: String,
    content: Option<String>,
    tags: Option<Vec<String>>,
    metadata: Option<Map<String, Value>>,
    state: Option<String>,
}

pub async fn execute(ctx: &AppContext, params: Value) -> Result<Value, JsonRpcError> {
    let params: Params = super::parse_params(params)?;

    let mut memory = ctx
        .store
        .get(&params.id)
        .map_err(|e| JsonRpcError::from_core(&e))?;

    let content_changed = params
        .content
        .as_ref()
        .map(|c| *c != memory.content)
        .unwrap_or(false);

    if let Some(content) = params.content {
        memory.content = content;
    }
    if let Some(tags) = params.tags {
        memory.tags = tags;
    }
    if let Some(metadata) = params.metadata {
        // Merge rather than replace; callers send deltas.
        for (key, value) in metadata {
            memory.metadata.insert(key, value);
        }
    }

    // Lifecycle changes go through the validated transition path.
    if let Some(state) = params.state {
        ctx.store
            .update_state(&params.id, &state)
            .map_err(|e| JsonRpcError::from_core(&e))?;
        memory.state = state;
    }

    ctx.store
        .update(&memory)
        .map_err(|e| JsonRpcError::from_core(&e))?;

    let message = if content_changed {
        ctx.pipeline
            .retry_enrichment(&params.id)
            .map_err(|e| JsonRpcError::from_core(&e))?;
        "memory updated, re-enrichment queued"
    } else {
        "memory updated"
    };

    Ok(json!({
        "id": params.id,
        "updated": true,
        "message": message
    }))
}
