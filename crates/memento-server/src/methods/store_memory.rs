//! `store_memory` - ingest a new memory, returning before enrichment runs.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use memento_core::NewMemory;

use crate::protocol::types::JsonRpcError;
use crate::server::AppContext;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    content: String,
    source: Option<String>,
    domain: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default)]
    source_context: Map<String, Value>,
    memory_type: Option<String>,
    session_id: Option<String>,
    created_by: Option<String>,
}

pub async fn execute(ctx: &AppContext, params: Value) -> Result<Value, JsonRpcError> {
    let params: Params = super::parse_params(params)?;

    let memory = ctx
        .pipeline
        .ingest(NewMemory {
            content: params.content,
            source: params.source.unwrap_or_else(|| "manual".to_string()),
            domain: params.domain.unwrap_or_default(),
            tags: params.tags,
            metadata: params.metadata,
            source_context: params.source_context,
            memory_type: params.memory_type.unwrap_or_default(),
            session_id: params.session_id.unwrap_or_default(),
            created_by: params.created_by.unwrap_or_default(),
            ..Default::default()
        })
        .map_err(|e| JsonRpcError::from_core(&e))?;

    Ok(json!({
        "id": memory.id,
        "status": memory.status,
        "message": "memory stored, enrichment queued"
    }))
}
