//! `recall_memory` - fetch one memory by ID or by filters.
//!
//! A recall counts as an access: the hit's access counter and decay bonus
//! are bumped.

use serde::Deserialize;
use serde_json::{json, Value};

use memento_core::{ErrorKind, ListOptions, Memory};

use crate::protocol::types::JsonRpcError;
use crate::server::AppContext;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    id: Option<String>,
    domain: Option<String>,
    session_id: Option<String>,
    memory_type: Option<String>,
    state: Option<String>,
    #[serde(default)]
    include_deleted: bool,
}

pub async fn execute(ctx: &AppContext, params: Value) -> Result<Value, JsonRpcError> {
    let params: Params = super::parse_params(params)?;

    let memory: Option<Memory> = match &params.id {
        Some(id) => {
            if params.include_deleted {
                ctx.store.get_any(id).map_err(|e| JsonRpcError::from_core(&e))?
            } else {
                match ctx.store.get(id) {
                    Ok(memory) => Some(memory),
                    Err(err) if err.kind() == ErrorKind::NotFound => None,
                    Err(err) => return Err(JsonRpcError::from_core(&err)),
                }
            }
        }
        None => {
            if params.domain.is_none()
                && params.session_id.is_none()
                && params.memory_type.is_none()
                && params.state.is_none()
            {
                return Err(JsonRpcError::invalid_params(
                    "recall_memory requires an id or at least one filter",
                ));
            }
            let page = ctx
                .store
                .list(ListOptions {
                    limit: 1,
                    domain: params.domain.clone(),
                    session_id: params.session_id.clone(),
                    memory_type: params.memory_type.clone(),
                    state: params.state.clone(),
                    include_deleted: params.include_deleted,
                    ..Default::default()
                })
                .map_err(|e| JsonRpcError::from_core(&e))?;
            page.items.into_iter().next()
        }
    };

    match memory {
        Some(memory) => {
            if memory.deleted_at.is_none() {
                // Best effort; a recall should not fail on the bump.
                if let Err(err) = ctx.store.increment_access_count(&memory.id) {
                    tracing::warn!(memory_id = %memory.id, error = %err, "access bump failed");
                }
            }
            Ok(json!({ "found": true, "memory": memory }))
        }
        None => Ok(json!({ "found": false })),
    }
}
