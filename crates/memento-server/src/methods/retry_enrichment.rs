//! `retry_enrichment` - reset a memory's enrichment and re-queue it.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::protocol::types::JsonRpcError;
use crate::server::AppContext;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    id: String,
}

pub async fn execute(ctx: &AppContext, params: Value) -> Result<Value, JsonRpcError> {
    let params: Params = super::parse_params(params)?;

    ctx.pipeline
        .retry_enrichment(&params.id)
        .map_err(|e| JsonRpcError::from_core(&e))?;

    Ok(json!({
        "id": params.id,
        "queued": true,
        "message": "enrichment re-queued"
    }))
}
