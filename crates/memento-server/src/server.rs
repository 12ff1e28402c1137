//! JSON-RPC method dispatch.

use std::sync::Arc;

use serde_json::Value;

use memento_core::llm::LlmClient;
use memento_core::{Pipeline, SearchEngine, SqliteStore};

use crate::methods;
use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// Shared handles every method executes against.
pub struct AppContext {
    pub store: Arc<SqliteStore>,
    pub pipeline: Arc<Pipeline>,
    pub search: Arc<SearchEngine>,
    /// Used by consolidation for summarization; methods degrade without it
    pub llm: Option<Arc<dyn LlmClient>>,
    /// Per-LLM-call deadline for method-level calls
    pub llm_deadline: std::time::Duration,
}

/// The dispatcher.
pub struct RpcServer {
    ctx: AppContext,
}

impl RpcServer {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Handle one request. Notifications (no id) get no response.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.is_notification();
        let id = request.id.clone();

        let result = self.dispatch(&request.method, request.params).await;
        if is_notification {
            if let Err(err) = result {
                tracing::warn!(method = %request.method, error = %err, "notification failed");
            }
            return None;
        }

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(err) => JsonRpcResponse::error(id, err),
        })
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params = params.unwrap_or(Value::Null);
        match method {
            "store_memory" => methods::store_memory::execute(&self.ctx, params).await,
            "recall_memory" => methods::recall_memory::execute(&self.ctx, params).await,
            "update_memory" => methods::update_memory::execute(&self.ctx, params).await,
            "find_related" => methods::find_related::execute(&self.ctx, params).await,
            "retry_enrichment" => methods::retry_enrichment::execute(&self.ctx, params).await,
            "explain_reasoning" => methods::explain_reasoning::execute(&self.ctx, params).await,
            "consolidate_memories" => {
                methods::consolidate_memories::execute(&self.ctx, params).await
            }
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }
}
