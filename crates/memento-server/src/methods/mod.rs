//! JSON-RPC method implementations, one module per method.

pub mod consolidate_memories;
pub mod explain_reasoning;
pub mod find_related;
pub mod recall_memory;
pub mod retry_enrichment;
pub mod store_memory;
pub mod update_memory;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::protocol::types::JsonRpcError;

/// Deserialize method params, mapping failures to invalid-params.
pub(crate) fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, JsonRpcError> {
    let params = if params.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        params
    };
    serde_json::from_value(params)
        .map_err(|e| JsonRpcError::invalid_params(&format!("invalid params: {}", e)))
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use memento_core::llm::LlmClient;
    use memento_core::{Pipeline, PipelineConfig, SearchEngine, SqliteStore};

    use crate::server::AppContext;

    /// Canned LLM for method tests.
    pub struct CannedLlm;

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn complete(
            &self,
            prompt: &str,
            _deadline: Duration,
        ) -> memento_core::Result<String> {
            if prompt.contains("Summarize the memories") {
                Ok(r#"{"summary": "Consolidated summary of the notes.", "keywords": ["notes"], "confidence": 0.9}"#.to_string())
            } else if prompt.contains("relationships between") {
                Ok("[]".to_string())
            } else {
                Ok(r#"[{"name": "Rust", "type": "technology", "description": "", "confidence": 0.9}]"#.to_string())
            }
        }

        async fn embed(&self, _text: &str, _deadline: Duration) -> memento_core::Result<Vec<f32>> {
            Ok(vec![0.1, 0.2, 0.3])
        }

        async fn health_check(&self, _deadline: Duration) -> memento_core::Result<()> {
            Ok(())
        }

        async fn list_models(&self, _deadline: Duration) -> memento_core::Result<Vec<String>> {
            Ok(vec!["canned".to_string()])
        }

        fn embedding_model(&self) -> &str {
            "canned-embed"
        }
    }

    /// A full context against a throwaway store, workers running.
    pub async fn test_context() -> (AppContext, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open(Some(dir.path().join("test.db"))).unwrap());
        let llm: Arc<dyn LlmClient> = Arc::new(CannedLlm);
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&store),
            Arc::clone(&llm),
            PipelineConfig::default(),
        ));
        pipeline.start().await.unwrap();
        let search = Arc::new(SearchEngine::new(Arc::clone(&store), Some(Arc::clone(&llm))));
        (
            AppContext {
                store,
                pipeline,
                search,
                llm: Some(llm),
                llm_deadline: Duration::from_secs(5),
            },
            dir,
        )
    }
}
