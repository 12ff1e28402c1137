//! `find_related` - hybrid search over the knowledge graph.

use serde::Deserialize;
use serde_json::{json, Value};

use memento_core::SearchOptions;

use crate::protocol::types::JsonRpcError;
use crate::server::AppContext;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    query: String,
    limit: Option<u32>,
    page: Option<u32>,
    domain: Option<String>,
    #[serde(default)]
    fuzzy_fallback: bool,
}

pub async fn execute(ctx: &AppContext, params: Value) -> Result<Value, JsonRpcError> {
    let params: Params = super::parse_params(params)?;

    let results = ctx
        .search
        .hybrid_search(
            &params.query,
            SearchOptions {
                page: params.page.unwrap_or(1),
                limit: params.limit.unwrap_or(10),
                fuzzy_fallback: params.fuzzy_fallback,
            },
        )
        .await
        .map_err(|e| JsonRpcError::from_core(&e))?;

    let items: Vec<&memento_core::ScoredMemory> = match &params.domain {
        Some(domain) => results
            .items
            .iter()
            .filter(|s| &s.memory.domain == domain)
            .collect(),
        None => results.items.iter().collect(),
    };

    Ok(json!({
        "total": results.total,
        "mode": results.mode,
        "hasMore": results.has_more,
        "memories": items
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::testutil::test_context;

    #[tokio::test(flavor = "multi_thread")]
    async fn finds_matching_memories() {
        let (ctx, _dir) = test_context().await;
        for content in ["Go programming notes", "More Go programming tricks", "Pasta recipe"] {
            ctx.pipeline
                .ingest(memento_core::NewMemory {
                    content: content.to_string(),
                    source: "manual".to_string(),
                    ..Default::default()
                })
                .unwrap();
        }

        let result = execute(&ctx, json!({"query": "Go programming"})).await.unwrap();
        let memories = result["memories"].as_array().unwrap();
        assert_eq!(memories.len(), 2);
        ctx.pipeline.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn domain_filter_applies() {
        let (ctx, _dir) = test_context().await;
        ctx.pipeline
            .ingest(memento_core::NewMemory {
                content: "domain search target".to_string(),
                source: "manual".to_string(),
                domain: "work".to_string(),
                ..Default::default()
            })
            .unwrap();

        let result = execute(
            &ctx,
            json!({"query": "domain search", "domain": "home"}),
        )
        .await
        .unwrap();
        assert!(result["memories"].as_array().unwrap().is_empty());
        ctx.pipeline.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn query_is_required() {
        let (ctx, _dir) = test_context().await;
        assert!(execute(&ctx, json!({})).await.is_err());
        ctx.pipeline.shutdown().await;
    }
}
