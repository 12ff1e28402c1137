//! Hybrid search: FTS + vector fused with Reciprocal Rank Fusion.
//!
//! Fetches `3 x limit` candidates from each engine, fuses with
//! `score(m) = sum(1 / (K + rank))`, K = 60. A failing or unavailable
//! vector side degrades silently to FTS-only; the result reports which mode
//! actually served.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;

use crate::error::{ErrorKind, Result};
use crate::llm::LlmClient;
use crate::memory::Memory;
use crate::storage::SqliteStore;

use super::keyword::{fuzzy_or_query, sanitize_fts_query, SearchOptions};
use super::vector::vector_search;

/// RRF dampening constant.
pub const RRF_K: f64 = 60.0;

/// Candidate pool multiplier per source engine.
const CANDIDATE_MULTIPLIER: u32 = 3;

/// Cached query embeddings.
const QUERY_CACHE_SIZE: usize = 100;

/// Which engine actually served a hybrid query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Hybrid,
    Fts,
    Recency,
}

/// A fused search hit.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredMemory {
    pub memory: Memory,
    pub score: f64,
}

/// One page of hybrid results.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridResults {
    pub items: Vec<ScoredMemory>,
    /// Size of the fused candidate pool
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
    pub mode: SearchMode,
}

/// Reciprocal Rank Fusion over two ranked ID lists.
///
/// An item present in both lists accumulates both contributions, so it can
/// never rank below its position in either source alone.
pub fn reciprocal_rank_fusion(fts: &[String], vector: &[String], k: f64) -> Vec<(String, f64)> {
    let mut scores: HashMap<String, f64> = HashMap::new();

    for (rank, id) in fts.iter().enumerate() {
        *scores.entry(id.clone()).or_default() += 1.0 / (k + rank as f64 + 1.0);
    }
    for (rank, id) in vector.iter().enumerate() {
        *scores.entry(id.clone()).or_default() += 1.0 / (k + rank as f64 + 1.0);
    }

    let mut fused: Vec<(String, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
}

// ============================================================================
// SEARCH ENGINE
// ============================================================================

/// Facade over the three search paths.
pub struct SearchEngine {
    store: Arc<SqliteStore>,
    /// Embeds queries for the vector side; `None` disables it
    llm: Option<Arc<dyn LlmClient>>,
    llm_deadline: Duration,
    query_cache: Mutex<LruCache<String, Vec<f64>>>,
}

impl SearchEngine {
    pub fn new(store: Arc<SqliteStore>, llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self {
            store,
            llm,
            llm_deadline: Duration::from_secs(10),
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_SIZE).expect("cache size is non-zero"),
            )),
        }
    }

    /// Full-text search. Empty queries list by recency; a zero-hit query
    /// reruns once with OR semantics when the caller opted into fuzzy
    /// fallback.
    pub fn text_search(&self, query: &str, opts: SearchOptions) -> Result<Vec<Memory>> {
        self.text_search_inner(query, opts.normalized(), true)
    }

    fn text_search_inner(
        &self,
        query: &str,
        opts: SearchOptions,
        allow_fuzzy: bool,
    ) -> Result<Vec<Memory>> {
        if query.trim().is_empty() {
            return self.store.list_recent(opts.limit, opts.offset());
        }

        let expr = sanitize_fts_query(query);
        let hits = self.store.fts_search(&expr, opts.limit, opts.offset())?;

        if hits.is_empty() && allow_fuzzy && opts.fuzzy_fallback {
            // Fuzzy is disabled on the recursive call; one rerun only.
            let fuzzy = fuzzy_or_query(query);
            let memories = self.hydrate(
                self.store
                    .fts_search(&fuzzy, opts.limit, opts.offset())?
                    .into_iter()
                    .map(|(id, _)| id),
            )?;
            return Ok(memories);
        }

        self.hydrate(hits.into_iter().map(|(id, _)| id))
    }

    /// Hybrid search with RRF. Vector-side failures degrade to FTS-only.
    pub async fn hybrid_search(&self, query: &str, opts: SearchOptions) -> Result<HybridResults> {
        let opts = opts.normalized();

        if query.trim().is_empty() {
            let items = self
                .store
                .list_recent(opts.limit, opts.offset())?
                .into_iter()
                .map(|memory| ScoredMemory { memory, score: 0.0 })
                .collect::<Vec<_>>();
            let total = items.len() as u64;
            return Ok(HybridResults {
                total,
                has_more: false,
                page: opts.page,
                page_size: opts.limit,
                items,
                mode: SearchMode::Recency,
            });
        }

        let candidates = opts.limit * CANDIDATE_MULTIPLIER;

        let expr = sanitize_fts_query(query);
        let fts_ids: Vec<String> = self
            .store
            .fts_search(&expr, candidates, 0)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        let (vector_ids, mode) = match self.vector_candidates(query, candidates as usize).await {
            Ok(Some(ids)) => (ids, SearchMode::Hybrid),
            Ok(None) => (vec![], SearchMode::Fts),
            Err(err) => {
                tracing::warn!(error = %err, "vector search degraded to fts");
                (vec![], SearchMode::Fts)
            }
        };

        let fused = reciprocal_rank_fusion(&fts_ids, &vector_ids, RRF_K);
        let total = fused.len() as u64;

        let start = opts.offset() as usize;
        let page_ids: Vec<(String, f64)> = fused
            .into_iter()
            .skip(start)
            .take(opts.limit as usize)
            .collect();

        let mut items = Vec::with_capacity(page_ids.len());
        for (id, score) in page_ids {
            if let Some(memory) = self.store.get_any(&id)? {
                if memory.deleted_at.is_none() {
                    items.push(ScoredMemory { memory, score });
                }
            }
        }

        // has_more reflects the RRF candidate pool.
        let has_more = (start as u64 + items.len() as u64) < total;
        Ok(HybridResults {
            items,
            total,
            page: opts.page,
            page_size: opts.limit,
            has_more,
            mode,
        })
    }

    /// Vector-side candidates for a text query. `Ok(None)` means the vector
    /// engine is unavailable (no LLM, or nothing embedded yet).
    async fn vector_candidates(&self, query: &str, limit: usize) -> Result<Option<Vec<String>>> {
        let Some(llm) = &self.llm else {
            return Ok(None);
        };

        let cached = self
            .query_cache
            .lock()
            .ok()
            .and_then(|mut cache| cache.get(query).cloned());

        let vector = match cached {
            Some(vector) => vector,
            None => {
                let raw = llm.embed(query, self.llm_deadline).await?;
                let vector: Vec<f64> = raw.into_iter().map(|v| v as f64).collect();
                if let Ok(mut cache) = self.query_cache.lock() {
                    cache.put(query.to_string(), vector.clone());
                }
                vector
            }
        };

        let hits = vector_search(&self.store, &vector, limit)?;
        if hits.is_empty() {
            return Ok(None);
        }
        Ok(Some(hits.into_iter().map(|h| h.memory_id).collect()))
    }

    /// Direct vector search for callers that already hold a query vector.
    pub fn vector_search_raw(&self, query: &[f64], limit: usize) -> Result<Vec<super::VectorHit>> {
        match vector_search(&self.store, query, limit) {
            Ok(hits) if hits.is_empty() => {
                // Degraded but non-failing: recency stands in.
                Ok(self
                    .store
                    .list_recent(limit as u32, 0)?
                    .into_iter()
                    .map(|m| super::VectorHit {
                        memory_id: m.id,
                        distance: 1.0,
                    })
                    .collect())
            }
            other => other,
        }
    }

    fn hydrate(&self, ids: impl Iterator<Item = String>) -> Result<Vec<Memory>> {
        let mut memories = Vec::new();
        for id in ids {
            match self.store.get_any(&id) {
                Ok(Some(memory)) if memory.deleted_at.is_none() => memories.push(memory),
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        Ok(memories)
    }
}

// ============================================================================
// TESTS
// ============================================================================
