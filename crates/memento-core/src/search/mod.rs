//! Search engine
//!
//! Full-text (FTS5), vector (cosine distance over stored embeddings) and
//! hybrid search with Reciprocal Rank Fusion. Degrades instead of failing:
//! an empty query or an unavailable vector side falls back to recency or
//! FTS-only results.

mod hybrid;
mod keyword;
mod vector;

pub use hybrid::{reciprocal_rank_fusion, HybridResults, ScoredMemory, SearchEngine, SearchMode, RRF_K};
pub use keyword::{fuzzy_or_query, sanitize_fts_query, SearchOptions};
pub use vector::VectorHit;
