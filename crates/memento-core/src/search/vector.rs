//! Vector search over stored embeddings.
//!
//! Brute-force cosine scan. The embedding table is small enough (one row
//! per memory) that a linear pass beats maintaining an ANN index for this
//! workload.

use crate::embeddings::cosine_distance;
use crate::error::{Error, Result};
use crate::storage::SqliteStore;

/// One vector search hit, ascending distance.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub memory_id: String,
    /// Cosine distance to the query, lower is closer
    pub distance: f64,
}

/// Rank all stored embeddings by cosine distance to the query vector.
///
/// An empty query vector is invalid input. Returns an empty list when no
/// embeddings exist; callers degrade to recency ordering.
pub fn vector_search(store: &SqliteStore, query: &[f64], limit: usize) -> Result<Vec<VectorHit>> {
    if query.is_empty() {
        return Err(Error::InvalidInput("query vector must not be empty".into()));
    }

    let embeddings = store.all_embeddings()?;
    let mut hits: Vec<VectorHit> = embeddings
        .into_iter()
        .filter(|(_, embedding)| embedding.dimension == query.len())
        .map(|(memory_id, embedding)| VectorHit {
            distance: cosine_distance(query, &embedding.vector),
            memory_id,
        })
        .collect();

    hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    Ok(hits)
}
