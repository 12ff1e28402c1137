//! # Memento Core
//!
//! Personal knowledge/memory engine for coding agents:
//!
//! - **Storage engine**: transactional SQLite store for memories, extracted
//!   entities, typed relationships, memory links and embeddings, with
//!   soft-delete, version chains, a lifecycle state machine and decay
//!   scoring.
//! - **Enrichment pipeline**: bounded worker pool that lifts each memory
//!   through entity extraction, relationship extraction and embedding
//!   generation against a local LLM, with retries, circuit-breaker
//!   protection and crash recovery.
//! - **Hybrid search & graph traversal**: FTS5 keyword search, cosine
//!   vector search, Reciprocal Rank Fusion, and bounded BFS over the
//!   entity-relationship graph.
//! - **Backup service**: scheduled consistent snapshots, integrity
//!   verification and tiered retention.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use memento_core::{NewMemory, Pipeline, PipelineConfig, SqliteStore};
//! use memento_core::llm::{HttpLlmClient, LlmConfig};
//! use std::sync::Arc;
//!
//! let store = Arc::new(SqliteStore::open(None)?);
//! let llm = Arc::new(HttpLlmClient::new(LlmConfig::default()));
//! let pipeline = Pipeline::new(store.clone(), llm, PipelineConfig::default());
//! pipeline.start().await?;
//!
//! // Returns immediately with a pending memory; workers enrich it.
//! let memory = pipeline.ingest(NewMemory {
//!     content: "The parser bug was a missing bounds check".into(),
//!     source: "manual".into(),
//!     ..Default::default()
//! })?;
//! ```

// ============================================================================
// MODULES
// ============================================================================

pub mod backup;
pub mod config;
pub mod decay;
pub mod embeddings;
pub mod enrichment;
pub mod error;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod search;
pub mod storage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use error::{Error, ErrorKind, Result};

pub use memory::{
    can_transition, content_hash, is_valid_state, memory_id, Entity, EntityType,
    EnrichmentStatus, EnrichmentUpdate, ListOptions, Memory, MemoryEntity, MemoryLink, NewMemory,
    Page, Relationship, RelationshipType, SortField, SortOrder, StageStatus, LIFECYCLE_STATES,
};

pub use storage::{Migration, MigrationManager, SqliteStore, StoreStats};

pub use embeddings::{cosine_distance, cosine_similarity, Embedding};

pub use enrichment::{Pipeline, PipelineConfig, PipelineMetrics};

pub use search::{
    reciprocal_rank_fusion, sanitize_fts_query, HybridResults, ScoredMemory, SearchEngine,
    SearchMode, SearchOptions,
};

pub use graph::{shortest_path, traverse, GraphBounds, TraversalResult, TraversedMemory};

pub use decay::{decay_factor, ConfidenceScore, ConfidenceScorer, DEFAULT_HALF_LIFE_DAYS};

pub use backup::{
    BackupConfig, BackupHealth, BackupInfo, BackupReport, BackupService, HealthStatus,
    RetentionPolicy,
};

pub use config::{Config, SecurityMode};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Config, Error, ErrorKind, GraphBounds, ListOptions, Memory, NewMemory, Pipeline,
        PipelineConfig, Result, SearchEngine, SearchOptions, SqliteStore,
    };

    pub use crate::llm::{CircuitBreaker, HttpLlmClient, LlmClient, LlmConfig};

    pub use crate::{BackupConfig, BackupService, RetentionPolicy};
}
