//! Memory data model
//!
//! The unit of knowledge plus everything derived from it: extracted
//! entities, inter-entity relationships, memory-to-memory links and the
//! per-memory enrichment bookkeeping.

mod graph;
mod id;
mod lifecycle;
mod record;

pub use graph::{
    Entity, EntityType, MemoryEntity, MemoryLink, Relationship, RelationshipType,
};
pub use id::{content_hash, entity_id, link_id, memory_id, relationship_id};
pub use lifecycle::{can_transition, is_valid_state, LIFECYCLE_STATES};
pub use record::{
    EnrichmentStatus, EnrichmentUpdate, ListOptions, Memory, NewMemory, Page, SortField,
    SortOrder, StageStatus, EVOLUTION_CHAIN_CAP, MAX_SOURCE_CONTEXT_BYTES,
};
