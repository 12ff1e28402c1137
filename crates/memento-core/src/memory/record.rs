//! Memory record types and enrichment bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Hard cap on the serialized size of `source_context`, enforced before any
/// write reaches the store.
pub const MAX_SOURCE_CONTEXT_BYTES: usize = 4096;

/// Maximum number of nodes walked when reconstructing an evolution chain.
pub const EVOLUTION_CHAIN_CAP: usize = 50;

// ============================================================================
// STATUS ENUMS
// ============================================================================

/// Top-level enrichment status of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentStatus {
    /// Waiting for a worker
    #[default]
    Pending,
    /// A worker holds the job
    Processing,
    /// All three stages completed
    Enriched,
    /// Failed permanently after max retries
    Failed,
}

impl EnrichmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentStatus::Pending => "pending",
            EnrichmentStatus::Processing => "processing",
            EnrichmentStatus::Enriched => "enriched",
            EnrichmentStatus::Failed => "failed",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EnrichmentStatus::Pending),
            "processing" => Some(EnrichmentStatus::Processing),
            "enriched" => Some(EnrichmentStatus::Enriched),
            "failed" => Some(EnrichmentStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for EnrichmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-stage status (entity extraction, relationship extraction, embedding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Processing => "processing",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(StageStatus::Pending),
            "processing" => Some(StageStatus::Processing),
            "completed" => Some(StageStatus::Completed),
            "failed" => Some(StageStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// MEMORY
// ============================================================================

/// The unit of stored knowledge.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    /// Deterministic identifier (`mem:<domain>:<hash>`)
    pub id: String,
    /// Free-form content, never empty
    pub content: String,
    /// sha-256 hex of `content`, recomputed on every write
    pub content_hash: String,
    /// Agent-supplied origin tag, never empty
    pub source: String,
    /// Logical partition tag (empty = default domain)
    pub domain: String,
    /// Caller-asserted event time
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // ========== Enrichment bookkeeping ==========
    pub status: EnrichmentStatus,
    pub entity_status: StageStatus,
    pub relationship_status: StageStatus,
    pub embedding_status: StageStatus,
    pub enrichment_attempts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enriched_at: Option<DateTime<Utc>>,

    // ========== Caller-supplied structure ==========
    pub metadata: Map<String, Value>,
    pub tags: Vec<String>,
    /// Capped at [`MAX_SOURCE_CONTEXT_BYTES`] serialized
    pub source_context: Map<String, Value>,
    pub memory_type: String,

    // ========== Lifecycle ==========
    pub state: String,
    pub state_updated_at: DateTime<Utc>,

    // ========== Provenance ==========
    pub created_by: String,
    pub session_id: String,

    // ========== Quality signals ==========
    pub access_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub decay_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decay_updated_at: Option<DateTime<Utc>>,

    // ========== Evolution ==========
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supersedes_id: Option<String>,

    // ========== Soft delete ==========
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Memory {
    /// Build a fresh record from caller input. IDs are content-addressed,
    /// statuses start pending and timestamps default to now.
    pub fn build(input: NewMemory) -> Self {
        let now = Utc::now();
        let id = super::id::memory_id(&input.domain, &input.content);
        let content_hash = super::id::content_hash(&input.content);
        Self {
            id,
            content_hash,
            content: input.content,
            source: input.source,
            domain: input.domain,
            timestamp: input.timestamp.unwrap_or(now),
            created_at: now,
            updated_at: now,
            status: EnrichmentStatus::Pending,
            entity_status: StageStatus::Pending,
            relationship_status: StageStatus::Pending,
            embedding_status: StageStatus::Pending,
            enrichment_attempts: 0,
            enrichment_error: None,
            enriched_at: None,
            metadata: input.metadata,
            tags: input.tags,
            source_context: input.source_context,
            memory_type: input.memory_type,
            state: "active".to_string(),
            state_updated_at: now,
            created_by: input.created_by,
            session_id: input.session_id,
            access_count: 0,
            last_accessed_at: None,
            decay_score: 1.0,
            decay_updated_at: None,
            supersedes_id: input.supersedes_id,
            deleted_at: None,
        }
    }

    /// True when the memory is visible to default queries.
    pub fn is_visible(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// True when every enrichment stage has completed.
    pub fn is_fully_enriched(&self) -> bool {
        self.entity_status == StageStatus::Completed
            && self.relationship_status == StageStatus::Completed
            && self.embedding_status == StageStatus::Completed
    }
}

// ============================================================================
// INPUT TYPES
// ============================================================================

/// Input for ingesting a new memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewMemory {
    /// The content to remember
    pub content: String,
    /// Agent-supplied origin tag ("manual", "auto", a tool name, ...)
    pub source: String,
    /// Logical partition tag
    #[serde(default)]
    pub domain: String,
    /// Caller-asserted event time (defaults to now)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub source_context: Map<String, Value>,
    #[serde(default)]
    pub memory_type: String,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub session_id: String,
    /// Previous version this memory replaces
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supersedes_id: Option<String>,
}

impl Default for NewMemory {
    fn default() -> Self {
        Self {
            content: String::new(),
            source: "manual".to_string(),
            domain: String::new(),
            timestamp: None,
            tags: vec![],
            metadata: Map::new(),
            source_context: Map::new(),
            memory_type: String::new(),
            created_by: String::new(),
            session_id: String::new(),
            supersedes_id: None,
        }
    }
}

/// Targeted update of a memory's enrichment bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentUpdate {
    pub status: Option<EnrichmentStatus>,
    pub entity_status: Option<StageStatus>,
    pub relationship_status: Option<StageStatus>,
    pub embedding_status: Option<StageStatus>,
    /// Increment `enrichment_attempts` by one
    pub increment_attempts: bool,
    /// Set the last error string
    pub error: Option<String>,
    /// Clear any recorded error
    pub clear_error: bool,
    pub enriched_at: Option<DateTime<Utc>>,
}

// ============================================================================
// LISTING
// ============================================================================

/// Whitelisted sort fields for [`ListOptions`].
///
/// The sort field is the only value interpolated into SQL, so anything
/// outside this set silently resets to the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Id,
    Status,
    DecayScore,
    AccessCount,
}

impl SortField {
    pub fn as_column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::Id => "id",
            SortField::Status => "status",
            SortField::DecayScore => "decay_score",
            SortField::AccessCount => "access_count",
        }
    }

    /// Parse a caller-supplied field name; anything unknown becomes the
    /// default rather than an error.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "created_at" => SortField::CreatedAt,
            "updated_at" => SortField::UpdatedAt,
            "id" => SortField::Id,
            "status" => SortField::Status,
            "decay_score" => SortField::DecayScore,
            "access_count" => SortField::AccessCount,
            _ => SortField::default(),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "asc" | "ASC" => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }
}

/// Filtered, paginated listing options.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub page: u32,
    pub limit: u32,
    pub sort_field: SortField,
    pub sort_order: SortOrder,
    pub status: Option<EnrichmentStatus>,
    pub state: Option<String>,
    pub domain: Option<String>,
    pub created_by: Option<String>,
    pub session_id: Option<String>,
    pub memory_type: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub min_decay_score: Option<f64>,
    pub include_deleted: bool,
    pub only_deleted: bool,
}

impl ListOptions {
    /// Clamp page/limit into their documented ranges.
    pub fn normalized(mut self) -> Self {
        if self.page < 1 {
            self.page = 1;
        }
        if self.limit < 1 {
            self.limit = 10;
        }
        if self.limit > 100 {
            self.limit = 100;
        }
        self
    }

    pub fn offset(&self) -> u32 {
        (self.page - 1) * self.limit
    }
}

/// One page of listing results.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
}
