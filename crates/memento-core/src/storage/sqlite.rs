//! SQLite storage engine.
//!
//! Durable transactional store for memories, entities, relationships,
//! memory links, embeddings and settings.
//!
//! Uses separate reader/writer connections for interior mutability.
//! All methods take `&self`, making the store `Send + Sync` so callers can
//! share it as `Arc<SqliteStore>` instead of `Arc<Mutex<SqliteStore>>`.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};

use crate::decay;
use crate::embeddings::Embedding;
use crate::error::{Error, Result};
use crate::memory::{
    can_transition, entity_id, is_valid_state, link_id, relationship_id, content_hash, Entity,
    EntityType, EnrichmentStatus, EnrichmentUpdate, ListOptions, Memory, MemoryEntity, MemoryLink,
    Page, Relationship, RelationshipType, StageStatus, EVOLUTION_CHAIN_CAP,
    MAX_SOURCE_CONTEXT_BYTES,
};

use super::migrations::MigrationManager;

// ============================================================================
// AUXILIARY TYPES
// ============================================================================

/// Lightweight memory reference used by graph traversal.
#[derive(Debug, Clone)]
pub struct MemoryRef {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub decay_score: f64,
}

/// Aggregate store counters.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_memories: u64,
    pub pending: u64,
    pub enriched: u64,
    pub failed: u64,
    pub deleted: u64,
    pub entities: u64,
    pub relationships: u64,
    pub embeddings: u64,
}

// ============================================================================
// STORE
// ============================================================================

/// SQLite-backed storage engine.
pub struct SqliteStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStore {
    /// Apply PRAGMAs to a connection.
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) a store, applying the crate's builtin migrations.
    pub fn open(db_path: Option<PathBuf>) -> Result<Self> {
        Self::open_with_migrations(db_path, &MigrationManager::builtin())
    }

    /// Open with an explicit migration set (e.g. discovered from a
    /// directory).
    pub fn open_with_migrations(
        db_path: Option<PathBuf>,
        migrations: &MigrationManager,
    ) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = ProjectDirs::from("io", "memento", "memento").ok_or_else(|| {
                    Error::Transient("could not determine project directories".to_string())
                })?;
                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                data_dir.join("memento.db")
            }
        };

        let writer = Connection::open(&path)?;
        Self::configure_connection(&writer)?;
        migrations.up(&writer)?;

        let reader = Connection::open(&path)?;
        Self::configure_connection(&reader)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            path,
        })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| Error::Transient("writer lock poisoned".to_string()))
    }

    fn reader(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| Error::Transient("reader lock poisoned".to_string()))
    }

    // ========================================================================
    // MEMORY CRUD
    // ========================================================================

    /// Upsert a memory by ID.
    ///
    /// Recomputes `content_hash`, validates `source_context` size and fails
    /// `invalid-input` before any mutation reaches the store.
    pub fn store(&self, memory: &Memory) -> Result<Memory> {
        validate_memory(memory)?;

        let now = Utc::now();
        let metadata = serde_json::to_string(&memory.metadata)?;
        let tags = serde_json::to_string(&memory.tags)?;
        let source_context = serde_json::to_string(&memory.source_context)?;
        let hash = content_hash(&memory.content);

        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO memories (
                id, content, content_hash, source, domain, timestamp,
                created_at, updated_at,
                status, entity_status, relationship_status, embedding_status,
                enrichment_attempts, enrichment_error, enriched_at,
                metadata, tags, source_context, memory_type,
                state, state_updated_at,
                created_by, session_id,
                access_count, last_accessed_at, decay_score, decay_updated_at,
                supersedes_id, deleted_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                ?7, ?8,
                ?9, ?10, ?11, ?12,
                ?13, ?14, ?15,
                ?16, ?17, ?18, ?19,
                ?20, ?21,
                ?22, ?23,
                ?24, ?25, ?26, ?27,
                ?28, ?29
            )
            ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                content_hash = excluded.content_hash,
                source = excluded.source,
                domain = excluded.domain,
                timestamp = excluded.timestamp,
                updated_at = excluded.updated_at,
                status = excluded.status,
                entity_status = excluded.entity_status,
                relationship_status = excluded.relationship_status,
                embedding_status = excluded.embedding_status,
                enrichment_error = excluded.enrichment_error,
                enriched_at = excluded.enriched_at,
                metadata = excluded.metadata,
                tags = excluded.tags,
                source_context = excluded.source_context,
                memory_type = excluded.memory_type,
                state = excluded.state,
                state_updated_at = excluded.state_updated_at,
                created_by = excluded.created_by,
                session_id = excluded.session_id,
                supersedes_id = excluded.supersedes_id",
            params![
                memory.id,
                memory.content,
                hash,
                memory.source,
                memory.domain,
                memory.timestamp,
                memory.created_at,
                now,
                memory.status.as_str(),
                memory.entity_status.as_str(),
                memory.relationship_status.as_str(),
                memory.embedding_status.as_str(),
                memory.enrichment_attempts,
                memory.enrichment_error,
                memory.enriched_at,
                metadata,
                tags,
                source_context,
                memory.memory_type,
                memory.state,
                memory.state_updated_at,
                memory.created_by,
                memory.session_id,
                memory.access_count,
                memory.last_accessed_at,
                memory.decay_score,
                memory.decay_updated_at,
                memory.supersedes_id,
                memory.deleted_at,
            ],
        )?;
        drop(writer);

        self.get_any(&memory.id)?
            .ok_or_else(|| Error::NotFound(memory.id.clone()))
    }

    /// Fetch a memory, excluding soft-deleted rows.
    pub fn get(&self, id: &str) -> Result<Memory> {
        self.get_visible(id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn get_visible(&self, id: &str) -> Result<Option<Memory>> {
        let reader = self.reader()?;
        let memory = reader
            .query_row(
                "SELECT * FROM memories WHERE id = ?1 AND deleted_at IS NULL",
                params![id],
                row_to_memory,
            )
            .optional()?;
        Ok(memory)
    }

    /// Fetch regardless of soft-delete (explicit include-deleted access).
    pub fn get_any(&self, id: &str) -> Result<Option<Memory>> {
        let reader = self.reader()?;
        let memory = reader
            .query_row(
                "SELECT * FROM memories WHERE id = ?1",
                params![id],
                row_to_memory,
            )
            .optional()?;
        Ok(memory)
    }

    /// Update an existing memory. Fails `not-found` when absent; otherwise
    /// behaves like [`SqliteStore::store`] with `updated_at = now`.
    pub fn update(&self, memory: &Memory) -> Result<Memory> {
        if self.get_visible(&memory.id)?.is_none() {
            return Err(Error::NotFound(memory.id.clone()));
        }
        self.store(memory)
    }

    /// Soft delete. `not-found` when absent or already deleted.
    pub fn delete(&self, id: &str) -> Result<()> {
        let writer = self.writer()?;
        let changed = writer.execute(
            "UPDATE memories SET deleted_at = ?1, updated_at = ?1
             WHERE id = ?2 AND deleted_at IS NULL",
            params![Utc::now(), id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Clear a soft delete. `not-found` when the row is not soft-deleted.
    pub fn restore(&self, id: &str) -> Result<Memory> {
        let writer = self.writer()?;
        let changed = writer.execute(
            "UPDATE memories SET deleted_at = NULL, updated_at = ?1
             WHERE id = ?2 AND deleted_at IS NOT NULL",
            params![Utc::now(), id],
        )?;
        drop(writer);
        if changed == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        self.get(id)
    }

    /// Hard delete; referential integrity cascades to associations,
    /// embeddings and links.
    pub fn purge(&self, id: &str) -> Result<()> {
        let writer = self.writer()?;
        let changed = writer.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Filtered, paginated listing.
    ///
    /// The filtered query runs twice: once with LIMIT/OFFSET for the items
    /// and once as COUNT(*) with identical filters for the total.
    pub fn list(&self, opts: ListOptions) -> Result<Page<Memory>> {
        let opts = opts.normalized();
        let (where_clause, values) = build_list_filters(&opts);

        let items_sql = format!(
            "SELECT * FROM memories {} ORDER BY {} {} LIMIT {} OFFSET {}",
            where_clause,
            opts.sort_field.as_column(),
            opts.sort_order.as_sql(),
            opts.limit,
            opts.offset(),
        );
        let count_sql = format!("SELECT COUNT(*) FROM memories {}", where_clause);

        let reader = self.reader()?;
        let mut stmt = reader.prepare(&items_sql)?;
        let items: Vec<Memory> = stmt
            .query_map(params_from_iter(values.iter().map(|v| v.as_ref())), row_to_memory)?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);

        let total: u64 = reader.query_row(
            &count_sql,
            params_from_iter(values.iter().map(|v| v.as_ref())),
            |row| row.get::<_, i64>(0).map(|n| n as u64),
        )?;
        drop(reader);

        let has_more = (opts.offset() as u64 + items.len() as u64) < total;
        Ok(Page {
            items,
            total,
            page: opts.page,
            page_size: opts.limit,
            has_more,
        })
    }

    /// Recency-ordered listing of visible memories (search fallback path).
    pub fn list_recent(&self, limit: u32, offset: u32) -> Result<Vec<Memory>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM memories WHERE deleted_at IS NULL
             ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
        )?;
        let items = stmt
            .query_map(params![limit, offset], row_to_memory)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(items)
    }

    // ========================================================================
    // TARGETED UPDATES
    // ========================================================================

    /// Set the top-level enrichment status.
    pub fn update_status(&self, id: &str, status: EnrichmentStatus) -> Result<()> {
        let writer = self.writer()?;
        let changed = writer.execute(
            "UPDATE memories SET status = ?1, updated_at = ?2
             WHERE id = ?3 AND deleted_at IS NULL",
            params![status.as_str(), Utc::now(), id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Apply a targeted enrichment bookkeeping update.
    pub fn update_enrichment(&self, id: &str, update: &EnrichmentUpdate) -> Result<()> {
        let mut sets: Vec<String> = vec!["updated_at = ?".to_string()];
        let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(Utc::now())];

        if let Some(status) = update.status {
            sets.push("status = ?".to_string());
            values.push(Box::new(status.as_str()));
        }
        if let Some(status) = update.entity_status {
            sets.push("entity_status = ?".to_string());
            values.push(Box::new(status.as_str()));
        }
        if let Some(status) = update.relationship_status {
            sets.push("relationship_status = ?".to_string());
            values.push(Box::new(status.as_str()));
        }
        if let Some(status) = update.embedding_status {
            sets.push("embedding_status = ?".to_string());
            values.push(Box::new(status.as_str()));
        }
        if update.increment_attempts {
            sets.push("enrichment_attempts = enrichment_attempts + 1".to_string());
        }
        if update.clear_error {
            sets.push("enrichment_error = NULL".to_string());
        } else if let Some(error) = &update.error {
            sets.push("enrichment_error = ?".to_string());
            values.push(Box::new(error.clone()));
        }
        if let Some(at) = update.enriched_at {
            sets.push("enriched_at = ?".to_string());
            values.push(Box::new(at));
        }

        let sql = format!("UPDATE memories SET {} WHERE id = ?", sets.join(", "));
        values.push(Box::new(id.to_string()));

        let writer = self.writer()?;
        let changed =
            writer.execute(&sql, params_from_iter(values.iter().map(|v| v.as_ref())))?;
        if changed == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Lifecycle transition, validated against the allow-list and the
    /// declared transition graph.
    pub fn update_state(&self, id: &str, state: &str) -> Result<Memory> {
        if !is_valid_state(state) {
            return Err(Error::InvalidInput(format!(
                "unknown lifecycle state: {}",
                state
            )));
        }
        let current = self.get(id)?;
        if !can_transition(&current.state, state) {
            return Err(Error::InvalidInput(format!(
                "invalid lifecycle transition: {} -> {}",
                current.state, state
            )));
        }

        let writer = self.writer()?;
        writer.execute(
            "UPDATE memories SET state = ?1, state_updated_at = ?2, updated_at = ?2
             WHERE id = ?3 AND deleted_at IS NULL",
            params![state, Utc::now(), id],
        )?;
        drop(writer);
        self.get(id)
    }

    /// Atomic access bump: count + recency + capped decay bonus.
    pub fn increment_access_count(&self, id: &str) -> Result<()> {
        let writer = self.writer()?;
        let changed = writer.execute(
            "UPDATE memories SET
                access_count = access_count + 1,
                last_accessed_at = ?1,
                decay_score = MIN(decay_score + 0.1, 1.0)
             WHERE id = ?2 AND deleted_at IS NULL",
            params![Utc::now(), id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    // ========================================================================
    // EVOLUTION CHAIN
    // ========================================================================

    /// Version history via `supersedes_id`, root first.
    ///
    /// Walks backward to the root (stopping at purged parents), then forward
    /// via reverse lookups. Cycle-guarded with a visited set and capped at
    /// [`EVOLUTION_CHAIN_CAP`] nodes.
    pub fn get_evolution_chain(&self, id: &str) -> Result<Vec<Memory>> {
        let start = self
            .get_any(id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let mut visited: std::collections::HashSet<String> = std::collections::HashSet::new();
        visited.insert(start.id.clone());
        let mut chain = std::collections::VecDeque::new();
        chain.push_back(start.clone());

        // Backward: follow supersedes_id to the root.
        let mut current = start;
        while chain.len() < EVOLUTION_CHAIN_CAP {
            let Some(parent_id) = current.supersedes_id.clone() else {
                break;
            };
            if !visited.insert(parent_id.clone()) {
                tracing::warn!(memory_id = %id, "cycle detected in evolution chain");
                break;
            }
            match self.get_any(&parent_id)? {
                Some(parent) => {
                    chain.push_front(parent.clone());
                    current = parent;
                }
                // Parent was purged; the chain starts here.
                None => break,
            }
        }

        // Forward: repeatedly find the memory superseding the tip.
        let mut tip_id = chain.back().map(|m| m.id.clone()).unwrap_or_default();
        while chain.len() < EVOLUTION_CHAIN_CAP {
            let reader = self.reader()?;
            let next = reader
                .query_row(
                    "SELECT * FROM memories WHERE supersedes_id = ?1 LIMIT 1",
                    params![tip_id],
                    row_to_memory,
                )
                .optional()?;
            drop(reader);

            match next {
                Some(next) if visited.insert(next.id.clone()) => {
                    tip_id = next.id.clone();
                    chain.push_back(next);
                }
                _ => break,
            }
        }

        Ok(chain.into_iter().collect())
    }

    // ========================================================================
    // MEMORY LINKS & ASSOCIATIONS
    // ========================================================================

    /// Create (or re-assert) a typed memory-to-memory link.
    pub fn add_memory_link(&self, source_id: &str, target_id: &str, link_type: &str) -> Result<MemoryLink> {
        let id = link_id();
        let now = Utc::now();
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO memory_links (id, source_id, target_id, link_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(source_id, target_id, link_type) DO NOTHING",
            params![id, source_id, target_id, link_type, now],
        )?;
        let link = writer.query_row(
            "SELECT id, source_id, target_id, link_type, created_at FROM memory_links
             WHERE source_id = ?1 AND target_id = ?2 AND link_type = ?3",
            params![source_id, target_id, link_type],
            |row| {
                Ok(MemoryLink {
                    id: row.get(0)?,
                    source_id: row.get(1)?,
                    target_id: row.get(2)?,
                    link_type: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )?;
        Ok(link)
    }

    /// Memories reachable via one outgoing memory link of the given type.
    pub fn get_memories_by_relation_type(&self, id: &str, link_type: &str) -> Result<Vec<Memory>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT m.* FROM memories m
             JOIN memory_links l ON m.id = l.target_id
             WHERE l.source_id = ?1 AND l.link_type = ?2 AND m.deleted_at IS NULL
             ORDER BY l.created_at",
        )?;
        let items = stmt
            .query_map(params![id, link_type], row_to_memory)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(items)
    }

    /// IDs of visible memories sharing at least one entity with `id`.
    pub fn get_related_memories(&self, id: &str) -> Result<Vec<String>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT DISTINCT other.memory_id FROM memory_entities me
             JOIN memory_entities other ON other.entity_id = me.entity_id
             JOIN memories m ON m.id = other.memory_id
             WHERE me.memory_id = ?1 AND other.memory_id != ?1 AND m.deleted_at IS NULL
             ORDER BY other.memory_id",
        )?;
        let ids = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(ids)
    }

    /// Entities associated with a memory.
    pub fn get_memory_entities(&self, id: &str) -> Result<Vec<Entity>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT e.* FROM entities e
             JOIN memory_entities me ON me.entity_id = e.id
             WHERE me.memory_id = ?1
             ORDER BY me.frequency DESC, e.name",
        )?;
        let items = stmt
            .query_map(params![id], row_to_entity)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(items)
    }

    /// The association rows for a memory (frequency + confidence).
    pub fn get_memory_entity_links(&self, id: &str) -> Result<Vec<MemoryEntity>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT memory_id, entity_id, frequency, confidence FROM memory_entities
             WHERE memory_id = ?1",
        )?;
        let items = stmt
            .query_map(params![id], |row| {
                Ok(MemoryEntity {
                    memory_id: row.get(0)?,
                    entity_id: row.get(1)?,
                    frequency: row.get(2)?,
                    confidence: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(items)
    }

    // ========================================================================
    // ENTITIES & RELATIONSHIPS
    // ========================================================================

    /// Upsert an entity by its `(name, type)` uniqueness pair.
    pub fn upsert_entity(
        &self,
        name: &str,
        entity_type: EntityType,
        description: &str,
        attributes: &Map<String, Value>,
    ) -> Result<Entity> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("entity name must not be empty".into()));
        }
        let id = entity_id(name, entity_type.as_str());
        let now = Utc::now();
        let attrs = serde_json::to_string(attributes)?;

        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO entities (id, name, entity_type, description, attributes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(name, entity_type) DO UPDATE SET
                description = CASE WHEN excluded.description != '' THEN excluded.description ELSE description END,
                attributes = CASE WHEN excluded.attributes != '{}' THEN excluded.attributes ELSE attributes END,
                updated_at = excluded.updated_at",
            params![id, name, entity_type.as_str(), description, attrs, now],
        )?;
        let entity = writer.query_row(
            "SELECT * FROM entities WHERE name = ?1 AND entity_type = ?2",
            params![name, entity_type.as_str()],
            row_to_entity,
        )?;
        Ok(entity)
    }

    /// Fetch an entity by ID.
    pub fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        let reader = self.reader()?;
        let entity = reader
            .query_row("SELECT * FROM entities WHERE id = ?1", params![id], row_to_entity)
            .optional()?;
        Ok(entity)
    }

    /// Associate a memory with an entity, bumping co-occurrence on repeat.
    pub fn link_memory_entity(&self, memory_id: &str, entity_id: &str, confidence: f64) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO memory_entities (memory_id, entity_id, frequency, confidence)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(memory_id, entity_id) DO UPDATE SET
                frequency = frequency + 1,
                confidence = MAX(confidence, excluded.confidence)",
            params![memory_id, entity_id, confidence.clamp(0.0, 1.0)],
        )?;
        Ok(())
    }

    /// Upsert a directed typed relationship between two entities.
    pub fn upsert_relationship(
        &self,
        source_id: &str,
        target_id: &str,
        relationship_type: RelationshipType,
        weight: f64,
        context: &str,
    ) -> Result<Relationship> {
        let id = relationship_id();
        let now = Utc::now();

        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO relationships (id, source_id, target_id, relationship_type, weight, context, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, '{}', ?7, ?7)
             ON CONFLICT(source_id, target_id, relationship_type) DO UPDATE SET
                weight = excluded.weight,
                context = CASE WHEN excluded.context != '' THEN excluded.context ELSE context END,
                updated_at = excluded.updated_at",
            params![id, source_id, target_id, relationship_type.as_str(), weight, context, now],
        )?;
        let relationship = writer.query_row(
            "SELECT * FROM relationships
             WHERE source_id = ?1 AND target_id = ?2 AND relationship_type = ?3",
            params![source_id, target_id, relationship_type.as_str()],
            row_to_relationship,
        )?;
        Ok(relationship)
    }

    /// Entity IDs reachable from `entity_id` over relationship edges in
    /// either declared direction. One row per edge traversed.
    pub fn neighbor_entities(&self, entity_id: &str) -> Result<Vec<String>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT target_id FROM relationships WHERE source_id = ?1
             UNION ALL
             SELECT source_id FROM relationships WHERE target_id = ?1",
        )?;
        let ids = stmt
            .query_map(params![entity_id], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(ids)
    }

    /// Visible memories associated with an entity (graph traversal hop).
    pub fn memories_for_entity(&self, entity_id: &str) -> Result<Vec<MemoryRef>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT m.id, m.created_at, m.decay_score FROM memories m
             JOIN memory_entities me ON me.memory_id = m.id
             WHERE me.entity_id = ?1 AND m.deleted_at IS NULL",
        )?;
        let refs = stmt
            .query_map(params![entity_id], |row| {
                Ok(MemoryRef {
                    id: row.get(0)?,
                    created_at: row.get(1)?,
                    decay_score: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(refs)
    }

    // ========================================================================
    // EMBEDDINGS
    // ========================================================================

    /// Persist (or replace) a memory's embedding.
    pub fn store_embedding(&self, memory_id: &str, embedding: &Embedding) -> Result<()> {
        if embedding.vector.is_empty() {
            return Err(Error::InvalidInput("embedding must not be empty".into()));
        }
        if embedding.dimension != embedding.vector.len() {
            return Err(Error::InvalidInput(format!(
                "embedding dimension {} does not match vector length {}",
                embedding.dimension,
                embedding.vector.len()
            )));
        }
        let writer = self.writer()?;
        writer.execute(
            "INSERT OR REPLACE INTO embeddings (memory_id, embedding, dimension, model, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                memory_id,
                embedding.to_bytes(),
                embedding.dimension as i64,
                embedding.model,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a memory's embedding.
    pub fn get_embedding(&self, memory_id: &str) -> Result<Option<Embedding>> {
        let reader = self.reader()?;
        let row = reader
            .query_row(
                "SELECT embedding, dimension, model FROM embeddings WHERE memory_id = ?1",
                params![memory_id],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((bytes, dimension, model)) => {
                let embedding = Embedding::from_bytes(&bytes, model).ok_or_else(|| {
                    Error::Integrity(format!("corrupt embedding blob for {}", memory_id))
                })?;
                if embedding.dimension != dimension as usize {
                    return Err(Error::Integrity(format!(
                        "embedding dimension mismatch for {}: {} != {}",
                        memory_id, embedding.dimension, dimension
                    )));
                }
                Ok(Some(embedding))
            }
        }
    }

    /// All embeddings of visible memories (brute-force vector scan input).
    pub fn all_embeddings(&self) -> Result<Vec<(String, Embedding)>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT e.memory_id, e.embedding, e.model FROM embeddings e
             JOIN memories m ON m.id = e.memory_id
             WHERE m.deleted_at IS NULL",
        )?;
        let rows: Vec<(String, Vec<u8>, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);
        drop(reader);

        let mut out = Vec::with_capacity(rows.len());
        for (id, bytes, model) in rows {
            if let Some(embedding) = Embedding::from_bytes(&bytes, model) {
                out.push((id, embedding));
            } else {
                tracing::warn!(memory_id = %id, "skipping corrupt embedding blob");
            }
        }
        Ok(out)
    }

    // ========================================================================
    // FULL-TEXT SEARCH
    // ========================================================================

    /// Ranked FTS match over visible memories. Returns `(id, rank)` with
    /// lower (more negative bm25) rank meaning a better match.
    pub fn fts_search(&self, match_expr: &str, limit: u32, offset: u32) -> Result<Vec<(String, f64)>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT m.id, rank FROM memories m
             JOIN memories_fts fts ON m.id = fts.id
             WHERE memories_fts MATCH ?1 AND m.deleted_at IS NULL
             ORDER BY rank
             LIMIT ?2 OFFSET ?3",
        )?;
        let hits = stmt
            .query_map(params![match_expr, limit, offset], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(hits)
    }

    /// COUNT(*) twin of [`SqliteStore::fts_search`].
    pub fn fts_count(&self, match_expr: &str) -> Result<u64> {
        let reader = self.reader()?;
        let count: i64 = reader.query_row(
            "SELECT COUNT(*) FROM memories m
             JOIN memories_fts fts ON m.id = fts.id
             WHERE memories_fts MATCH ?1 AND m.deleted_at IS NULL",
            params![match_expr],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ========================================================================
    // ENRICHMENT SUPPORT
    // ========================================================================

    /// Atomically claim a memory for enrichment: `pending -> processing`.
    ///
    /// Returns false when the row is gone, deleted, or already held by
    /// another worker; the atomic transition is what keeps two workers off
    /// the same memory.
    pub fn try_claim_for_enrichment(&self, id: &str) -> Result<bool> {
        let writer = self.writer()?;
        let changed = writer.execute(
            "UPDATE memories SET
                status = 'processing',
                entity_status = 'processing',
                updated_at = ?1
             WHERE id = ?2 AND deleted_at IS NULL AND status != 'processing'",
            params![Utc::now(), id],
        )?;
        Ok(changed > 0)
    }

    /// Batch of unfinished memories for the startup recovery scan.
    pub fn list_unfinished(&self, limit: u32, offset: u32) -> Result<Vec<(String, EnrichmentStatus)>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, status FROM memories
             WHERE status IN ('pending', 'processing') AND deleted_at IS NULL
             ORDER BY created_at
             LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt
            .query_map(params![limit, offset], |row| {
                let status: String = row.get(1)?;
                Ok((
                    row.get::<_, String>(0)?,
                    EnrichmentStatus::parse_name(&status).unwrap_or_default(),
                ))
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    /// Record an out-of-allow-list type emitted by the LLM.
    pub fn record_unknown_type(&self, domain: &str, type_name: &str) -> Result<()> {
        let now = Utc::now();
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO unknown_type_stats (domain, type_name, first_seen, last_seen, count)
             VALUES (?1, ?2, ?3, ?3, 1)
             ON CONFLICT(domain, type_name) DO UPDATE SET
                last_seen = excluded.last_seen,
                count = count + 1",
            params![domain, type_name, now],
        )?;
        Ok(())
    }

    /// Merge one key into a memory's metadata map.
    pub fn merge_metadata(&self, id: &str, key: &str, value: Value) -> Result<()> {
        let writer = self.writer()?;
        let raw: Option<String> = writer
            .query_row(
                "SELECT metadata FROM memories WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            return Err(Error::NotFound(id.to_string()));
        };
        let mut metadata: Map<String, Value> = serde_json::from_str(&raw).unwrap_or_default();
        metadata.insert(key.to_string(), value);
        writer.execute(
            "UPDATE memories SET metadata = ?1 WHERE id = ?2",
            params![serde_json::to_string(&metadata)?, id],
        )?;
        Ok(())
    }

    // ========================================================================
    // SETTINGS
    // ========================================================================

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now()],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let reader = self.reader()?;
        let value = reader
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    // ========================================================================
    // DECAY
    // ========================================================================

    /// Batch decay update over active, visible memories.
    ///
    /// Multiplies each `decay_score` by the half-life factor for the time
    /// elapsed since last access (or creation). Returns rows updated.
    pub fn update_decay_scores(&self, half_life_days: f64) -> Result<u64> {
        let now = Utc::now();
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, decay_score, last_accessed_at, created_at FROM memories
             WHERE deleted_at IS NULL AND state = 'active'",
        )?;
        let rows: Vec<(String, f64, Option<DateTime<Utc>>, DateTime<Utc>)> = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);
        drop(reader);

        let mut updated = 0u64;
        let writer = self.writer()?;
        let tx = writer.unchecked_transaction()?;
        for (id, score, last_accessed, created_at) in rows {
            let reference = last_accessed.unwrap_or(created_at);
            let elapsed_days = (now - reference).num_seconds() as f64 / 86_400.0;
            let factor = decay::decay_factor(elapsed_days, half_life_days);
            let next = (score * factor).max(0.0);
            tx.execute(
                "UPDATE memories SET decay_score = ?1, decay_updated_at = ?2 WHERE id = ?3",
                params![next, now, id],
            )?;
            updated += 1;
        }
        tx.commit()?;
        Ok(updated)
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Consistent point-in-time snapshot via SQLite's online backup API.
    pub fn backup_to(&self, dest: &Path) -> Result<()> {
        let reader = self.reader()?;
        let mut dst = Connection::open(dest)?;
        let backup = rusqlite::backup::Backup::new(&reader, &mut dst)?;
        backup.run_to_completion(256, std::time::Duration::from_millis(10), None)?;
        Ok(())
    }

    /// PRAGMA integrity_check == "ok".
    pub fn integrity_check(&self) -> Result<()> {
        let reader = self.reader()?;
        let result: String =
            reader.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if result != "ok" {
            return Err(Error::Integrity(format!("integrity check failed: {}", result)));
        }
        Ok(())
    }

    /// Aggregate counters.
    pub fn stats(&self) -> Result<StoreStats> {
        let reader = self.reader()?;
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = reader.query_row(sql, [], |row| row.get(0))?;
            Ok(n as u64)
        };
        Ok(StoreStats {
            total_memories: count("SELECT COUNT(*) FROM memories WHERE deleted_at IS NULL")?,
            pending: count(
                "SELECT COUNT(*) FROM memories WHERE status = 'pending' AND deleted_at IS NULL",
            )?,
            enriched: count(
                "SELECT COUNT(*) FROM memories WHERE status = 'enriched' AND deleted_at IS NULL",
            )?,
            failed: count(
                "SELECT COUNT(*) FROM memories WHERE status = 'failed' AND deleted_at IS NULL",
            )?,
            deleted: count("SELECT COUNT(*) FROM memories WHERE deleted_at IS NOT NULL")?,
            entities: count("SELECT COUNT(*) FROM entities")?,
            relationships: count("SELECT COUNT(*) FROM relationships")?,
            embeddings: count("SELECT COUNT(*) FROM embeddings")?,
        })
    }
}

// ============================================================================
// VALIDATION & ROW MAPPING
// ============================================================================

fn validate_memory(memory: &Memory) -> Result<()> {
    if memory.id.trim().is_empty() {
        return Err(Error::InvalidInput("memory id must not be empty".into()));
    }
    if memory.content.trim().is_empty() {
        return Err(Error::InvalidInput("memory content must not be empty".into()));
    }
    if memory.source.trim().is_empty() {
        return Err(Error::InvalidInput("memory source must not be empty".into()));
    }
    if !is_valid_state(&memory.state) {
        return Err(Error::InvalidInput(format!(
            "unknown lifecycle state: {}",
            memory.state
        )));
    }
    let context_len = serde_json::to_string(&memory.source_context)?.len();
    if context_len > MAX_SOURCE_CONTEXT_BYTES {
        return Err(Error::InvalidInput(format!(
            "source_context is {} bytes, cap is {}",
            context_len, MAX_SOURCE_CONTEXT_BYTES
        )));
    }
    Ok(())
}

fn parse_json_map(raw: Option<String>) -> Map<String, Value> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn parse_tags(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<Memory> {
    let status: String = row.get("status")?;
    let entity_status: String = row.get("entity_status")?;
    let relationship_status: String = row.get("relationship_status")?;
    let embedding_status: String = row.get("embedding_status")?;

    Ok(Memory {
        id: row.get("id")?,
        content: row.get("content")?,
        content_hash: row.get("content_hash")?,
        source: row.get("source")?,
        domain: row.get("domain")?,
        timestamp: row.get("timestamp")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        status: EnrichmentStatus::parse_name(&status).unwrap_or_default(),
        entity_status: StageStatus::parse_name(&entity_status).unwrap_or_default(),
        relationship_status: StageStatus::parse_name(&relationship_status).unwrap_or_default(),
        embedding_status: StageStatus::parse_name(&embedding_status).unwrap_or_default(),
        enrichment_attempts: row.get("enrichment_attempts")?,
        enrichment_error: row.get("enrichment_error")?,
        enriched_at: row.get("enriched_at")?,
        metadata: parse_json_map(row.get("metadata")?),
        tags: parse_tags(row.get("tags")?),
        source_context: parse_json_map(row.get("source_context")?),
        memory_type: row.get("memory_type")?,
        state: row.get("state")?,
        state_updated_at: row.get("state_updated_at")?,
        created_by: row.get("created_by")?,
        session_id: row.get("session_id")?,
        access_count: row.get("access_count")?,
        last_accessed_at: row.get("last_accessed_at")?,
        decay_score: row.get("decay_score")?,
        decay_updated_at: row.get("decay_updated_at")?,
        supersedes_id: row.get("supersedes_id")?,
        deleted_at: row.get("deleted_at")?,
    })
}

fn row_to_entity(row: &Row<'_>) -> rusqlite::Result<Entity> {
    let entity_type: String = row.get("entity_type")?;
    Ok(Entity {
        id: row.get("id")?,
        name: row.get("name")?,
        entity_type: EntityType::parse_name(&entity_type).unwrap_or(EntityType::Concept),
        description: row.get("description")?,
        attributes: parse_json_map(row.get("attributes")?),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_relationship(row: &Row<'_>) -> rusqlite::Result<Relationship> {
    let relationship_type: String = row.get("relationship_type")?;
    Ok(Relationship {
        id: row.get("id")?,
        source_id: row.get("source_id")?,
        target_id: row.get("target_id")?,
        relationship_type: RelationshipType::parse_name(&relationship_type)
            .unwrap_or(RelationshipType::RelatedTo),
        weight: row.get("weight")?,
        context: row.get("context")?,
        metadata: parse_json_map(row.get("metadata")?),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn build_list_filters(opts: &ListOptions) -> (String, Vec<Box<dyn ToSql>>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Box<dyn ToSql>> = Vec::new();

    if opts.only_deleted {
        clauses.push("deleted_at IS NOT NULL".to_string());
    } else if !opts.include_deleted {
        clauses.push("deleted_at IS NULL".to_string());
    }
    if let Some(status) = opts.status {
        clauses.push("status = ?".to_string());
        values.push(Box::new(status.as_str()));
    }
    if let Some(state) = &opts.state {
        clauses.push("state = ?".to_string());
        values.push(Box::new(state.clone()));
    }
    if let Some(domain) = &opts.domain {
        clauses.push("domain = ?".to_string());
        values.push(Box::new(domain.clone()));
    }
    if let Some(created_by) = &opts.created_by {
        clauses.push("created_by = ?".to_string());
        values.push(Box::new(created_by.clone()));
    }
    if let Some(session_id) = &opts.session_id {
        clauses.push("session_id = ?".to_string());
        values.push(Box::new(session_id.clone()));
    }
    if let Some(memory_type) = &opts.memory_type {
        clauses.push("memory_type = ?".to_string());
        values.push(Box::new(memory_type.clone()));
    }
    if let Some(after) = opts.created_after {
        clauses.push("created_at > ?".to_string());
        values.push(Box::new(after));
    }
    if let Some(before) = opts.created_before {
        clauses.push("created_at < ?".to_string());
        values.push(Box::new(before));
    }
    if let Some(min) = opts.min_decay_score {
        clauses.push("decay_score >= ?".to_string());
        values.push(Box::new(min));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    (where_clause, values)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::NewMemory;
    use tempfile::TempDir;

    fn test_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(Some(dir.path().join("test.db"))).unwrap();
        (store, dir)
    }

    fn sample(content: &str) -> Memory {
        Memory::build(NewMemory {
            content: content.to_string(),
            source: "manual".to_string(),
            domain: "test".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn store_get_roundtrip() {
        let (store, _dir) = test_store();
        let memory = sample("Rust uses ownership for memory safety");
        let stored = store.store(&memory).unwrap();

        assert_eq!(stored.id, memory.id);
        assert_eq!(stored.content, memory.content);
        assert_eq!(stored.content_hash, content_hash(&memory.content));
        assert_eq!(stored.status, EnrichmentStatus::Pending);

        let fetched = store.get(&memory.id).unwrap();
        assert_eq!(fetched.id, stored.id);
        assert_eq!(fetched.content, stored.content);
    }

    #[test]
    fn store_rejects_invalid_input() {
        let (store, _dir) = test_store();

        let mut memory = sample("content");
        memory.id = String::new();
        assert!(matches!(store.store(&memory), Err(Error::InvalidInput(_))));

        let mut memory = sample("content");
        memory.content = "   ".to_string();
        assert!(matches!(store.store(&memory), Err(Error::InvalidInput(_))));

        let mut memory = sample("content");
        memory.source = String::new();
        assert!(matches!(store.store(&memory), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn oversize_source_context_fails_before_mutation() {
        let (store, _dir) = test_store();
        let mut memory = sample("context heavy");
        memory
            .source_context
            .insert("blob".to_string(), Value::String("x".repeat(5000)));

        assert!(matches!(store.store(&memory), Err(Error::InvalidInput(_))));
        // Nothing was written.
        assert!(matches!(store.get(&memory.id), Err(Error::NotFound(_))));
    }

    #[test]
    fn upsert_preserves_identity() {
        let (store, _dir) = test_store();
        let memory = sample("first version");
        let first = store.store(&memory).unwrap();

        let mut second = first.clone();
        second.tags = vec!["updated".to_string()];
        let second = store.store(&second).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.tags, vec!["updated".to_string()]);

        let page = store.list(ListOptions::default()).unwrap();
        assert_eq!(page.total, 1);
    }

    #[test]
    fn update_requires_existence() {
        let (store, _dir) = test_store();
        let memory = sample("never stored");
        assert!(matches!(store.update(&memory), Err(Error::NotFound(_))));
    }

    #[test]
    fn soft_delete_restore_visibility() {
        let (store, _dir) = test_store();
        let memory = store.store(&sample("delete me")).unwrap();

        store.delete(&memory.id).unwrap();
        assert!(matches!(store.get(&memory.id), Err(Error::NotFound(_))));
        assert!(store.get_any(&memory.id).unwrap().is_some());

        // Double delete is not-found.
        assert!(matches!(store.delete(&memory.id), Err(Error::NotFound(_))));

        let page = store.list(ListOptions::default()).unwrap();
        assert_eq!(page.total, 0);

        let page = store
            .list(ListOptions {
                only_deleted: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 1);

        let restored = store.restore(&memory.id).unwrap();
        assert!(restored.deleted_at.is_none());
        assert!(store.get(&memory.id).is_ok());

        // Restoring a visible row is not-found.
        assert!(matches!(store.restore(&memory.id), Err(Error::NotFound(_))));
    }

    #[test]
    fn purge_cascades() {
        let (store, _dir) = test_store();
        let memory = store.store(&sample("purge target")).unwrap();
        let entity = store
            .upsert_entity("Rust", EntityType::Technology, "", &Map::new())
            .unwrap();
        store.link_memory_entity(&memory.id, &entity.id, 0.9).unwrap();
        store
            .store_embedding(&memory.id, &Embedding::new(vec![1.0, 2.0], "m"))
            .unwrap();

        store.purge(&memory.id).unwrap();
        assert!(store.get_any(&memory.id).unwrap().is_none());
        assert!(store.get_embedding(&memory.id).unwrap().is_none());
        assert!(store.get_memory_entities(&memory.id).unwrap().is_empty());
        // The entity itself survives.
        assert!(store.get_entity(&entity.id).unwrap().is_some());
    }

    #[test]
    fn list_pagination_totals() {
        let (store, _dir) = test_store();
        for i in 0..7 {
            store.store(&sample(&format!("memory number {}", i))).unwrap();
        }

        let mut seen = 0;
        let mut page_no = 1;
        loop {
            let page = store
                .list(ListOptions {
                    page: page_no,
                    limit: 3,
                    ..Default::default()
                })
                .unwrap();
            assert_eq!(page.total, 7);
            seen += page.items.len();
            if !page.has_more {
                break;
            }
            page_no += 1;
        }
        assert_eq!(seen, 7);
        assert_eq!(page_no, 3);
    }

    #[test]
    fn list_filters_by_status_and_window() {
        let (store, _dir) = test_store();
        let memory = store.store(&sample("pending one")).unwrap();
        let mut enriched = sample("enriched one");
        enriched.status = EnrichmentStatus::Enriched;
        store.store(&enriched).unwrap();

        let page = store
            .list(ListOptions {
                status: Some(EnrichmentStatus::Pending),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, memory.id);

        let page = store
            .list(ListOptions {
                created_after: Some(Utc::now() + chrono::Duration::hours(1)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[test]
    fn update_state_validates_transitions() {
        let (store, _dir) = test_store();
        let memory = store.store(&sample("lifecycle")).unwrap();

        let archived = store.update_state(&memory.id, "archived").unwrap();
        assert_eq!(archived.state, "archived");

        // archived -> completed is not in the graph.
        let err = store.update_state(&memory.id, "completed").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        // Unknown state names are rejected up front.
        let err = store.update_state(&memory.id, "limbo").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let active = store.update_state(&memory.id, "active").unwrap();
        assert_eq!(active.state, "active");
    }

    #[test]
    fn access_count_bump_caps_decay() {
        let (store, _dir) = test_store();
        let memory = store.store(&sample("accessed")).unwrap();

        for _ in 0..3 {
            store.increment_access_count(&memory.id).unwrap();
        }
        let after = store.get(&memory.id).unwrap();
        assert_eq!(after.access_count, 3);
        assert!(after.last_accessed_at.is_some());
        assert!((after.decay_score - 1.0).abs() < 1e-9, "capped at 1.0");

        store.delete(&memory.id).unwrap();
        assert!(matches!(
            store.increment_access_count(&memory.id),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn enrichment_update_targets_fields() {
        let (store, _dir) = test_store();
        let memory = store.store(&sample("enrich me")).unwrap();

        store
            .update_enrichment(
                &memory.id,
                &EnrichmentUpdate {
                    status: Some(EnrichmentStatus::Processing),
                    entity_status: Some(StageStatus::Processing),
                    increment_attempts: true,
                    error: Some("llm timeout".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        let after = store.get(&memory.id).unwrap();
        assert_eq!(after.status, EnrichmentStatus::Processing);
        assert_eq!(after.entity_status, StageStatus::Processing);
        assert_eq!(after.enrichment_attempts, 1);
        assert_eq!(after.enrichment_error.as_deref(), Some("llm timeout"));

        store
            .update_enrichment(
                &memory.id,
                &EnrichmentUpdate {
                    status: Some(EnrichmentStatus::Enriched),
                    clear_error: true,
                    enriched_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .unwrap();
        let after = store.get(&memory.id).unwrap();
        assert_eq!(after.status, EnrichmentStatus::Enriched);
        assert!(after.enrichment_error.is_none());
        assert!(after.enriched_at.is_some());
    }

    #[test]
    fn evolution_chain_walks_both_directions() {
        let (store, _dir) = test_store();
        let v1 = store.store(&sample("version one")).unwrap();

        let mut v2 = sample("version two");
        v2.supersedes_id = Some(v1.id.clone());
        let v2 = store.store(&v2).unwrap();

        let mut v3 = sample("version three");
        v3.supersedes_id = Some(v2.id.clone());
        let v3 = store.store(&v3).unwrap();

        // From the middle: full chain, root first.
        let chain = store.get_evolution_chain(&v2.id).unwrap();
        let ids: Vec<&str> = chain.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![v1.id.as_str(), v2.id.as_str(), v3.id.as_str()]);
    }

    #[test]
    fn evolution_chain_survives_cycles() {
        let (store, _dir) = test_store();
        let a = store.store(&sample("cycle a")).unwrap();
        let mut b = sample("cycle b");
        b.supersedes_id = Some(a.id.clone());
        let b = store.store(&b).unwrap();

        // Close the loop: a supersedes b.
        let mut a2 = store.get(&a.id).unwrap();
        a2.supersedes_id = Some(b.id.clone());
        store.store(&a2).unwrap();

        let chain = store.get_evolution_chain(&a.id).unwrap();
        assert!(chain.len() <= 3);
    }

    #[test]
    fn entity_upsert_is_keyed_by_name_and_type() {
        let (store, _dir) = test_store();
        let first = store
            .upsert_entity("Tokio", EntityType::Technology, "async runtime", &Map::new())
            .unwrap();
        let second = store
            .upsert_entity("Tokio", EntityType::Technology, "", &Map::new())
            .unwrap();
        assert_eq!(first.id, second.id);
        // Empty description does not clobber.
        assert_eq!(second.description, "async runtime");

        let other = store
            .upsert_entity("Tokio", EntityType::Project, "", &Map::new())
            .unwrap();
        assert_ne!(first.id, other.id);

        // Name matching is case-insensitive, like the deterministic IDs.
        let lowercase = store
            .upsert_entity("tokio", EntityType::Technology, "", &Map::new())
            .unwrap();
        assert_eq!(first.id, lowercase.id);
    }

    #[test]
    fn memory_entity_links_accumulate_frequency() {
        let (store, _dir) = test_store();
        let memory = store.store(&sample("uses tokio")).unwrap();
        let entity = store
            .upsert_entity("Tokio", EntityType::Technology, "", &Map::new())
            .unwrap();

        store.link_memory_entity(&memory.id, &entity.id, 0.5).unwrap();
        store.link_memory_entity(&memory.id, &entity.id, 0.9).unwrap();

        let links = store.get_memory_entity_links(&memory.id).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].frequency, 2);
        assert!((links[0].confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn relationship_upsert_and_neighbors() {
        let (store, _dir) = test_store();
        let a = store
            .upsert_entity("memento", EntityType::Project, "", &Map::new())
            .unwrap();
        let b = store
            .upsert_entity("sqlite", EntityType::Technology, "", &Map::new())
            .unwrap();

        let rel = store
            .upsert_relationship(&a.id, &b.id, RelationshipType::Uses, 1.0, "storage engine")
            .unwrap();
        assert_eq!(rel.relationship_type, RelationshipType::Uses);

        // Upsert on the same triple keeps one row.
        let rel2 = store
            .upsert_relationship(&a.id, &b.id, RelationshipType::Uses, 0.7, "")
            .unwrap();
        assert_eq!(rel.id, rel2.id);
        assert!((rel2.weight - 0.7).abs() < 1e-9);
        assert_eq!(rel2.context, "storage engine");

        // Both directions are traversable.
        assert_eq!(store.neighbor_entities(&a.id).unwrap(), vec![b.id.clone()]);
        assert_eq!(store.neighbor_entities(&b.id).unwrap(), vec![a.id.clone()]);
    }

    #[test]
    fn related_memories_share_entities() {
        let (store, _dir) = test_store();
        let m1 = store.store(&sample("first about rust")).unwrap();
        let m2 = store.store(&sample("second about rust")).unwrap();
        let m3 = store.store(&sample("unrelated")).unwrap();
        let entity = store
            .upsert_entity("Rust", EntityType::Technology, "", &Map::new())
            .unwrap();
        store.link_memory_entity(&m1.id, &entity.id, 1.0).unwrap();
        store.link_memory_entity(&m2.id, &entity.id, 1.0).unwrap();

        let related = store.get_related_memories(&m1.id).unwrap();
        assert_eq!(related, vec![m2.id.clone()]);
        assert!(store.get_related_memories(&m3.id).unwrap().is_empty());
    }

    #[test]
    fn memory_links_and_relation_type_lookup() {
        let (store, _dir) = test_store();
        let parent = store.store(&sample("consolidated summary")).unwrap();
        let child = store.store(&sample("detail memory")).unwrap();

        store.add_memory_link(&parent.id, &child.id, "contains").unwrap();
        // Re-asserting the same link is a no-op.
        store.add_memory_link(&parent.id, &child.id, "contains").unwrap();

        let children = store
            .get_memories_by_relation_type(&parent.id, "contains")
            .unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child.id);
    }

    #[test]
    fn embedding_roundtrip_and_dimension_invariant() {
        let (store, _dir) = test_store();
        let memory = store.store(&sample("vectorized")).unwrap();
        let embedding = Embedding::new(vec![0.1, -0.2, 0.3], "nomic-embed-text");

        store.store_embedding(&memory.id, &embedding).unwrap();
        let loaded = store.get_embedding(&memory.id).unwrap().unwrap();
        assert_eq!(loaded.vector, embedding.vector);
        assert_eq!(loaded.dimension, 3);
        assert_eq!(loaded.model, "nomic-embed-text");

        // Empty vectors are invalid input.
        assert!(store
            .store_embedding(&memory.id, &Embedding::new(vec![], "m"))
            .is_err());
    }

    #[test]
    fn fts_search_finds_and_ranks() {
        let (store, _dir) = test_store();
        let hit = store.store(&sample("Go programming language basics")).unwrap();
        store.store(&sample("Completely different topic")).unwrap();

        let hits = store.fts_search("\"programming\"", 10, 0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, hit.id);
        assert_eq!(store.fts_count("\"programming\"").unwrap(), 1);
    }

    #[test]
    fn fts_excludes_soft_deleted() {
        let (store, _dir) = test_store();
        let memory = store.store(&sample("searchable content here")).unwrap();
        assert_eq!(store.fts_search("\"searchable\"", 10, 0).unwrap().len(), 1);

        store.delete(&memory.id).unwrap();
        assert!(store.fts_search("\"searchable\"", 10, 0).unwrap().is_empty());
    }

    #[test]
    fn settings_roundtrip() {
        let (store, _dir) = test_store();
        assert_eq!(store.get_setting("decay.last_run").unwrap(), None);
        store.set_setting("decay.last_run", "2026-01-01T00:00:00Z").unwrap();
        store.set_setting("decay.last_run", "2026-02-01T00:00:00Z").unwrap();
        assert_eq!(
            store.get_setting("decay.last_run").unwrap().as_deref(),
            Some("2026-02-01T00:00:00Z")
        );
    }

    #[test]
    fn unknown_type_stats_accumulate() {
        let (store, _dir) = test_store();
        store.record_unknown_type("work", "spaceship").unwrap();
        store.record_unknown_type("work", "spaceship").unwrap();

        let reader = store.reader().unwrap();
        let count: i64 = reader
            .query_row(
                "SELECT count FROM unknown_type_stats WHERE domain = 'work' AND type_name = 'spaceship'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn decay_updates_are_monotonic() {
        let (store, _dir) = test_store();
        let memory = store.store(&sample("decaying")).unwrap();

        // Backdate creation so elapsed time is non-zero.
        {
            let writer = store.writer().unwrap();
            writer
                .execute(
                    "UPDATE memories SET created_at = ?1 WHERE id = ?2",
                    params![Utc::now() - chrono::Duration::days(30), memory.id],
                )
                .unwrap();
        }

        store.update_decay_scores(30.0).unwrap();
        let first = store.get(&memory.id).unwrap().decay_score;
        assert!(first < 1.0 && first > 0.0);

        store.update_decay_scores(30.0).unwrap();
        let second = store.get(&memory.id).unwrap().decay_score;
        assert!(second <= first);
    }

    #[test]
    fn backup_and_integrity() {
        let (store, dir) = test_store();
        store.store(&sample("backed up")).unwrap();
        store.integrity_check().unwrap();

        let dest = dir.path().join("snapshot.db");
        store.backup_to(&dest).unwrap();

        let copy = SqliteStore::open(Some(dest)).unwrap();
        assert_eq!(copy.stats().unwrap().total_memories, 1);
    }

    #[test]
    fn recovery_listing_finds_unfinished() {
        let (store, _dir) = test_store();
        store.store(&sample("pending a")).unwrap();
        let mut processing = sample("processing b");
        processing.status = EnrichmentStatus::Processing;
        store.store(&processing).unwrap();
        let mut done = sample("enriched c");
        done.status = EnrichmentStatus::Enriched;
        store.store(&done).unwrap();

        let unfinished = store.list_unfinished(10, 0).unwrap();
        assert_eq!(unfinished.len(), 2);
    }
}
