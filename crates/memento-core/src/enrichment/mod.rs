//! Enrichment pipeline
//!
//! A bounded FIFO job queue drained by a pool of workers. Each job lifts one
//! memory through entity extraction, relationship extraction and embedding
//! generation, updating per-stage statuses as it goes.
//!
//! Ingestion is non-blocking: the caller gets the persisted `pending` memory
//! back immediately and never waits on the LLM. A full queue marks the
//! memory failed and surfaces a queue-full error instead of blocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::embeddings::Embedding;
use crate::llm::{prompts, Chunker, LlmClient};
use crate::memory::{
    EnrichmentStatus, EnrichmentUpdate, Memory, NewMemory, StageStatus,
};
use crate::storage::SqliteStore;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Worker pool size
    pub num_workers: usize,
    /// Bounded queue capacity
    pub queue_size: usize,
    /// Attempts before a memory is marked permanently failed
    pub max_retries: i64,
    /// Batch size for the startup recovery scan
    pub recovery_batch_size: u32,
    /// How long `shutdown` waits for workers before abandoning jobs
    pub shutdown_timeout: Duration,
    /// Per-LLM-call deadline
    pub llm_deadline: Duration,
    /// Chunker budget for entity extraction
    pub max_chunk_tokens: usize,
    /// Chunker overlap
    pub overlap_tokens: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_workers: 2,
            queue_size: 100,
            max_retries: 3,
            recovery_batch_size: 100,
            shutdown_timeout: Duration::from_secs(30),
            llm_deadline: Duration::from_secs(60),
            max_chunk_tokens: 512,
            overlap_tokens: 50,
        }
    }
}

/// Shared counters, mutated from every worker.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub jobs_enqueued: AtomicU64,
    pub jobs_completed: AtomicU64,
    pub jobs_retried: AtomicU64,
    pub jobs_failed: AtomicU64,
}

#[derive(Debug, Clone)]
struct Job {
    memory_id: String,
}

/// Which stage a failure occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Entities,
    Relationships,
    Embedding,
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Entities => "entity extraction",
            Stage::Relationships => "relationship extraction",
            Stage::Embedding => "embedding generation",
        }
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// The enrichment worker pool.
pub struct Pipeline {
    store: Arc<SqliteStore>,
    llm: Arc<dyn LlmClient>,
    config: PipelineConfig,
    metrics: Arc<PipelineMetrics>,
    /// `None` once shutdown has closed the queue
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    rx: Mutex<Option<mpsc::Receiver<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    pub fn new(store: Arc<SqliteStore>, llm: Arc<dyn LlmClient>, config: PipelineConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        Self {
            store,
            llm,
            config,
            metrics: Arc::new(PipelineMetrics::default()),
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Persist a new memory as `pending` and enqueue its enrichment job.
    ///
    /// Returns immediately; a full queue marks the memory failed and
    /// surfaces a queue-full error instead of waiting.
    pub fn ingest(&self, input: NewMemory) -> Result<Memory> {
        let memory = Memory::build(input);
        let stored = self.store.store(&memory)?;
        self.enqueue(&stored.id)?;
        Ok(stored)
    }

    /// Reset all enrichment statuses and re-enqueue. Idempotent.
    pub fn retry_enrichment(&self, id: &str) -> Result<()> {
        // Existence check first so the caller gets not-found over queue
        // errors.
        self.store.get(id)?;
        self.store.update_enrichment(
            id,
            &EnrichmentUpdate {
                status: Some(EnrichmentStatus::Pending),
                entity_status: Some(StageStatus::Pending),
                relationship_status: Some(StageStatus::Pending),
                embedding_status: Some(StageStatus::Pending),
                clear_error: true,
                ..Default::default()
            },
        )?;
        self.enqueue(id)
    }

    fn enqueue(&self, id: &str) -> Result<()> {
        let guard = self
            .tx
            .lock()
            .map_err(|_| Error::Transient("queue lock poisoned".to_string()))?;
        let Some(tx) = guard.as_ref() else {
            return Err(Error::Transient("pipeline is shut down".to_string()));
        };
        match tx.try_send(Job {
            memory_id: id.to_string(),
        }) {
            Ok(()) => {
                self.metrics.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                drop(guard);
                let _ = self.store.update_enrichment(
                    id,
                    &EnrichmentUpdate {
                        status: Some(EnrichmentStatus::Failed),
                        error: Some("enrichment queue full".to_string()),
                        ..Default::default()
                    },
                );
                Err(Error::Transient("enrichment queue full".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(Error::Transient("pipeline is shut down".to_string()))
            }
        }
    }

    /// Spawn the worker pool and run the crash-recovery scan.
    ///
    /// Memories left `pending` or `processing` by a previous run are reset
    /// to `pending` and re-enqueued in batches.
    pub async fn start(&self) -> Result<()> {
        let rx = self
            .rx
            .lock()
            .map_err(|_| Error::Transient("receiver lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| Error::Transient("pipeline already started".to_string()))?;
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        {
            let mut workers = self
                .workers
                .lock()
                .map_err(|_| Error::Transient("worker lock poisoned".to_string()))?;
            for worker_id in 0..self.config.num_workers.max(1) {
                let ctx = WorkerCtx {
                    store: Arc::clone(&self.store),
                    llm: Arc::clone(&self.llm),
                    chunker: Chunker::new(self.config.max_chunk_tokens, self.config.overlap_tokens),
                    config: self.config.clone(),
                    metrics: Arc::clone(&self.metrics),
                    tx: self.sender()?,
                };
                let rx = Arc::clone(&rx);
                workers.push(tokio::spawn(async move {
                    worker_loop(worker_id, ctx, rx).await;
                }));
            }
        }

        self.recover().await
    }

    fn sender(&self) -> Result<mpsc::Sender<Job>> {
        self.tx
            .lock()
            .map_err(|_| Error::Transient("queue lock poisoned".to_string()))?
            .as_ref()
            .cloned()
            .ok_or_else(|| Error::Transient("pipeline is shut down".to_string()))
    }

    async fn recover(&self) -> Result<()> {
        let mut ids: Vec<String> = Vec::new();
        let mut offset = 0;
        loop {
            let batch = self
                .store
                .list_unfinished(self.config.recovery_batch_size, offset)?;
            if batch.is_empty() {
                break;
            }
            offset += batch.len() as u32;
            for (id, status) in batch {
                if status == EnrichmentStatus::Processing {
                    // A worker died holding this job; it is pending again.
                    self.store.update_enrichment(
                        &id,
                        &EnrichmentUpdate {
                            status: Some(EnrichmentStatus::Pending),
                            ..Default::default()
                        },
                    )?;
                }
                ids.push(id);
            }
        }

        if ids.is_empty() {
            return Ok(());
        }
        tracing::info!(count = ids.len(), "re-enqueueing unfinished enrichment jobs");

        let tx = self.sender()?;
        for id in ids {
            // Recovery may exceed the queue bound; waiting here is fine, the
            // workers are already draining.
            if tx.send(Job { memory_id: id }).await.is_err() {
                break;
            }
            self.metrics.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Two-phase shutdown: close the queue, then wait for the workers up to
    /// the configured timeout. Jobs still outstanding after the timeout are
    /// abandoned; the next start recovers them.
    pub async fn shutdown(&self) {
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }

        let handles: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(_) => return,
        };

        let drain = async {
            for handle in &handles {
                // JoinHandle is not cancel-safe to poll twice; wait via
                // abort-less join below instead.
                while !handle.is_finished() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        };

        if tokio::time::timeout(self.config.shutdown_timeout, drain)
            .await
            .is_err()
        {
            tracing::warn!("shutdown timeout, abandoning outstanding enrichment jobs");
            for handle in &handles {
                handle.abort();
            }
        }
    }
}

// ============================================================================
// WORKER
// ============================================================================

struct WorkerCtx {
    store: Arc<SqliteStore>,
    llm: Arc<dyn LlmClient>,
    chunker: Chunker,
    config: PipelineConfig,
    metrics: Arc<PipelineMetrics>,
    tx: mpsc::Sender<Job>,
}

async fn worker_loop(worker_id: usize, ctx: WorkerCtx, rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>) {
    tracing::debug!(worker_id, "enrichment worker started");
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            tracing::debug!(worker_id, "queue closed, worker exiting");
            break;
        };
        if let Err(err) = process_job(&ctx, &job).await {
            tracing::warn!(
                worker_id,
                memory_id = %job.memory_id,
                error = %err,
                "enrichment job errored"
            );
        }
    }
}

async fn process_job(ctx: &WorkerCtx, job: &Job) -> Result<()> {
    let memory = match ctx.store.get_any(&job.memory_id)? {
        Some(memory) => memory,
        None => {
            // Purged while queued.
            tracing::info!(memory_id = %job.memory_id, "memory gone, dropping job");
            return Ok(());
        }
    };
    if memory.deleted_at.is_some() {
        tracing::info!(memory_id = %memory.id, "memory soft-deleted, dropping job");
        return Ok(());
    }

    // Claim the job; the atomic pending -> processing transition keeps two
    // workers off the same memory.
    if !ctx.store.try_claim_for_enrichment(&memory.id)? {
        tracing::debug!(memory_id = %memory.id, "memory already claimed, dropping job");
        return Ok(());
    }

    let chunks = ctx.chunker.chunk(&memory.content);

    let entities = match extract_entities(ctx, &memory, &chunks).await {
        Ok(entities) => entities,
        Err(err) => return fail_stage(ctx, &memory.id, Stage::Entities, err).await,
    };

    ctx.store.update_enrichment(
        &memory.id,
        &EnrichmentUpdate {
            entity_status: Some(StageStatus::Completed),
            relationship_status: Some(StageStatus::Processing),
            ..Default::default()
        },
    )?;

    if let Err(err) = extract_relationships(ctx, &memory, &entities).await {
        return fail_stage(ctx, &memory.id, Stage::Relationships, err).await;
    }

    ctx.store.update_enrichment(
        &memory.id,
        &EnrichmentUpdate {
            relationship_status: Some(StageStatus::Completed),
            embedding_status: Some(StageStatus::Processing),
            ..Default::default()
        },
    )?;

    if let Err(err) = generate_embedding(ctx, &memory, &chunks).await {
        return fail_stage(ctx, &memory.id, Stage::Embedding, err).await;
    }

    ctx.store.update_enrichment(
        &memory.id,
        &EnrichmentUpdate {
            status: Some(EnrichmentStatus::Enriched),
            embedding_status: Some(StageStatus::Completed),
            enriched_at: Some(Utc::now()),
            clear_error: true,
            ..Default::default()
        },
    )?;

    // Confidence lives in metadata so callers see it without a second
    // lookup.
    if let Some(after) = ctx.store.get_any(&memory.id)? {
        let score =
            crate::decay::ConfidenceScorer::default().score(&after, entities.len(), Utc::now());
        ctx.store
            .merge_metadata(&memory.id, "confidence", serde_json::json!(score.overall))?;
    }

    ctx.metrics.jobs_completed.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(memory_id = %memory.id, "memory enriched");
    Ok(())
}

/// Extraction stage 1: entities, unioned across chunks.
async fn extract_entities(
    ctx: &WorkerCtx,
    memory: &Memory,
    chunks: &[String],
) -> Result<Vec<prompts::ExtractedEntity>> {
    let mut by_key: std::collections::HashMap<(String, &'static str), prompts::ExtractedEntity> =
        std::collections::HashMap::new();

    for chunk in chunks {
        let raw = ctx
            .llm
            .complete(&prompts::entity_extraction_prompt(chunk), ctx.config.llm_deadline)
            .await?;
        let parsed = prompts::parse_entity_response(&raw)?;
        for type_name in &parsed.unknown_types {
            let _ = ctx.store.record_unknown_type(&memory.domain, type_name);
        }
        for entity in parsed.items {
            let key = (entity.name.to_lowercase(), entity.entity_type.as_str());
            by_key
                .entry(key)
                .and_modify(|existing| {
                    if entity.confidence > existing.confidence {
                        existing.confidence = entity.confidence;
                    }
                })
                .or_insert(entity);
        }
    }

    let entities: Vec<prompts::ExtractedEntity> = by_key.into_values().collect();
    for extracted in &entities {
        let entity = ctx.store.upsert_entity(
            &extracted.name,
            extracted.entity_type,
            &extracted.description,
            &serde_json::Map::new(),
        )?;
        ctx.store
            .link_memory_entity(&memory.id, &entity.id, extracted.confidence)?;
    }
    Ok(entities)
}

/// Extraction stage 2: relationships among the known entities.
async fn extract_relationships(
    ctx: &WorkerCtx,
    memory: &Memory,
    entities: &[prompts::ExtractedEntity],
) -> Result<()> {
    if entities.len() < 2 {
        // Nothing to relate.
        return Ok(());
    }

    let raw = ctx
        .llm
        .complete(
            &prompts::relationship_extraction_prompt(&memory.content, entities),
            ctx.config.llm_deadline,
        )
        .await?;
    let parsed = prompts::parse_relationship_response(&raw)?;
    for type_name in &parsed.unknown_types {
        let _ = ctx.store.record_unknown_type(&memory.domain, type_name);
    }

    // Endpoints resolve by case-insensitive name against this run's
    // entities.
    let mut by_name: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    for extracted in entities {
        let entity = ctx.store.upsert_entity(
            &extracted.name,
            extracted.entity_type,
            "",
            &serde_json::Map::new(),
        )?;
        by_name.insert(extracted.name.to_lowercase(), entity.id);
    }

    for rel in parsed.items {
        let (Some(source_id), Some(target_id)) = (
            by_name.get(&rel.source.to_lowercase()),
            by_name.get(&rel.target.to_lowercase()),
        ) else {
            continue;
        };
        if source_id == target_id {
            continue;
        }
        ctx.store.upsert_relationship(
            source_id,
            target_id,
            rel.relationship_type,
            rel.confidence,
            &rel.context,
        )?;
    }
    Ok(())
}

/// Extraction stage 3: one embedding per memory, from the representative
/// first chunk.
async fn generate_embedding(ctx: &WorkerCtx, memory: &Memory, chunks: &[String]) -> Result<()> {
    let text = chunks.first().map(String::as_str).unwrap_or(&memory.content);
    let vector = ctx.llm.embed(text, ctx.config.llm_deadline).await?;
    let embedding = Embedding::from_f32(&vector, ctx.llm.embedding_model());
    ctx.store.store_embedding(&memory.id, &embedding)
}

/// Record a stage failure; retryable errors requeue until max attempts.
async fn fail_stage(ctx: &WorkerCtx, memory_id: &str, stage: Stage, err: Error) -> Result<()> {
    // invalid-input (and every other non-retryable kind) is a permanent
    // failure regardless of remaining attempts.
    let permanent = !err.is_retryable();

    let mut update = EnrichmentUpdate {
        increment_attempts: true,
        error: Some(format!("{}: {}", stage.name(), err)),
        ..Default::default()
    };
    match stage {
        Stage::Entities => update.entity_status = Some(StageStatus::Failed),
        Stage::Relationships => update.relationship_status = Some(StageStatus::Failed),
        Stage::Embedding => update.embedding_status = Some(StageStatus::Failed),
    }
    ctx.store.update_enrichment(memory_id, &update)?;

    let attempts = ctx
        .store
        .get_any(memory_id)?
        .map(|m| m.enrichment_attempts)
        .unwrap_or(i64::MAX);

    if !permanent && attempts < ctx.config.max_retries {
        ctx.store.update_enrichment(
            memory_id,
            &EnrichmentUpdate {
                status: Some(EnrichmentStatus::Pending),
                ..Default::default()
            },
        )?;
        ctx.metrics.jobs_retried.fetch_add(1, Ordering::Relaxed);
        // Re-enqueue; a full queue leaves the memory pending for the next
        // recovery pass.
        let _ = ctx.tx.try_send(Job {
            memory_id: memory_id.to_string(),
        });
    } else {
        ctx.store.update_enrichment(
            memory_id,
            &EnrichmentUpdate {
                status: Some(EnrichmentStatus::Failed),
                ..Default::default()
            },
        )?;
        ctx.metrics.jobs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(memory_id, attempts, "memory permanently failed enrichment");
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
