//! Decay and confidence scoring.
//!
//! Decay follows an exponential half-life curve: a memory untouched for one
//! half-life keeps half its score. Access events add a fixed +0.1 bonus
//! (capped at 1.0) at the storage layer.

use chrono::{DateTime, Utc};

use crate::memory::{Memory, StageStatus};

/// Default decay half-life in days.
pub const DEFAULT_HALF_LIFE_DAYS: f64 = 30.0;

/// Multiplicative decay factor for `elapsed_days` at the given half-life.
///
/// `exp(-ln2 * elapsed / half_life)`, clamped into [0, 1]. Non-positive
/// elapsed time decays nothing.
pub fn decay_factor(elapsed_days: f64, half_life_days: f64) -> f64 {
    if elapsed_days <= 0.0 || half_life_days <= 0.0 {
        return 1.0;
    }
    (-(std::f64::consts::LN_2) * elapsed_days / half_life_days)
        .exp()
        .clamp(0.0, 1.0)
}

// ============================================================================
// CONFIDENCE
// ============================================================================

/// Weights for the confidence aggregate.
#[derive(Debug, Clone)]
pub struct ConfidenceWeights {
    pub entity: f64,
    pub relationship: f64,
    pub source: f64,
    pub age: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            entity: 0.35,
            relationship: 0.25,
            source: 0.2,
            age: 0.2,
        }
    }
}

/// Per-signal breakdown of a confidence score.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceScore {
    pub entity_score: f64,
    pub rel_score: f64,
    pub source_score: f64,
    pub age_score: f64,
    /// Weighted aggregate in (0, 1]
    pub overall: f64,
}

/// Aggregates per-memory signals into an overall confidence.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceScorer {
    weights: ConfidenceWeights,
}

impl ConfidenceScorer {
    pub fn new(weights: ConfidenceWeights) -> Self {
        Self { weights }
    }

    /// Score a memory given how many entities its enrichment produced.
    pub fn score(&self, memory: &Memory, entity_count: usize, now: DateTime<Utc>) -> ConfidenceScore {
        let entity_score = match memory.entity_status {
            StageStatus::Completed if entity_count > 0 => 1.0,
            StageStatus::Completed => 0.6,
            StageStatus::Processing | StageStatus::Pending => 0.3,
            StageStatus::Failed => 0.1,
        };

        let rel_score = match memory.relationship_status {
            StageStatus::Completed => 1.0,
            StageStatus::Processing | StageStatus::Pending => 0.3,
            StageStatus::Failed => 0.1,
        };

        let source_score = match memory.source.as_str() {
            "manual" => 1.0,
            "auto" => 0.6,
            _ => 0.8,
        };

        // Same half-life curve as decay, over the caller-asserted event time.
        let age_days = (now - memory.timestamp).num_seconds() as f64 / 86_400.0;
        let age_score = decay_factor(age_days, DEFAULT_HALF_LIFE_DAYS).max(0.05);

        let w = &self.weights;
        let total = w.entity + w.relationship + w.source + w.age;
        let overall = ((entity_score * w.entity
            + rel_score * w.relationship
            + source_score * w.source
            + age_score * w.age)
            / total)
            .clamp(f64::MIN_POSITIVE, 1.0);

        ConfidenceScore {
            entity_score,
            rel_score,
            source_score,
            age_score,
            overall,
        }
    }
}
