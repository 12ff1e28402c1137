//! Graph traversal
//!
//! Bounded breadth-first traversal of the entity-relationship graph:
//! memories connect through shared entities, entities connect through typed
//! relationships walked in both declared directions. Every traversal
//! carries node/edge/depth/time budgets; hitting a budget surfaces a
//! partial result with a `bounds_reached` marker instead of discarding the
//! work done.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::SqliteStore;

// ============================================================================
// BOUNDS
// ============================================================================

/// Traversal budgets, normalized with defaults and hard caps.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GraphBounds {
    pub max_hops: u32,
    pub max_nodes: u32,
    pub max_edges: u32,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Default for GraphBounds {
    fn default() -> Self {
        Self {
            max_hops: 3,
            max_nodes: 100,
            max_edges: 500,
            timeout: Duration::from_secs(30),
            created_after: None,
            created_before: None,
        }
    }
}

impl GraphBounds {
    /// Replace zeroes with defaults and clamp to the hard caps.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.max_hops == 0 {
            self.max_hops = defaults.max_hops;
        }
        if self.max_nodes == 0 {
            self.max_nodes = defaults.max_nodes;
        }
        if self.max_edges == 0 {
            self.max_edges = defaults.max_edges;
        }
        if self.timeout.is_zero() {
            self.timeout = defaults.timeout;
        }
        self.max_hops = self.max_hops.min(10);
        self.max_nodes = self.max_nodes.min(1000);
        self.max_edges = self.max_edges.min(5000);
        self.timeout = self.timeout.min(Duration::from_secs(300));
        self
    }

    /// Strict temporal window on both ends.
    pub fn matches_temporal(&self, t: DateTime<Utc>) -> bool {
        let after_ok = self.created_after.map(|a| t > a).unwrap_or(true);
        let before_ok = self.created_before.map(|b| t < b).unwrap_or(true);
        after_ok && before_ok
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// A memory discovered during traversal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraversedMemory {
    pub memory_id: String,
    pub hop_distance: u32,
    /// Names of the entities this memory was reached through
    pub shared_entities: Vec<String>,
    pub decay_score: f64,
}

/// Traversal outcome, possibly partial.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraversalResult {
    pub memories: Vec<TraversedMemory>,
    pub nodes_visited: u64,
    pub edges_traversed: u64,
    pub elapsed_ms: u64,
    /// Which budget stopped the walk, if any ("max nodes", "max edges",
    /// "timeout")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds_reached: Option<&'static str>,
}

// ============================================================================
// TRAVERSAL
// ============================================================================

/// BFS from a memory across the entity graph.
///
/// Hop 0 is the start memory's entity set; each hop collects the memories
/// of the frontier entities and then expands the frontier through
/// relationships in both directions. Results rank by `(hop asc,
/// decay_score desc)` and trim to `limit`.
pub fn traverse(
    store: &SqliteStore,
    start_id: &str,
    bounds: GraphBounds,
    limit: usize,
) -> Result<TraversalResult> {
    let bounds = bounds.normalized();
    let started = Instant::now();

    // Start memory must exist (and be visible).
    store.get(start_id)?;

    let start_entities = store.get_memory_entities(start_id)?;
    let mut entity_names: HashMap<String, String> = start_entities
        .iter()
        .map(|e| (e.id.clone(), e.name.clone()))
        .collect();

    let mut result = TraversalResult {
        memories: vec![],
        nodes_visited: 0,
        edges_traversed: 0,
        elapsed_ms: 0,
        bounds_reached: None,
    };

    if start_entities.is_empty() {
        result.elapsed_ms = started.elapsed().as_millis() as u64;
        return Ok(result);
    }

    let mut frontier: Vec<String> = start_entities.into_iter().map(|e| e.id).collect();
    let mut visited_entities: HashSet<String> = frontier.iter().cloned().collect();
    let mut seen_memories: HashSet<String> = HashSet::new();
    seen_memories.insert(start_id.to_string());
    let mut found: HashMap<String, TraversedMemory> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    'walk: for hop in 1..=bounds.max_hops {
        // Collect the memories of the current frontier.
        for entity_id in &frontier {
            if started.elapsed() > bounds.timeout {
                result.bounds_reached = Some("timeout");
                break 'walk;
            }
            let entity_name = entity_names.get(entity_id).cloned().unwrap_or_default();
            for memory_ref in store.memories_for_entity(entity_id)? {
                result.edges_traversed += 1;
                if result.edges_traversed > bounds.max_edges as u64 {
                    result.bounds_reached = Some("max edges");
                    break 'walk;
                }
                if !bounds.matches_temporal(memory_ref.created_at) {
                    continue;
                }
                if memory_ref.id == start_id {
                    continue;
                }
                match found.get_mut(&memory_ref.id) {
                    Some(existing) => {
                        if !existing.shared_entities.contains(&entity_name) {
                            existing.shared_entities.push(entity_name.clone());
                        }
                    }
                    None => {
                        if !seen_memories.insert(memory_ref.id.clone()) {
                            continue;
                        }
                        result.nodes_visited += 1;
                        order.push(memory_ref.id.clone());
                        found.insert(
                            memory_ref.id.clone(),
                            TraversedMemory {
                                memory_id: memory_ref.id,
                                hop_distance: hop,
                                shared_entities: vec![entity_name.clone()],
                                decay_score: memory_ref.decay_score,
                            },
                        );
                        if result.nodes_visited >= bounds.max_nodes as u64 {
                            result.bounds_reached = Some("max nodes");
                            break 'walk;
                        }
                    }
                }
            }
        }

        // Expand the frontier through relationships, both directions.
        let mut next: Vec<String> = Vec::new();
        for entity_id in &frontier {
            if started.elapsed() > bounds.timeout {
                result.bounds_reached = Some("timeout");
                break 'walk;
            }
            for neighbor_id in store.neighbor_entities(entity_id)? {
                result.edges_traversed += 1;
                if result.edges_traversed > bounds.max_edges as u64 {
                    result.bounds_reached = Some("max edges");
                    break 'walk;
                }
                if visited_entities.insert(neighbor_id.clone()) {
                    if let Some(entity) = store.get_entity(&neighbor_id)? {
                        entity_names.insert(entity.id.clone(), entity.name);
                    }
                    next.push(neighbor_id);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    // Rank: hop ascending, then decay descending.
    let mut memories: Vec<TraversedMemory> =
        order.into_iter().filter_map(|id| found.remove(&id)).collect();
    memories.sort_by(|a, b| {
        a.hop_distance.cmp(&b.hop_distance).then_with(|| {
            b.decay_score
                .partial_cmp(&a.decay_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });
    memories.truncate(limit);

    result.memories = memories;
    result.elapsed_ms = started.elapsed().as_millis() as u64;
    Ok(result)
}

/// Shortest path between two memories over the shared-entity adjacency.
///
/// Returns `[start, ..., target]`, `[start]` for the self path, or empty
/// when no path exists within bounds.
pub fn shortest_path(
    store: &SqliteStore,
    start_id: &str,
    target_id: &str,
    bounds: GraphBounds,
) -> Result<Vec<String>> {
    let bounds = bounds.normalized();
    let started = Instant::now();

    store.get(start_id)?;
    if start_id == target_id {
        return Ok(vec![start_id.to_string()]);
    }

    let mut parents: HashMap<String, String> = HashMap::new();
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(start_id.to_string());
    let mut queue: VecDeque<(String, u32)> = VecDeque::new();
    queue.push_back((start_id.to_string(), 0));

    let mut edges: u64 = 0;
    while let Some((current, depth)) = queue.pop_front() {
        if depth >= bounds.max_hops
            || visited.len() as u64 > bounds.max_nodes as u64
            || started.elapsed() > bounds.timeout
        {
            break;
        }
        for neighbor in store.get_related_memories(&current)? {
            edges += 1;
            if edges > bounds.max_edges as u64 {
                return Ok(vec![]);
            }
            if !visited.insert(neighbor.clone()) {
                continue;
            }
            parents.insert(neighbor.clone(), current.clone());
            if neighbor == target_id {
                // Reconstruct.
                let mut path = vec![neighbor];
                while let Some(parent) = parents.get(path.last().expect("non-empty")) {
                    path.push(parent.clone());
                }
                path.reverse();
                return Ok(path);
            }
            queue.push_back((neighbor, depth + 1));
        }
    }

    Ok(vec![])
}

// ============================================================================
// TESTS
// ============================================================================
