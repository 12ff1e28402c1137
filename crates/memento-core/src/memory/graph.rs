//! Graph-side records: entities, relationships and memory links.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// ENTITY TYPES
// ============================================================================

/// Closed set of entity types accepted from extraction.
///
/// Anything outside this set is dropped by the response parser and recorded
/// in `unknown_type_stats`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Organization,
    Project,
    Technology,
    Concept,
    Location,
    Event,
    Tool,
    File,
    Function,
    Error,
    Configuration,
}

impl EntityType {
    pub const ALL: &'static [EntityType] = &[
        EntityType::Person,
        EntityType::Organization,
        EntityType::Project,
        EntityType::Technology,
        EntityType::Concept,
        EntityType::Location,
        EntityType::Event,
        EntityType::Tool,
        EntityType::File,
        EntityType::Function,
        EntityType::Error,
        EntityType::Configuration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Organization => "organization",
            EntityType::Project => "project",
            EntityType::Technology => "technology",
            EntityType::Concept => "concept",
            EntityType::Location => "location",
            EntityType::Event => "event",
            EntityType::Tool => "tool",
            EntityType::File => "file",
            EntityType::Function => "function",
            EntityType::Error => "error",
            EntityType::Configuration => "configuration",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "person" => Some(EntityType::Person),
            "organization" => Some(EntityType::Organization),
            "project" => Some(EntityType::Project),
            "technology" => Some(EntityType::Technology),
            "concept" => Some(EntityType::Concept),
            "location" => Some(EntityType::Location),
            "event" => Some(EntityType::Event),
            "tool" => Some(EntityType::Tool),
            "file" => Some(EntityType::File),
            "function" => Some(EntityType::Function),
            "error" => Some(EntityType::Error),
            "configuration" => Some(EntityType::Configuration),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// RELATIONSHIP TYPES
// ============================================================================

/// Closed set of relationship types with declared traversal semantics.
///
/// Bidirectional types are their own inverse; directed types declare the
/// inverse used when traversing an edge backward.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    RelatedTo,
    SimilarTo,
    DependsOn,
    RequiredBy,
    Contains,
    PartOf,
    Uses,
    UsedBy,
    Causes,
    CausedBy,
    Fixes,
    FixedBy,
    Supersedes,
    SupersededBy,
}

impl RelationshipType {
    pub const ALL: &'static [RelationshipType] = &[
        RelationshipType::RelatedTo,
        RelationshipType::SimilarTo,
        RelationshipType::DependsOn,
        RelationshipType::RequiredBy,
        RelationshipType::Contains,
        RelationshipType::PartOf,
        RelationshipType::Uses,
        RelationshipType::UsedBy,
        RelationshipType::Causes,
        RelationshipType::CausedBy,
        RelationshipType::Fixes,
        RelationshipType::FixedBy,
        RelationshipType::Supersedes,
        RelationshipType::SupersededBy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::RelatedTo => "related_to",
            RelationshipType::SimilarTo => "similar_to",
            RelationshipType::DependsOn => "depends_on",
            RelationshipType::RequiredBy => "required_by",
            RelationshipType::Contains => "contains",
            RelationshipType::PartOf => "part_of",
            RelationshipType::Uses => "uses",
            RelationshipType::UsedBy => "used_by",
            RelationshipType::Causes => "causes",
            RelationshipType::CausedBy => "caused_by",
            RelationshipType::Fixes => "fixes",
            RelationshipType::FixedBy => "fixed_by",
            RelationshipType::Supersedes => "supersedes",
            RelationshipType::SupersededBy => "superseded_by",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "related_to" => Some(RelationshipType::RelatedTo),
            "similar_to" => Some(RelationshipType::SimilarTo),
            "depends_on" => Some(RelationshipType::DependsOn),
            "required_by" => Some(RelationshipType::RequiredBy),
            "contains" => Some(RelationshipType::Contains),
            "part_of" => Some(RelationshipType::PartOf),
            "uses" => Some(RelationshipType::Uses),
            "used_by" => Some(RelationshipType::UsedBy),
            "causes" => Some(RelationshipType::Causes),
            "caused_by" => Some(RelationshipType::CausedBy),
            "fixes" => Some(RelationshipType::Fixes),
            "fixed_by" => Some(RelationshipType::FixedBy),
            "supersedes" => Some(RelationshipType::Supersedes),
            "superseded_by" => Some(RelationshipType::SupersededBy),
            _ => None,
        }
    }

    /// The inverse of a bidirectional type is the type itself.
    pub fn is_bidirectional(&self) -> bool {
        matches!(self, RelationshipType::RelatedTo | RelationshipType::SimilarTo)
    }

    /// Type used when traversing an edge from target to source.
    pub fn inverse(&self) -> RelationshipType {
        match self {
            RelationshipType::RelatedTo => RelationshipType::RelatedTo,
            RelationshipType::SimilarTo => RelationshipType::SimilarTo,
            RelationshipType::DependsOn => RelationshipType::RequiredBy,
            RelationshipType::RequiredBy => RelationshipType::DependsOn,
            RelationshipType::Contains => RelationshipType::PartOf,
            RelationshipType::PartOf => RelationshipType::Contains,
            RelationshipType::Uses => RelationshipType::UsedBy,
            RelationshipType::UsedBy => RelationshipType::Uses,
            RelationshipType::Causes => RelationshipType::CausedBy,
            RelationshipType::CausedBy => RelationshipType::Causes,
            RelationshipType::Fixes => RelationshipType::FixedBy,
            RelationshipType::FixedBy => RelationshipType::Fixes,
            RelationshipType::Supersedes => RelationshipType::SupersededBy,
            RelationshipType::SupersededBy => RelationshipType::Supersedes,
        }
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// An extracted concept.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub entity_type: EntityType,
    pub description: String,
    pub attributes: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A directed typed edge between two entities.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub relationship_type: RelationshipType,
    pub weight: f64,
    pub context: String,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// M:N association between a memory and an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntity {
    pub memory_id: String,
    pub entity_id: String,
    /// Co-occurrence count across enrichment runs
    pub frequency: i64,
    pub confidence: f64,
}

/// Typed directed edge between two memories (`contains` for hierarchies).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryLink {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub link_type: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_roundtrip() {
        for ty in EntityType::ALL {
            assert_eq!(EntityType::parse_name(ty.as_str()), Some(*ty));
        }
        assert_eq!(EntityType::parse_name("spaceship"), None);
    }

    #[test]
    fn entity_type_parse_is_case_insensitive() {
        assert_eq!(EntityType::parse_name("Person"), Some(EntityType::Person));
        assert_eq!(
            EntityType::parse_name("TECHNOLOGY"),
            Some(EntityType::Technology)
        );
    }

    #[test]
    fn relationship_type_roundtrip() {
        for ty in RelationshipType::ALL {
            assert_eq!(RelationshipType::parse_name(ty.as_str()), Some(*ty));
        }
    }

    #[test]
    fn inverse_is_involutive() {
        for ty in RelationshipType::ALL {
            assert_eq!(ty.inverse().inverse(), *ty);
        }
    }

    #[test]
    fn bidirectional_types_are_self_inverse() {
        for ty in RelationshipType::ALL {
            if ty.is_bidirectional() {
                assert_eq!(ty.inverse(), *ty);
            } else {
                assert_ne!(ty.inverse(), *ty);
            }
        }
    }
}
