//! Identifier construction.
//!
//! All IDs are opaque strings of the form `kind:domain:hash`. Memory IDs
//! are content-addressed so repeated ingestion of identical content in the
//! same domain re-hits the same row.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Hex chars of sha-256 kept in the ID (full hash lives in `content_hash`).
const ID_HASH_LEN: usize = 16;

/// Full sha-256 hex digest of the content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex_encode(&hasher.finalize())
}

/// Deterministic memory ID: `mem:<domain>:<hash16>`.
pub fn memory_id(domain: &str, content: &str) -> String {
    let hash = content_hash(content);
    format!("mem:{}:{}", domain, &hash[..ID_HASH_LEN])
}

/// Deterministic entity ID keyed by the `(name, type)` uniqueness pair.
pub fn entity_id(name: &str, entity_type: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.to_lowercase().as_bytes());
    hasher.update([0x1f]);
    hasher.update(entity_type.as_bytes());
    let hash = hex_encode(&hasher.finalize());
    format!("ent::{}", &hash[..ID_HASH_LEN])
}

/// Random relationship row ID.
pub fn relationship_id() -> String {
    format!("rel::{}", Uuid::new_v4())
}

/// Random memory-link row ID.
pub fn link_id() -> String {
    format!("lnk::{}", Uuid::new_v4())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}
