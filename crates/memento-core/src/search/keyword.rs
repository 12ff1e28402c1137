//! Keyword search over the FTS5 index.
//!
//! Queries are sanitized by double-quoting every term, which defuses FTS5
//! operators (`AND`, `NEAR`, `*`, column filters) in user input.

use serde::Deserialize;

/// Options shared by the text and hybrid search paths.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchOptions {
    pub page: u32,
    pub limit: u32,
    /// Re-run a zero-hit query with OR semantics
    pub fuzzy_fallback: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 10,
            fuzzy_fallback: false,
        }
    }
}

impl SearchOptions {
    pub fn normalized(mut self) -> Self {
        if self.page < 1 {
            self.page = 1;
        }
        self.limit = self.limit.clamp(1, 100);
        self
    }

    pub fn offset(&self) -> u32 {
        (self.page - 1) * self.limit
    }
}

/// Quote every whitespace-separated term; terms join with implicit AND.
pub fn sanitize_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(quote_term)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote every term and join with OR, the fuzzy-fallback expression.
pub fn fuzzy_or_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(quote_term)
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn quote_term(term: &str) -> String {
    // Embedded quotes escape by doubling, per FTS5 string syntax.
    format!("\"{}\"", term.replace('"', "\"\""))
}
