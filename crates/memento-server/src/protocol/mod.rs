//! JSON-RPC 2.0 protocol over stdio.

pub mod stdio;
pub mod types;
