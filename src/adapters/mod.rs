//! Infrastructure adapters for external systems.

pub mod embeddings;
pub mod generative;
pub mod snapshot;
pub mod sqlite;
