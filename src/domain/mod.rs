//! Domain layer for the Lodestar escalation pipeline.
//!
//! Models, port traits and the domain error type. Nothing in here performs I/O.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
