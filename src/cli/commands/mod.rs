//! CLI command implementations.

pub mod assess;
pub mod enqueue;
pub mod health;
pub mod init;
pub mod outbox;
pub mod sweep;
pub mod worker;
