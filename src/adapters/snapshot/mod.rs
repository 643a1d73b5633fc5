//! Snapshot provider adapters.

pub mod json_dir;

pub use json_dir::JsonDirSnapshotProvider;
