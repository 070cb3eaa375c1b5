//! Repository Module
//!
//! Data access layer for the server.
//! Each repository handles storage for a specific domain entity.

pub mod job;
pub mod log;
pub mod record;

// Re-export for convenience
pub use job::{JobStore, StoreError};
pub use log::{InMemoryLogRepository, LogRepository};
pub use record::{InMemoryRecordStore, RecordStore, StorageError};
