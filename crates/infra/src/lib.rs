//! Storage, caches and the job scheduler.

pub mod cache;
pub mod config;
pub mod jobs;
pub mod schema;
pub mod store;

/// Notification topic announcing that a job has new scan tasks.
pub const SCAN_TASK_TOPIC: &str = "scan";

pub use cache::{InfoSchemaCache, TableStatusCache};
pub use config::{TtlConfig, TtlSettings};
pub use schema::{PhysicalTable, ScanRange, SchemaCatalog, SchemaSnapshot, SchemaSource};
pub use store::{InMemoryTtlStore, PostgresTtlStore, StoreError, TtlStore};
