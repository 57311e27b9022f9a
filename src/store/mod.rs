//! Persistence layer: libSQL-backed configuration and dedup markers.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Channel, ConfigStore, DedupStore, Keyword, StopWord};
