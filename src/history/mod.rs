//! Durable transcription history: SQLite store, FTS search and the
//! content-addressed audio archive.

pub mod archive;
pub mod models;
pub mod store;

pub use archive::{AudioArchive, hash_audio};
pub use models::{ExportFormat, HistoryEntry, SearchFilters};
pub use store::HistoryStore;
