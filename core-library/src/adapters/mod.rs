//! Store Adapter implementations
//!
//! - [`MemoryLibraryStore`]: embedded, payload bytes held in process
//! - [`SqliteLibraryStore`]: SQLite database indexing payload files

pub mod memory;
pub mod sqlite;

pub use memory::MemoryLibraryStore;
pub use sqlite::SqliteLibraryStore;
