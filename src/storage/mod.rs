//! Storage engine for the memory store
//!
//! Handles SQLite database operations, WAL mode, and schema management.

mod connection;
mod locks;
pub mod migrations;
pub mod queries;
mod store;
pub mod validation;

pub use connection::Storage;
pub use locks::OwnerLocks;
pub use store::MemoryStore;
