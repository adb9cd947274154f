//! Long-term memory for conversational agents
//!
//! Learns memories from conversation turns, keeps them tidy with batch
//! consolidation and lifecycle passes, and retrieves the most relevant ones
//! as a bounded context block for the next prompt.

pub mod config;
pub mod engine;
pub mod error;
pub mod intelligence;
pub mod search;
pub mod storage;
pub mod types;
pub mod vocabulary;

pub use config::LtmConfig;
pub use engine::{MaintenanceReport, MemoryEngine};
pub use error::{LtmError, Result};
pub use intelligence::Interaction;
pub use storage::{MemoryStore, Storage};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
