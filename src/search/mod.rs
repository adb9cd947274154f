//! Retrieval and context formatting
//!
//! - `scoring`: the weighted relevance formula shared by both stages
//! - `retriever`: picks the top memories for a query and logs the access
//! - `context`: turns ranked memories into a bounded prompt block

pub mod context;
pub mod retriever;
pub mod scoring;

pub use context::ContextOptimizer;
pub use retriever::SmartRetriever;
pub use scoring::{jaccard, token_set, tokenize, RelevanceScore, RelevanceScorer};
