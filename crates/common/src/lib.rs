//! PreprintBot Common Library
//!
//! Shared code for the recommendation engine including:
//! - Database models and repository patterns
//! - Embedding store and recommendation sink contracts
//! - In-memory store for tests and local runs
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod memory;
pub mod metrics;
pub mod recommendations;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use embeddings::{Embedding, EmbeddingFilter, EmbeddingKind, EmbeddingStore};
pub use errors::{AppError, ErrorCode, Result};
pub use memory::MemoryStore;
pub use recommendations::{MatchMethod, RecommendationSink, RunReader, RunStatus, ThresholdLevel};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
