//! PreprintBot Matcher
//!
//! Matching and recommendation engine:
//! - Cosine similarity primitives
//! - Per-paper grouping of abstract and section embeddings
//! - Exact and HNSW-backed similarity strategies
//! - Max-pooled aggregation, threshold filtering, deterministic ranking
//! - Run orchestration with atomic persistence

pub mod aggregation;
pub mod grouping;
pub mod orchestrator;
pub mod ranking;
pub mod strategy;
pub mod summary;
pub mod threshold;
pub mod vector_math;

pub use orchestrator::{CancelFlag, RunOrchestrator, RunPolicy, RunReport};
pub use ranking::RankedPaper;
pub use strategy::{ApproximateIndex, ExactCosine, SimilarityStrategy};
pub use threshold::{ThresholdPolicy, ThresholdSpec};
