//! Recommendation runs and the persistence sink contract
//!
//! A run is created before matching starts and becomes authoritative only
//! once its rows are written and `completed_at` is set. The sink is the only
//! writer of runs and rows.

use crate::embeddings::{CorpusId, PaperId};
use crate::errors::{AppError, ErrorCode, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

pub type RunId = i64;

/// Symbolic similarity cutoff
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl ThresholdLevel {
    pub const ALL: [ThresholdLevel; 3] = [ThresholdLevel::Low, ThresholdLevel::Medium, ThresholdLevel::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdLevel::Low => "low",
            ThresholdLevel::Medium => "medium",
            ThresholdLevel::High => "high",
        }
    }
}

impl fmt::Display for ThresholdLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThresholdLevel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(ThresholdLevel::Low),
            "medium" => Ok(ThresholdLevel::Medium),
            "high" => Ok(ThresholdLevel::High),
            other => Err(AppError::Validation {
                message: format!("unknown threshold level '{}'", other),
            }),
        }
    }
}

/// Similarity strategy selector
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    #[default]
    Exact,
    Approximate,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Exact => "exact",
            MatchMethod::Approximate => "approximate",
        }
    }

    /// Label persisted in `recommendation_runs.method`
    pub fn run_label(&self, use_sections: bool) -> String {
        format!(
            "{}_{}",
            self.as_str(),
            if use_sections { "sections" } else { "abstract" }
        )
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchMethod {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exact" | "cosine" => Ok(MatchMethod::Exact),
            "approximate" | "ann" => Ok(MatchMethod::Approximate),
            other => Err(AppError::Validation {
                message: format!("unknown similarity method '{}'", other),
            }),
        }
    }
}

/// Run lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Computing,
    Persisted,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Created => "created",
            RunStatus::Computing => "computing",
            RunStatus::Persisted => "persisted",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Persisted | RunStatus::Failed)
    }

    /// Allowed lifecycle edges
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Created, RunStatus::Computing)
                | (RunStatus::Created, RunStatus::Failed)
                | (RunStatus::Computing, RunStatus::Persisted)
                | (RunStatus::Computing, RunStatus::Failed)
        )
    }

    /// Error for an illegal edge out of this state
    pub fn transition_error(&self, run_id: RunId, next: RunStatus) -> AppError {
        AppError::InvalidRunTransition {
            run_id,
            from: self.as_str().to_string(),
            to: next.as_str().to_string(),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(RunStatus::Created),
            "computing" => Ok(RunStatus::Computing),
            "persisted" => Ok(RunStatus::Persisted),
            "failed" => Ok(RunStatus::Failed),
            other => Err(AppError::InvalidFormat {
                message: format!("unknown run status '{}'", other),
            }),
        }
    }
}

/// Parameters recorded when a run is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRun {
    pub reference_corpus_id: CorpusId,
    pub candidate_corpus_id: CorpusId,
    /// `low` / `medium` / `high`, or `custom:<value>`
    pub threshold_level: String,
    /// e.g. `exact_sections`
    pub method: String,
}

/// A stored recommendation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRun {
    pub id: RunId,
    pub reference_corpus_id: CorpusId,
    pub candidate_corpus_id: CorpusId,
    pub threshold_level: String,
    pub method: String,
    pub status: RunStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub degenerate_vectors: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RecommendationRun {
    /// Only completed runs may be read as results
    pub fn is_authoritative(&self) -> bool {
        self.status == RunStatus::Persisted && self.completed_at.is_some()
    }
}

/// One ranked row, as handed to the sink
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRow {
    pub paper_id: PaperId,
    pub score: f32,
    pub rank: u32,
}

/// A stored recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub run_id: RunId,
    pub paper_id: PaperId,
    pub score: f32,
    pub rank: u32,
}

/// Reject a batch that would create two rows for one paper
pub fn ensure_unique_papers(run_id: RunId, rows: &[RecommendationRow]) -> Result<()> {
    let mut seen = HashSet::with_capacity(rows.len());
    for row in rows {
        if !seen.insert(row.paper_id) {
            return Err(AppError::DuplicateRecommendation {
                run_id,
                paper_id: row.paper_id,
            });
        }
    }
    Ok(())
}

/// Downstream persistence for runs and their rows
#[async_trait]
pub trait RecommendationSink: Send + Sync {
    /// Insert a run in `created` state and return its id
    async fn create_run(&self, run: NewRun) -> Result<RunId>;

    /// Move a run from `created` to `computing`
    async fn mark_computing(&self, run_id: RunId) -> Result<()>;

    /// Write every row or none; fails on a duplicate paper
    async fn write_recommendations(&self, run_id: RunId, rows: &[RecommendationRow]) -> Result<()>;

    /// Set `completed_at` and move the run to `persisted`
    async fn complete_run(
        &self,
        run_id: RunId,
        completed_at: DateTime<Utc>,
        degenerate_vectors: u64,
    ) -> Result<()>;

    /// Move a run to `failed`; any rows already written must be removed
    async fn fail_run(&self, run_id: RunId, code: ErrorCode, message: &str) -> Result<()>;

    /// Write the rows and complete the run as one atomic unit: either the
    /// run is `persisted` with every row, or nothing was written
    async fn finalize_run(
        &self,
        run_id: RunId,
        rows: &[RecommendationRow],
        completed_at: DateTime<Utc>,
        degenerate_vectors: u64,
    ) -> Result<()>;
}

/// Read access to stored runs
#[async_trait]
pub trait RunReader: Send + Sync {
    async fn get_run(&self, run_id: RunId) -> Result<Option<RecommendationRun>>;

    /// Rows of a run ordered by rank
    async fn list_recommendations(&self, run_id: RunId) -> Result<Vec<Recommendation>>;

    /// Most recent run for the pair that reached `persisted`
    async fn latest_completed_run(
        &self,
        reference_corpus_id: CorpusId,
        candidate_corpus_id: CorpusId,
    ) -> Result<Option<RecommendationRun>>;
}
