//! In-memory store for tests and local runs
//!
//! Implements the embedding store, the recommendation sink, and the run
//! reader over plain collections behind one lock, so `finalize_run` is
//! atomic in the same way the database transaction is.

use crate::embeddings::{CorpusId, Embedding, EmbeddingFilter, EmbeddingStore, PaperId};
use crate::errors::{AppError, ErrorCode, Result};
use crate::recommendations::{
    ensure_unique_papers, NewRun, Recommendation, RecommendationRow, RecommendationRun,
    RecommendationSink, RunId, RunReader, RunStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

/// Where the store should fail, for exercising rollback paths
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePoint {
    #[default]
    None,
    WriteRecommendations,
    CompleteRun,
}

#[derive(Default)]
struct State {
    papers: BTreeMap<CorpusId, BTreeSet<PaperId>>,
    embeddings: BTreeMap<CorpusId, Vec<Embedding>>,
    runs: BTreeMap<RunId, RecommendationRun>,
    rows: BTreeMap<RunId, Vec<Recommendation>>,
    next_run_id: RunId,
    failure: FailurePoint,
}

/// Mutex-guarded store implementing every storage contract
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| AppError::Internal {
            message: "memory store lock poisoned".to_string(),
        })
    }

    /// Register a paper with no embeddings
    pub fn add_paper(&self, corpus_id: CorpusId, paper_id: PaperId) -> Result<()> {
        self.lock()?.papers.entry(corpus_id).or_default().insert(paper_id);
        Ok(())
    }

    /// Store an embedding, registering its paper in the corpus
    pub fn add_embedding(&self, corpus_id: CorpusId, embedding: Embedding) -> Result<()> {
        let mut state = self.lock()?;
        state
            .papers
            .entry(corpus_id)
            .or_default()
            .insert(embedding.paper_id);
        state.embeddings.entry(corpus_id).or_default().push(embedding);
        Ok(())
    }

    pub fn add_embeddings(
        &self,
        corpus_id: CorpusId,
        embeddings: impl IntoIterator<Item = Embedding>,
    ) -> Result<()> {
        for embedding in embeddings {
            self.add_embedding(corpus_id, embedding)?;
        }
        Ok(())
    }

    pub fn set_failure(&self, failure: FailurePoint) -> Result<()> {
        self.lock()?.failure = failure;
        Ok(())
    }

    /// Every stored row across all runs
    pub fn total_recommendations(&self) -> Result<usize> {
        Ok(self.lock()?.rows.values().map(Vec::len).sum())
    }

    fn transition(state: &mut State, run_id: RunId, next: RunStatus) -> Result<()> {
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or(AppError::RunNotFound { id: run_id })?;
        if !run.status.can_transition_to(next) {
            return Err(run.status.transition_error(run_id, next));
        }
        run.status = next;
        Ok(())
    }

    fn insert_rows(state: &mut State, run_id: RunId, rows: &[RecommendationRow]) -> Result<()> {
        let run = state
            .runs
            .get(&run_id)
            .ok_or(AppError::RunNotFound { id: run_id })?;
        if run.status != RunStatus::Computing {
            return Err(AppError::InvalidRunTransition {
                run_id,
                from: run.status.to_string(),
                to: "rows written".to_string(),
            });
        }
        ensure_unique_papers(run_id, rows)?;

        let existing = state.rows.entry(run_id).or_default();
        if let Some(row) = rows
            .iter()
            .find(|r| existing.iter().any(|e| e.paper_id == r.paper_id))
        {
            return Err(AppError::DuplicateRecommendation {
                run_id,
                paper_id: row.paper_id,
            });
        }
        existing.extend(rows.iter().map(|r| Recommendation {
            run_id,
            paper_id: r.paper_id,
            score: r.score,
            rank: r.rank,
        }));
        Ok(())
    }

    fn complete(
        state: &mut State,
        run_id: RunId,
        completed_at: DateTime<Utc>,
        degenerate_vectors: u64,
    ) -> Result<()> {
        Self::transition(state, run_id, RunStatus::Persisted)?;
        if let Some(run) = state.runs.get_mut(&run_id) {
            run.completed_at = Some(completed_at);
            run.degenerate_vectors = degenerate_vectors as i64;
        }
        Ok(())
    }

    fn injected(point: FailurePoint) -> AppError {
        AppError::Internal {
            message: format!("injected failure at {:?}", point),
        }
    }
}

#[async_trait]
impl EmbeddingStore for MemoryStore {
    async fn get_embeddings(
        &self,
        corpus_id: CorpusId,
        filter: &EmbeddingFilter,
    ) -> Result<Vec<Embedding>> {
        let state = self.lock()?;
        Ok(state
            .embeddings
            .get(&corpus_id)
            .map(|all| all.iter().filter(|e| filter.accepts(e)).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_papers(&self, corpus_id: CorpusId) -> Result<Vec<PaperId>> {
        let state = self.lock()?;
        Ok(state
            .papers
            .get(&corpus_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn get_paper_embeddings(
        &self,
        corpus_id: CorpusId,
        paper_ids: &[PaperId],
        filter: &EmbeddingFilter,
    ) -> Result<Vec<Embedding>> {
        let wanted: BTreeSet<PaperId> = paper_ids.iter().copied().collect();
        let state = self.lock()?;
        Ok(state
            .embeddings
            .get(&corpus_id)
            .map(|all| {
                all.iter()
                    .filter(|e| wanted.contains(&e.paper_id) && filter.accepts(e))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl RecommendationSink for MemoryStore {
    async fn create_run(&self, run: NewRun) -> Result<RunId> {
        let mut state = self.lock()?;
        state.next_run_id += 1;
        let id = state.next_run_id;
        state.runs.insert(
            id,
            RecommendationRun {
                id,
                reference_corpus_id: run.reference_corpus_id,
                candidate_corpus_id: run.candidate_corpus_id,
                threshold_level: run.threshold_level,
                method: run.method,
                status: RunStatus::Created,
                error_code: None,
                error_message: None,
                degenerate_vectors: 0,
                created_at: Utc::now(),
                completed_at: None,
            },
        );
        Ok(id)
    }

    async fn mark_computing(&self, run_id: RunId) -> Result<()> {
        let mut state = self.lock()?;
        Self::transition(&mut state, run_id, RunStatus::Computing)
    }

    async fn write_recommendations(&self, run_id: RunId, rows: &[RecommendationRow]) -> Result<()> {
        let mut state = self.lock()?;
        if state.failure == FailurePoint::WriteRecommendations {
            return Err(Self::injected(state.failure));
        }
        Self::insert_rows(&mut state, run_id, rows)
    }

    async fn complete_run(
        &self,
        run_id: RunId,
        completed_at: DateTime<Utc>,
        degenerate_vectors: u64,
    ) -> Result<()> {
        let mut state = self.lock()?;
        if state.failure == FailurePoint::CompleteRun {
            return Err(Self::injected(state.failure));
        }
        Self::complete(&mut state, run_id, completed_at, degenerate_vectors)
    }

    async fn fail_run(&self, run_id: RunId, code: ErrorCode, message: &str) -> Result<()> {
        let mut state = self.lock()?;
        Self::transition(&mut state, run_id, RunStatus::Failed)?;
        state.rows.remove(&run_id);
        if let Some(run) = state.runs.get_mut(&run_id) {
            run.error_code = Some(code.as_str().to_string());
            run.error_message = Some(message.to_string());
        }
        Ok(())
    }

    async fn finalize_run(
        &self,
        run_id: RunId,
        rows: &[RecommendationRow],
        completed_at: DateTime<Utc>,
        degenerate_vectors: u64,
    ) -> Result<()> {
        let mut state = self.lock()?;
        if state.failure != FailurePoint::None {
            return Err(Self::injected(state.failure));
        }
        Self::insert_rows(&mut state, run_id, rows)?;
        if let Err(e) = Self::complete(&mut state, run_id, completed_at, degenerate_vectors) {
            state.rows.remove(&run_id);
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl RunReader for MemoryStore {
    async fn get_run(&self, run_id: RunId) -> Result<Option<RecommendationRun>> {
        Ok(self.lock()?.runs.get(&run_id).cloned())
    }

    async fn list_recommendations(&self, run_id: RunId) -> Result<Vec<Recommendation>> {
        let state = self.lock()?;
        let mut rows = state.rows.get(&run_id).cloned().unwrap_or_default();
        rows.sort_by_key(|r| r.rank);
        Ok(rows)
    }

    async fn latest_completed_run(
        &self,
        reference_corpus_id: CorpusId,
        candidate_corpus_id: CorpusId,
    ) -> Result<Option<RecommendationRun>> {
        let state = self.lock()?;
        Ok(state
            .runs
            .values()
            .rev()
            .find(|r| {
                r.reference_corpus_id == reference_corpus_id
                    && r.candidate_corpus_id == candidate_corpus_id
                    && r.is_authoritative()
            })
            .cloned())
    }
}
