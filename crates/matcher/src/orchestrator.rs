//! Recommendation run orchestration
//!
//! A run moves `created -> computing -> persisted`, or to `failed` from
//! either earlier state. Parameter errors are rejected before a run record
//! exists; every later error marks the run failed and leaves no rows.

use crate::aggregation::{MaxPool, PaperScore};
use crate::grouping::{group_embeddings, record_dimension};
use crate::ranking::{rank, RankedPaper};
use crate::strategy::{build_strategy, score_batch, PreparedCorpus, SimilarityStrategy};
use crate::summary::ScoreSummary;
use crate::threshold::{passes, ThresholdPolicy, ThresholdSpec};
use chrono::Utc;
use preprintbot_common::config::{AnnConfig, MatchingConfig};
use preprintbot_common::embeddings::{CorpusId, EmbeddingFilter, EmbeddingStore};
use preprintbot_common::errors::{AppError, CorpusRole, Result};
use preprintbot_common::metrics::{record_batch, record_degenerate, RunMetrics};
use preprintbot_common::recommendations::{
    MatchMethod, NewRun, RecommendationRow, RecommendationSink, RunId, RunStatus,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Shared cancellation signal for a run
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything that decides the content of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunPolicy {
    pub threshold: ThresholdSpec,
    pub method: MatchMethod,
    /// Section vectors participate alongside abstracts
    pub use_sections: bool,
    pub top_x: i64,
    /// Restrict both corpora to one embedding model
    pub model_name: Option<String>,
}

impl RunPolicy {
    pub fn from_config(config: &MatchingConfig) -> Self {
        Self {
            threshold: ThresholdSpec::Level(config.threshold),
            method: config.method,
            use_sections: config.use_sections,
            top_x: config.top_x,
            model_name: config.model_name.clone(),
        }
    }

    pub fn method_label(&self) -> String {
        self.method.run_label(self.use_sections)
    }

    /// Check parameters and return the numeric cutoff
    pub fn validate(&self, thresholds: &ThresholdPolicy) -> Result<f32> {
        let cutoff = thresholds.cutoff(self.threshold)?;
        if self.top_x <= 0 {
            return Err(AppError::InvalidTopX { value: self.top_x });
        }
        Ok(cutoff)
    }

    fn filter(&self) -> EmbeddingFilter {
        EmbeddingFilter::for_scope(self.use_sections, self.model_name.clone())
    }
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self::from_config(&MatchingConfig::default())
    }
}

/// Outcome of a persisted run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub reference_corpus_id: CorpusId,
    pub candidate_corpus_id: CorpusId,
    pub status: RunStatus,
    pub method: String,
    pub threshold: String,
    pub cutoff: f32,
    pub recommendations: Vec<RankedPaper>,
    pub degenerate_vectors: u64,
    pub summary: ScoreSummary,
}

impl RunReport {
    pub fn rows(&self) -> Vec<RecommendationRow> {
        self.recommendations.iter().map(RankedPaper::to_row).collect()
    }
}

struct Computed {
    ranked: Vec<RankedPaper>,
    summary: ScoreSummary,
    degenerate: u64,
}

/// Drives one recommendation run end to end
pub struct RunOrchestrator {
    store: Arc<dyn EmbeddingStore>,
    sink: Arc<dyn RecommendationSink>,
    thresholds: ThresholdPolicy,
    batch_size: usize,
    ann: AnnConfig,
    workers: Option<Arc<rayon::ThreadPool>>,
}

impl RunOrchestrator {
    pub fn new(
        store: Arc<dyn EmbeddingStore>,
        sink: Arc<dyn RecommendationSink>,
        config: &MatchingConfig,
    ) -> Result<Self> {
        let workers = match config.workers {
            0 => None,
            n => Some(Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("matcher-{}", i))
                    .build()
                    .map_err(|e| AppError::Configuration {
                        message: format!("failed to start {} matcher workers: {}", n, e),
                    })?,
            )),
        };

        Ok(Self {
            store,
            sink,
            thresholds: ThresholdPolicy::default(),
            batch_size: config.candidate_batch_size.max(1),
            ann: config.ann,
            workers,
        })
    }

    pub fn with_thresholds(mut self, thresholds: ThresholdPolicy) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Match `candidate_corpus_id` against `reference_corpus_id` and persist
    /// the ranked result as a new run
    #[instrument(
        skip(self, policy, cancel),
        fields(method = %policy.method_label(), threshold = %policy.threshold)
    )]
    pub async fn execute(
        &self,
        reference_corpus_id: CorpusId,
        candidate_corpus_id: CorpusId,
        policy: &RunPolicy,
        cancel: &CancelFlag,
    ) -> Result<RunReport> {
        let cutoff = policy.validate(&self.thresholds)?;
        let method = policy.method_label();
        let metrics = RunMetrics::start(&method);

        let run_id = self
            .sink
            .create_run(NewRun {
                reference_corpus_id,
                candidate_corpus_id,
                threshold_level: policy.threshold.label(),
                method: method.clone(),
            })
            .await?;
        info!(run_id, cutoff, "Run created");

        let outcome: Result<Computed> = async {
            let computed = self
                .compute(run_id, reference_corpus_id, candidate_corpus_id, policy, cutoff, cancel)
                .await?;

            let rows: Vec<RecommendationRow> = computed.ranked.iter().map(RankedPaper::to_row).collect();
            self.sink
                .finalize_run(run_id, &rows, Utc::now(), computed.degenerate)
                .await?;
            Ok(computed)
        }
        .await;

        match outcome {
            Ok(computed) => {
                info!(
                    run_id,
                    recommendations = computed.ranked.len(),
                    degenerate_vectors = computed.degenerate,
                    "Run persisted"
                );
                metrics.finish(RunStatus::Persisted.as_str(), computed.ranked.len());

                Ok(RunReport {
                    run_id,
                    reference_corpus_id,
                    candidate_corpus_id,
                    status: RunStatus::Persisted,
                    method,
                    threshold: policy.threshold.label(),
                    cutoff,
                    recommendations: computed.ranked,
                    degenerate_vectors: computed.degenerate,
                    summary: computed.summary,
                })
            }
            Err(e) => {
                self.abandon(run_id, &e).await;
                metrics.finish(RunStatus::Failed.as_str(), 0);
                Err(e)
            }
        }
    }

    async fn compute(
        &self,
        run_id: RunId,
        reference_corpus_id: CorpusId,
        candidate_corpus_id: CorpusId,
        policy: &RunPolicy,
        cutoff: f32,
        cancel: &CancelFlag,
    ) -> Result<Computed> {
        let filter = policy.filter();
        let label = policy.method_label();

        let reference = group_embeddings(self.store.get_embeddings(reference_corpus_id, &filter).await?)?;
        let references = Arc::new(PreparedCorpus::prepare(&reference, policy.use_sections));
        if references.is_empty() {
            return Err(AppError::EmptyCorpus {
                corpus_id: reference_corpus_id,
                role: CorpusRole::Reference,
            });
        }
        record_degenerate(references.degenerate);
        let mut degenerate = references.degenerate;

        let paper_ids = self.store.list_papers(candidate_corpus_id).await?;
        if paper_ids.is_empty() {
            return Err(AppError::EmptyCorpus {
                corpus_id: candidate_corpus_id,
                role: CorpusRole::Candidate,
            });
        }

        self.sink.mark_computing(run_id).await?;
        info!(
            run_id,
            reference_papers = reference.len(),
            reference_vectors = references.vector_count(),
            candidate_papers = paper_ids.len(),
            "Run computing"
        );

        let top_x = usize::try_from(policy.top_x).unwrap_or(usize::MAX);
        let strategy = build_strategy(policy.method, &self.ann, top_x);
        let mut candidate_dimensions = BTreeMap::new();
        let mut pool = MaxPool::new();
        let mut candidate_vectors = 0usize;

        for (batch, chunk) in paper_ids.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled { run_id });
            }
            let started = Instant::now();

            let grouped = group_embeddings(
                self.store
                    .get_paper_embeddings(candidate_corpus_id, chunk, &filter)
                    .await?,
            )?;
            for (model, &dimension) in &grouped.dimensions {
                record_dimension(&mut candidate_dimensions, model, dimension)?;
                if let Some(&expected) = reference.dimensions.get(model) {
                    if expected != dimension {
                        return Err(AppError::DimensionMismatch { expected, got: dimension });
                    }
                }
            }

            let candidates = PreparedCorpus::prepare(&grouped, policy.use_sections);
            let vectors = candidates.vector_count();
            record_degenerate(candidates.degenerate);
            degenerate += candidates.degenerate;
            candidate_vectors += vectors;

            pool.merge(self.score(strategy.clone(), references.clone(), candidates).await?);

            record_batch(started.elapsed().as_secs_f64(), &label, vectors);
            debug!(run_id, batch, papers = chunk.len(), vectors, scored = pool.len(), "Candidate batch scored");
        }

        if candidate_vectors == 0 {
            return Err(AppError::EmptyCorpus {
                corpus_id: candidate_corpus_id,
                role: CorpusRole::Candidate,
            });
        }
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled { run_id });
        }

        let scores = pool.into_scores();
        let all: Vec<f32> = scores.iter().map(|s| s.score).collect();
        let summary = ScoreSummary::from_scores(&all, &self.thresholds);
        summary.log();

        let qualifying: Vec<PaperScore> = scores.into_iter().filter(|s| passes(s.score, cutoff)).collect();
        let ranked = rank(qualifying, policy.top_x)?;

        Ok(Computed {
            ranked,
            summary,
            degenerate,
        })
    }

    /// Score one batch on the blocking pool and fold it into a per-paper maximum
    async fn score(
        &self,
        strategy: Arc<dyn SimilarityStrategy>,
        references: Arc<PreparedCorpus>,
        candidates: PreparedCorpus,
    ) -> Result<MaxPool> {
        let workers = self.workers.clone();

        tokio::task::spawn_blocking(move || {
            let run = || -> Result<MaxPool> {
                let matches = score_batch(strategy.as_ref(), &references, &candidates)?;
                let mut pool = MaxPool::new();
                pool.extend(&matches);
                Ok(pool)
            };
            match workers {
                Some(workers) => workers.install(run),
                None => run(),
            }
        })
        .await
        .map_err(|e| AppError::Internal {
            message: format!("scoring task failed: {}", e),
        })?
    }

    async fn abandon(&self, run_id: RunId, err: &AppError) {
        error!(run_id, code = %err.code(), error = %err, "Run failed");
        if let Err(e) = self.sink.fail_run(run_id, err.code(), &err.to_string()).await {
            warn!(run_id, error = %e, "Could not mark run failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
    use preprintbot_common::embeddings::{Embedding, PaperId};
    use preprintbot_common::memory::{FailurePoint, MemoryStore};
    use preprintbot_common::recommendations::{RunReader, ThresholdLevel};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::atomic::AtomicU64;

    const MODEL: &str = "all-MiniLM-L6-v2";
    const REFERENCE: CorpusId = 1;
    const CANDIDATE: CorpusId = 2;

    fn orchestrator(store: &Arc<MemoryStore>) -> RunOrchestrator {
        orchestrator_with(store, MatchingConfig::default())
    }

    fn orchestrator_with(store: &Arc<MemoryStore>, config: MatchingConfig) -> RunOrchestrator {
        RunOrchestrator::new(store.clone(), store.clone(), &config).unwrap()
    }

    fn policy(level: ThresholdLevel, top_x: i64) -> RunPolicy {
        RunPolicy {
            threshold: ThresholdSpec::Level(level),
            top_x,
            ..RunPolicy::default()
        }
    }

    /// Unit vector whose cosine with [1, 0] is `score`
    fn at_score(score: f32) -> Vec<f32> {
        vec![score, (1.0 - score * score).sqrt()]
    }

    fn random_corpus(store: &MemoryStore, rng: &mut StdRng, corpus: CorpusId, papers: PaperId, first_id: PaperId) {
        for paper_id in first_id..first_id + papers {
            let v: Vec<f32> = (0..6).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
            store.add_embedding(corpus, Embedding::abstract_vector(paper_id, MODEL, v)).unwrap();
            for section in 0..3 {
                let v: Vec<f32> = (0..6).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
                store
                    .add_embedding(corpus, Embedding::section_vector(paper_id, section, MODEL, v))
                    .unwrap();
            }
        }
    }

    async fn run_status(store: &MemoryStore, run_id: RunId) -> RunStatus {
        store.get_run(run_id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_end_to_end_single_match() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_embedding(REFERENCE, Embedding::abstract_vector(1, MODEL, vec![1.0, 0.0, 0.0]))
            .unwrap();
        store
            .add_embedding(CANDIDATE, Embedding::abstract_vector(100, MODEL, vec![1.0, 0.0, 0.0]))
            .unwrap();
        store
            .add_embedding(CANDIDATE, Embedding::abstract_vector(200, MODEL, vec![0.0, 1.0, 0.0]))
            .unwrap();

        let report = orchestrator(&store)
            .execute(REFERENCE, CANDIDATE, &policy(ThresholdLevel::Medium, 10), &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(report.recommendations.len(), 1);
        assert_eq!(report.recommendations[0].paper_id, 100);
        assert_eq!(report.recommendations[0].rank, 1);
        assert_eq!(report.recommendations[0].score, 1.0);
        assert_eq!(report.summary.count, 2);

        let run = store.get_run(report.run_id).await.unwrap().unwrap();
        assert!(run.is_authoritative());
        assert_eq!(run.threshold_level, "medium");
        assert_eq!(run.method, "exact_sections");

        let rows = store.list_recommendations(report.run_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!((rows[0].paper_id, rows[0].rank), (100, 1));
    }

    #[tokio::test]
    async fn test_empty_candidate_corpus_fails() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_embedding(REFERENCE, Embedding::abstract_vector(1, MODEL, vec![1.0, 0.0]))
            .unwrap();

        let err = orchestrator(&store)
            .execute(REFERENCE, CANDIDATE, &RunPolicy::default(), &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::EmptyCorpus { role: CorpusRole::Candidate, .. }
        ));

        let run = store.get_run(1).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_code.as_deref(), Some("EMPTY_CORPUS"));
        assert!(run.completed_at.is_none());
        assert_eq!(store.total_recommendations().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_candidates_without_required_kind_are_empty() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_embedding(REFERENCE, Embedding::abstract_vector(1, MODEL, vec![1.0, 0.0]))
            .unwrap();
        store
            .add_embedding(CANDIDATE, Embedding::section_vector(5, 1, MODEL, vec![1.0, 0.0]))
            .unwrap();

        let abstract_only = RunPolicy {
            use_sections: false,
            ..RunPolicy::default()
        };
        let err = orchestrator(&store)
            .execute(REFERENCE, CANDIDATE, &abstract_only, &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EmptyCorpus { .. }));
        assert_eq!(run_status(&store, 1).await, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_top_x_keeps_best_two() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_embedding(REFERENCE, Embedding::abstract_vector(1, MODEL, vec![1.0, 0.0]))
            .unwrap();
        for (paper_id, score) in [(10, 0.65), (11, 0.9), (12, 0.7), (13, 0.85), (14, 0.8)] {
            store
                .add_embedding(CANDIDATE, Embedding::abstract_vector(paper_id, MODEL, at_score(score)))
                .unwrap();
        }

        let report = orchestrator(&store)
            .execute(REFERENCE, CANDIDATE, &policy(ThresholdLevel::Medium, 2), &CancelFlag::new())
            .await
            .unwrap();

        let ranked: Vec<_> = report.recommendations.iter().map(|r| (r.paper_id, r.rank)).collect();
        assert_eq!(ranked, vec![(11, 1), (13, 2)]);
        assert!((report.recommendations[0].score - 0.9).abs() < 1e-6);
        assert_eq!(report.summary.above_medium, 5);
    }

    #[tokio::test]
    async fn test_persisted_scores_clear_cutoff() {
        let mut rng = StdRng::seed_from_u64(17);
        let store = Arc::new(MemoryStore::new());
        random_corpus(&store, &mut rng, REFERENCE, 4, 1);
        random_corpus(&store, &mut rng, CANDIDATE, 40, 100);

        for level in ThresholdLevel::ALL {
            let report = orchestrator(&store)
                .execute(REFERENCE, CANDIDATE, &policy(level, 100), &CancelFlag::new())
                .await
                .unwrap();
            let cutoff = ThresholdPolicy::default().resolve(level);

            let rows = store.list_recommendations(report.run_id).await.unwrap();
            assert_eq!(rows.len(), report.recommendations.len());
            for (i, row) in rows.iter().enumerate() {
                assert!(row.score >= cutoff);
                assert_eq!(row.rank as usize, i + 1);
            }
            let mut papers: Vec<_> = rows.iter().map(|r| r.paper_id).collect();
            papers.sort_unstable();
            papers.dedup();
            assert_eq!(papers.len(), rows.len());
        }
    }

    #[tokio::test]
    async fn test_rerun_is_identical() {
        let mut rng = StdRng::seed_from_u64(5);
        let store = Arc::new(MemoryStore::new());
        random_corpus(&store, &mut rng, REFERENCE, 3, 1);
        random_corpus(&store, &mut rng, CANDIDATE, 30, 100);

        let orchestrator = orchestrator(&store);
        let policy = policy(ThresholdLevel::Low, 20);
        let first = orchestrator
            .execute(REFERENCE, CANDIDATE, &policy, &CancelFlag::new())
            .await
            .unwrap();
        let second = orchestrator
            .execute(REFERENCE, CANDIDATE, &policy, &CancelFlag::new())
            .await
            .unwrap();

        assert_ne!(first.run_id, second.run_id);
        assert_eq!(first.rows(), second.rows());

        let latest = store.latest_completed_run(REFERENCE, CANDIDATE).await.unwrap().unwrap();
        assert_eq!(latest.id, second.run_id);
    }

    #[tokio::test]
    async fn test_batch_size_does_not_change_result() {
        let mut rng = StdRng::seed_from_u64(23);
        let store = Arc::new(MemoryStore::new());
        random_corpus(&store, &mut rng, REFERENCE, 3, 1);
        random_corpus(&store, &mut rng, CANDIDATE, 25, 100);

        let policy = policy(ThresholdLevel::Low, 50);
        let mut results = Vec::new();
        for batch_size in [1, 4, 7, 1000] {
            let config = MatchingConfig {
                candidate_batch_size: batch_size,
                ..MatchingConfig::default()
            };
            let report = orchestrator_with(&store, config)
                .execute(REFERENCE, CANDIDATE, &policy, &CancelFlag::new())
                .await
                .unwrap();
            results.push(report.rows());
        }

        assert!(!results[0].is_empty());
        assert!(results.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_exact_and_approximate_agree_on_small_sets() {
        let mut rng = StdRng::seed_from_u64(31);
        let store = Arc::new(MemoryStore::new());
        random_corpus(&store, &mut rng, REFERENCE, 2, 1);
        random_corpus(&store, &mut rng, CANDIDATE, 12, 100);

        let orchestrator = orchestrator(&store);
        let exact = orchestrator
            .execute(REFERENCE, CANDIDATE, &policy(ThresholdLevel::Low, 50), &CancelFlag::new())
            .await
            .unwrap();
        let approximate_policy = RunPolicy {
            method: MatchMethod::Approximate,
            ..policy(ThresholdLevel::Low, 50)
        };
        let approximate = orchestrator
            .execute(REFERENCE, CANDIDATE, &approximate_policy, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(approximate.method, "approximate_sections");
        assert!(!exact.recommendations.is_empty());
        assert_eq!(exact.rows(), approximate.rows());
        assert!(approximate.recommendations.iter().all(|r| r.approximate));
    }

    /// Forty candidates clear the cutoff, more than the default neighbour count
    fn many_qualifying(store: &MemoryStore) {
        store
            .add_embedding(REFERENCE, Embedding::abstract_vector(1, MODEL, vec![1.0, 0.0]))
            .unwrap();
        for i in 0..40 {
            let score = 0.70 + 0.005 * i as f32;
            store
                .add_embedding(CANDIDATE, Embedding::abstract_vector(100 + i, MODEL, at_score(score)))
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_approximate_keeps_every_qualifying_candidate() {
        let store = Arc::new(MemoryStore::new());
        many_qualifying(&store);

        let exact = orchestrator(&store)
            .execute(REFERENCE, CANDIDATE, &policy(ThresholdLevel::Medium, 50), &CancelFlag::new())
            .await
            .unwrap();
        let approximate_policy = RunPolicy {
            method: MatchMethod::Approximate,
            ..policy(ThresholdLevel::Medium, 50)
        };
        let approximate = orchestrator(&store)
            .execute(REFERENCE, CANDIDATE, &approximate_policy, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(exact.recommendations.len(), 40);
        assert_eq!(exact.rows(), approximate.rows());
    }

    #[tokio::test]
    async fn test_approximate_batch_size_does_not_change_result() {
        let store = Arc::new(MemoryStore::new());
        many_qualifying(&store);

        let approximate_policy = RunPolicy {
            method: MatchMethod::Approximate,
            ..policy(ThresholdLevel::Medium, 50)
        };
        let mut results = Vec::new();
        for batch_size in [3, 10, 256] {
            let config = MatchingConfig {
                candidate_batch_size: batch_size,
                ..MatchingConfig::default()
            };
            let report = orchestrator_with(&store, config)
                .execute(REFERENCE, CANDIDATE, &approximate_policy, &CancelFlag::new())
                .await
                .unwrap();
            results.push(report.rows());
        }

        assert_eq!(results[0].len(), 40);
        assert!(results.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_invalid_parameters_create_no_run() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_embedding(REFERENCE, Embedding::abstract_vector(1, MODEL, vec![1.0]))
            .unwrap();
        let orchestrator = orchestrator(&store);

        let err = orchestrator
            .execute(REFERENCE, CANDIDATE, &policy(ThresholdLevel::High, 0), &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTopX { value: 0 }));

        let custom = RunPolicy {
            threshold: ThresholdSpec::Custom(1.5),
            ..RunPolicy::default()
        };
        let err = orchestrator
            .execute(REFERENCE, CANDIDATE, &custom, &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(err.is_input_error());

        assert!(store.get_run(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_all_below_threshold_is_success() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_embedding(REFERENCE, Embedding::abstract_vector(1, MODEL, vec![1.0, 0.0]))
            .unwrap();
        store
            .add_embedding(CANDIDATE, Embedding::abstract_vector(7, MODEL, at_score(0.3)))
            .unwrap();

        let report = orchestrator(&store)
            .execute(REFERENCE, CANDIDATE, &policy(ThresholdLevel::High, 5), &CancelFlag::new())
            .await
            .unwrap();

        assert!(report.recommendations.is_empty());
        assert_eq!(report.status, RunStatus::Persisted);
        assert_eq!(run_status(&store, report.run_id).await, RunStatus::Persisted);
    }

    #[tokio::test]
    async fn test_custom_threshold_is_inclusive() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_embedding(REFERENCE, Embedding::abstract_vector(1, MODEL, vec![1.0, 0.0]))
            .unwrap();
        store
            .add_embedding(CANDIDATE, Embedding::abstract_vector(3, MODEL, vec![1.0, 0.0]))
            .unwrap();

        let custom = RunPolicy {
            threshold: ThresholdSpec::Custom(1.0),
            ..RunPolicy::default()
        };
        let report = orchestrator(&store)
            .execute(REFERENCE, CANDIDATE, &custom, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(report.recommendations.len(), 1);
        assert_eq!(report.threshold, "custom:1");
    }

    #[tokio::test]
    async fn test_sections_raise_paper_score() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_embedding(REFERENCE, Embedding::abstract_vector(1, MODEL, vec![1.0, 0.0]))
            .unwrap();
        store
            .add_embeddings(
                CANDIDATE,
                [
                    Embedding::abstract_vector(9, MODEL, at_score(0.3)),
                    Embedding::section_vector(9, 1, MODEL, at_score(0.3)),
                    Embedding::section_vector(9, 2, MODEL, at_score(0.8)),
                    Embedding::section_vector(9, 3, MODEL, at_score(0.5)),
                ],
            )
            .unwrap();

        let with_sections = orchestrator(&store)
            .execute(REFERENCE, CANDIDATE, &policy(ThresholdLevel::Low, 5), &CancelFlag::new())
            .await
            .unwrap();
        assert!((with_sections.recommendations[0].score - 0.8).abs() < 1e-6);

        let abstract_only = RunPolicy {
            use_sections: false,
            ..policy(ThresholdLevel::Low, 5)
        };
        let report = orchestrator(&store)
            .execute(REFERENCE, CANDIDATE, &abstract_only, &CancelFlag::new())
            .await
            .unwrap();
        assert!(report.recommendations.is_empty());
        assert_eq!(report.method, "exact_abstract");
    }

    #[tokio::test]
    async fn test_degenerate_vectors_are_counted() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_embedding(REFERENCE, Embedding::abstract_vector(1, MODEL, vec![1.0, 0.0]))
            .unwrap();
        store
            .add_embeddings(
                CANDIDATE,
                [
                    Embedding::abstract_vector(4, MODEL, vec![0.0, 0.0]),
                    Embedding::abstract_vector(5, MODEL, vec![1.0, 0.1]),
                ],
            )
            .unwrap();

        let report = orchestrator(&store)
            .execute(REFERENCE, CANDIDATE, &policy(ThresholdLevel::Low, 5), &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(report.degenerate_vectors, 1);
        assert_eq!(report.recommendations.len(), 1);
        assert_eq!(report.recommendations[0].paper_id, 5);

        let run = store.get_run(report.run_id).await.unwrap().unwrap();
        assert_eq!(run.degenerate_vectors, 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails_run() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_embedding(REFERENCE, Embedding::abstract_vector(1, MODEL, vec![1.0, 0.0]))
            .unwrap();
        store
            .add_embedding(CANDIDATE, Embedding::abstract_vector(2, MODEL, vec![1.0, 0.0, 0.0]))
            .unwrap();

        let err = orchestrator(&store)
            .execute(REFERENCE, CANDIDATE, &RunPolicy::default(), &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DimensionMismatch { expected: 2, got: 3 }));

        let run = store.get_run(1).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_code.as_deref(), Some("DIMENSION_MISMATCH"));
    }

    async fn assert_failed_without_rows(store: &MemoryStore, run_id: RunId) {
        let run = store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.completed_at.is_none());
        assert!(store.list_recommendations(run_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_reference_corpus_fails() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_embedding(CANDIDATE, Embedding::abstract_vector(2, MODEL, vec![1.0, 0.0]))
            .unwrap();

        let err = orchestrator(&store)
            .execute(REFERENCE, CANDIDATE, &RunPolicy::default(), &CancelFlag::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::EmptyCorpus { corpus_id: REFERENCE, role: CorpusRole::Reference }
        ));
        assert_failed_without_rows(&store, 1).await;
    }

    #[tokio::test]
    async fn test_reference_with_only_degenerate_vectors_is_empty() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_embeddings(
                REFERENCE,
                [
                    Embedding::abstract_vector(1, MODEL, vec![0.0, 0.0]),
                    Embedding::section_vector(1, 4, MODEL, vec![0.0, 0.0]),
                ],
            )
            .unwrap();
        store
            .add_embedding(CANDIDATE, Embedding::abstract_vector(2, MODEL, vec![1.0, 0.0]))
            .unwrap();

        let err = orchestrator(&store)
            .execute(REFERENCE, CANDIDATE, &RunPolicy::default(), &CancelFlag::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::EmptyCorpus { role: CorpusRole::Reference, .. }));
        let run = store.get_run(1).await.unwrap().unwrap();
        assert_eq!(run.error_code.as_deref(), Some("EMPTY_CORPUS"));
        assert_failed_without_rows(&store, 1).await;
    }

    #[tokio::test]
    async fn test_candidate_dimension_changes_between_batches() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_embedding(REFERENCE, Embedding::abstract_vector(1, MODEL, vec![1.0, 0.0]))
            .unwrap();
        store
            .add_embeddings(
                CANDIDATE,
                [
                    Embedding::abstract_vector(10, MODEL, vec![1.0, 0.0]),
                    Embedding::abstract_vector(11, MODEL, vec![1.0, 0.0, 0.0]),
                ],
            )
            .unwrap();

        let config = MatchingConfig {
            candidate_batch_size: 1,
            ..MatchingConfig::default()
        };
        let err = orchestrator_with(&store, config)
            .execute(REFERENCE, CANDIDATE, &policy(ThresholdLevel::Low, 10), &CancelFlag::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::InconsistentDimension { expected: 2, got: 3, .. }
        ));
        assert_failed_without_rows(&store, 1).await;
    }

    /// Counts `degenerate_vectors_total` increments
    #[derive(Default)]
    struct DegenerateRecorder(Arc<AtomicU64>);

    impl Recorder for DegenerateRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            if key.name().ends_with("_degenerate_vectors_total") {
                Counter::from_arc(self.0.clone())
            } else {
                Counter::noop()
            }
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    #[test]
    fn test_degenerate_vectors_recorded_when_run_fails() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_embeddings(
                REFERENCE,
                [
                    Embedding::abstract_vector(1, MODEL, vec![1.0, 0.0]),
                    Embedding::section_vector(1, 2, MODEL, vec![0.0, 0.0]),
                ],
            )
            .unwrap();
        store
            .add_embedding(CANDIDATE, Embedding::abstract_vector(5, MODEL, vec![1.0, 0.0, 0.0]))
            .unwrap();

        let recorder = DegenerateRecorder::default();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = metrics::with_local_recorder(&recorder, || {
            runtime.block_on(orchestrator(&store).execute(
                REFERENCE,
                CANDIDATE,
                &RunPolicy::default(),
                &CancelFlag::new(),
            ))
        });

        assert!(matches!(result, Err(AppError::DimensionMismatch { .. })));
        assert_eq!(recorder.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sink_failure_leaves_no_rows() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_embedding(REFERENCE, Embedding::abstract_vector(1, MODEL, vec![1.0, 0.0]))
            .unwrap();
        store
            .add_embedding(CANDIDATE, Embedding::abstract_vector(2, MODEL, vec![1.0, 0.0]))
            .unwrap();
        store.set_failure(FailurePoint::CompleteRun).unwrap();

        let result = orchestrator(&store)
            .execute(REFERENCE, CANDIDATE, &RunPolicy::default(), &CancelFlag::new())
            .await;
        assert!(result.is_err());

        assert_eq!(run_status(&store, 1).await, RunStatus::Failed);
        assert_eq!(store.total_recommendations().unwrap(), 0);
        assert!(store.latest_completed_run(REFERENCE, CANDIDATE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_scoring() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_embedding(REFERENCE, Embedding::abstract_vector(1, MODEL, vec![1.0, 0.0]))
            .unwrap();
        store
            .add_embedding(CANDIDATE, Embedding::abstract_vector(2, MODEL, vec![1.0, 0.0]))
            .unwrap();

        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = orchestrator(&store)
            .execute(REFERENCE, CANDIDATE, &RunPolicy::default(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Cancelled { run_id: 1 }));
        let run = store.get_run(1).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_code.as_deref(), Some("CANCELLED"));
    }

    /// Cancels the run once the first candidate batch has been fetched
    struct CancelAfterFirstBatch {
        inner: Arc<MemoryStore>,
        cancel: CancelFlag,
    }

    #[async_trait]
    impl EmbeddingStore for CancelAfterFirstBatch {
        async fn get_embeddings(&self, corpus_id: CorpusId, filter: &EmbeddingFilter) -> Result<Vec<Embedding>> {
            self.inner.get_embeddings(corpus_id, filter).await
        }

        async fn list_papers(&self, corpus_id: CorpusId) -> Result<Vec<PaperId>> {
            self.inner.list_papers(corpus_id).await
        }

        async fn get_paper_embeddings(
            &self,
            corpus_id: CorpusId,
            paper_ids: &[PaperId],
            filter: &EmbeddingFilter,
        ) -> Result<Vec<Embedding>> {
            self.cancel.cancel();
            self.inner.get_paper_embeddings(corpus_id, paper_ids, filter).await
        }
    }

    #[tokio::test]
    async fn test_cancelled_between_batches() {
        let mut rng = StdRng::seed_from_u64(2);
        let store = Arc::new(MemoryStore::new());
        random_corpus(&store, &mut rng, REFERENCE, 1, 1);
        random_corpus(&store, &mut rng, CANDIDATE, 6, 100);

        let cancel = CancelFlag::new();
        let source = Arc::new(CancelAfterFirstBatch {
            inner: store.clone(),
            cancel: cancel.clone(),
        });
        let config = MatchingConfig {
            candidate_batch_size: 2,
            ..MatchingConfig::default()
        };
        let orchestrator = RunOrchestrator::new(source, store.clone(), &config).unwrap();

        let err = orchestrator
            .execute(REFERENCE, CANDIDATE, &policy(ThresholdLevel::Low, 10), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Cancelled { .. }));
        assert_eq!(run_status(&store, 1).await, RunStatus::Failed);
        assert_eq!(store.total_recommendations().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dedicated_worker_pool() {
        let mut rng = StdRng::seed_from_u64(8);
        let store = Arc::new(MemoryStore::new());
        random_corpus(&store, &mut rng, REFERENCE, 2, 1);
        random_corpus(&store, &mut rng, CANDIDATE, 10, 100);

        let policy = policy(ThresholdLevel::Low, 10);
        let shared = orchestrator(&store)
            .execute(REFERENCE, CANDIDATE, &policy, &CancelFlag::new())
            .await
            .unwrap();
        let config = MatchingConfig {
            workers: 2,
            ..MatchingConfig::default()
        };
        let dedicated = orchestrator_with(&store, config)
            .execute(REFERENCE, CANDIDATE, &policy, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(shared.rows(), dedicated.rows());
    }
}
