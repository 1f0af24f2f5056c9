//! Similarity strategies
//!
//! A strategy scores candidate vectors against reference vectors within one
//! vector space (one embedding model). Two implementations share the
//! contract: [`ExactCosine`] and [`ApproximateIndex`]. Which one a run uses
//! is a configuration value.

mod approximate;
mod exact;

pub use approximate::ApproximateIndex;
pub use exact::ExactCosine;

use crate::grouping::{GroupedCorpus, VectorRef};
use crate::vector_math::UnitVector;
use preprintbot_common::config::AnnConfig;
use preprintbot_common::embeddings::PaperId;
use preprintbot_common::errors::{AppError, Result};
use preprintbot_common::recommendations::MatchMethod;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// One scored vector pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchCandidate {
    pub candidate_paper_id: PaperId,
    pub score: f32,
    pub reference: VectorRef,
    pub candidate: VectorRef,
    /// Produced by an approximate index lookup
    pub approximate: bool,
}

/// Normalised vectors of one model
#[derive(Debug, Clone, Default)]
pub struct VectorSpace {
    pub dimension: usize,
    pub sources: Vec<VectorRef>,
    pub units: Vec<UnitVector>,
}

impl VectorSpace {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Default::default()
        }
    }

    pub fn push(&mut self, source: VectorRef, unit: UnitVector) {
        self.sources.push(source);
        self.units.push(unit);
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// A grouped corpus normalised for matching, one space per model
#[derive(Debug, Clone, Default)]
pub struct PreparedCorpus {
    pub spaces: BTreeMap<String, VectorSpace>,
    /// Vectors skipped for zero or non-finite magnitude
    pub degenerate: u64,
}

impl PreparedCorpus {
    /// Normalise every participating vector, skipping and counting degenerate ones
    pub fn prepare(corpus: &GroupedCorpus, use_sections: bool) -> Self {
        let mut prepared = Self::default();

        for paper in corpus.papers.values() {
            for (model, source, vector) in paper.vectors(use_sections) {
                match UnitVector::new(vector) {
                    Ok(unit) => {
                        let dimension = corpus.dimensions.get(model).copied().unwrap_or(vector.len());
                        prepared
                            .spaces
                            .entry(model.to_string())
                            .or_insert_with(|| VectorSpace::new(dimension))
                            .push(source, unit);
                    }
                    Err(e) => {
                        warn!(
                            paper_id = source.paper_id,
                            kind = %source.kind,
                            section_id = ?source.section_id,
                            error = %e,
                            "Skipping degenerate vector"
                        );
                        prepared.degenerate += 1;
                    }
                }
            }
        }

        prepared
    }

    /// Usable vectors across all models
    pub fn vector_count(&self) -> usize {
        self.spaces.values().map(VectorSpace::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.vector_count() == 0
    }
}

/// Pluggable matcher over one vector space
pub trait SimilarityStrategy: Send + Sync {
    fn method(&self) -> MatchMethod;

    /// Score candidate vectors against the references
    fn find_matches(
        &self,
        references: &VectorSpace,
        candidates: &VectorSpace,
    ) -> Result<Vec<MatchCandidate>>;
}

/// Create the strategy for a method; an index is searched deep enough to
/// fill `top_x` results
pub fn build_strategy(method: MatchMethod, ann: &AnnConfig, top_x: usize) -> Arc<dyn SimilarityStrategy> {
    match method {
        MatchMethod::Exact => Arc::new(ExactCosine),
        MatchMethod::Approximate => Arc::new(ApproximateIndex::new(*ann).with_top_x(top_x)),
    }
}

/// Score one candidate batch, pairing vectors of the same model only.
///
/// A model present on one side only contributes nothing.
pub fn score_batch(
    strategy: &dyn SimilarityStrategy,
    references: &PreparedCorpus,
    candidates: &PreparedCorpus,
) -> Result<Vec<MatchCandidate>> {
    let mut matches = Vec::new();

    for (model, candidate_space) in &candidates.spaces {
        let Some(reference_space) = references.spaces.get(model) else {
            continue;
        };
        if reference_space.dimension != candidate_space.dimension {
            return Err(AppError::DimensionMismatch {
                expected: reference_space.dimension,
                got: candidate_space.dimension,
            });
        }
        if reference_space.is_empty() || candidate_space.is_empty() {
            continue;
        }

        matches.extend(strategy.find_matches(reference_space, candidate_space)?);
    }

    Ok(matches)
}
