//! Nearest-neighbour matching over an HNSW index
//!
//! The index is built once per candidate batch and queried by every
//! reference vector for at least `top_x` neighbours. Each returned neighbour
//! is re-scored with the exact cosine of the pair, so a score reported here
//! equals the exact score of that pair; what is approximate is which pairs
//! are found. Batches too small to index are scanned exhaustively.

use super::{MatchCandidate, SimilarityStrategy, VectorSpace};
use crate::vector_math::{similarity_matrix, UnitVector};
use hnsw_rs::prelude::*;
use preprintbot_common::config::AnnConfig;
use preprintbot_common::errors::Result;
use preprintbot_common::recommendations::MatchMethod;
use tracing::debug;

/// HNSW needs a handful of points to build a usable graph
const MIN_INDEX_SIZE: usize = 10;

/// Upper bound on HNSW layers
const MAX_LAYERS: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct ApproximateIndex {
    config: AnnConfig,
    /// Lower bound on neighbours per query, raised to the run's `top_x`
    min_neighbours: usize,
}

impl ApproximateIndex {
    pub fn new(config: AnnConfig) -> Self {
        Self {
            config,
            min_neighbours: 1,
        }
    }

    /// Query at least `top_x` neighbours per reference vector
    pub fn with_top_x(mut self, top_x: usize) -> Self {
        self.min_neighbours = top_x.max(1);
        self
    }

    pub fn config(&self) -> &AnnConfig {
        &self.config
    }

    fn uses_index(&self, num_vectors: usize) -> bool {
        num_vectors >= MIN_INDEX_SIZE && self.config.should_use_ann(num_vectors)
    }

    /// Neighbours requested per reference vector, capped at the batch size
    fn neighbours_per_query(&self, num_vectors: usize) -> usize {
        self.config
            .neighbors
            .max(self.min_neighbours)
            .min(num_vectors)
    }

    /// Candidate positions nearest to each reference, one list per reference
    fn index_search(&self, references: &VectorSpace, candidates: &VectorSpace) -> Vec<Vec<usize>> {
        let nb_elem = candidates.len();
        let k = self.neighbours_per_query(nb_elem);
        let nb_layer = MAX_LAYERS.min((nb_elem as f32).ln().trunc() as usize);
        debug!(vectors = nb_elem, nb_layer, k, "Building HNSW index");

        let hnsw = Hnsw::<f32, DistCosine>::new(
            self.config.m,
            nb_elem,
            nb_layer,
            self.config.ef_construction,
            DistCosine {},
        );

        let data: Vec<Vec<f32>> = candidates.units.iter().map(UnitVector::to_f32).collect();
        let insertion: Vec<(&Vec<f32>, usize)> = data.iter().enumerate().map(|(i, v)| (v, i)).collect();
        hnsw.parallel_insert(&insertion);

        let queries: Vec<Vec<f32>> = references.units.iter().map(UnitVector::to_f32).collect();
        let ef = self.config.ef_search.max(k);

        hnsw.parallel_search(&queries, k, ef)
            .into_iter()
            .map(|found| {
                found
                    .into_iter()
                    .map(|neighbour| neighbour.get_origin_id())
                    .filter(|&idx| idx < nb_elem)
                    .collect()
            })
            .collect()
    }
}

/// Every reference/candidate pair, for spaces too small to index
fn exhaustive(references: &VectorSpace, candidates: &VectorSpace) -> Result<Vec<MatchCandidate>> {
    let matrix = similarity_matrix(&references.units, &candidates.units)?;

    let mut matches = Vec::with_capacity(references.len() * candidates.len());
    for (row, scores) in matrix.into_iter().enumerate() {
        for (candidate, score) in candidates.sources.iter().zip(scores) {
            matches.push(MatchCandidate {
                candidate_paper_id: candidate.paper_id,
                score,
                reference: references.sources[row],
                candidate: *candidate,
                approximate: true,
            });
        }
    }
    Ok(matches)
}

impl SimilarityStrategy for ApproximateIndex {
    fn method(&self) -> MatchMethod {
        MatchMethod::Approximate
    }

    fn find_matches(
        &self,
        references: &VectorSpace,
        candidates: &VectorSpace,
    ) -> Result<Vec<MatchCandidate>> {
        if references.is_empty() || candidates.is_empty() {
            return Ok(Vec::new());
        }
        if !self.uses_index(candidates.len()) {
            return exhaustive(references, candidates);
        }

        let mut matches = Vec::new();
        for (row, found) in self.index_search(references, candidates).into_iter().enumerate() {
            for column in found {
                let candidate = candidates.sources[column];
                matches.push(MatchCandidate {
                    candidate_paper_id: candidate.paper_id,
                    score: references.units[row].dot(&candidates.units[column])?,
                    reference: references.sources[row],
                    candidate,
                    approximate: true,
                });
            }
        }

        Ok(matches)
    }
}
