//! Exact cosine over every reference/candidate pair

use super::{MatchCandidate, SimilarityStrategy, VectorSpace};
use crate::vector_math::similarity_matrix;
use preprintbot_common::errors::Result;
use preprintbot_common::recommendations::MatchMethod;

/// Full similarity matrix, reduced to the best reference per candidate vector.
///
/// Only the per-vector maximum can influence a paper's max-pooled score, so
/// the other pairs are not returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactCosine;

impl SimilarityStrategy for ExactCosine {
    fn method(&self) -> MatchMethod {
        MatchMethod::Exact
    }

    fn find_matches(
        &self,
        references: &VectorSpace,
        candidates: &VectorSpace,
    ) -> Result<Vec<MatchCandidate>> {
        let matrix = similarity_matrix(&references.units, &candidates.units)?;

        let mut matches = Vec::with_capacity(candidates.len());
        for (column, candidate) in candidates.sources.iter().enumerate() {
            // Strictly greater keeps the first reference on ties
            let mut best: Option<(usize, f32)> = None;
            for (row, scores) in matrix.iter().enumerate() {
                let score = scores[column];
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((row, score));
                }
            }

            if let Some((row, score)) = best {
                matches.push(MatchCandidate {
                    candidate_paper_id: candidate.paper_id,
                    score,
                    reference: references.sources[row],
                    candidate: *candidate,
                    approximate: false,
                });
            }
        }

        Ok(matches)
    }
}
