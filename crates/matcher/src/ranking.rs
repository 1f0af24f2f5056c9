//! Deterministic ordering and truncation of aggregated scores

use crate::aggregation::PaperScore;
use crate::grouping::VectorRef;
use preprintbot_common::embeddings::PaperId;
use preprintbot_common::errors::{AppError, Result};
use preprintbot_common::recommendations::RecommendationRow;
use serde::Serialize;

/// A ranked candidate paper
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RankedPaper {
    pub rank: u32,
    pub paper_id: PaperId,
    pub score: f32,
    /// Reference vector of the best pair
    pub matched_reference: VectorRef,
    /// Candidate vector of the best pair
    pub matched_candidate: VectorRef,
    pub approximate: bool,
}

impl RankedPaper {
    pub fn to_row(&self) -> RecommendationRow {
        RecommendationRow {
            paper_id: self.paper_id,
            score: self.score,
            rank: self.rank,
        }
    }
}

/// Sort by score descending then paper id ascending, keep the first `top_x`,
/// and number them from 1.
pub fn rank(mut scores: Vec<PaperScore>, top_x: i64) -> Result<Vec<RankedPaper>> {
    if top_x <= 0 {
        return Err(AppError::InvalidTopX { value: top_x });
    }
    let limit = usize::try_from(top_x).unwrap_or(usize::MAX);

    scores.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.paper_id.cmp(&b.paper_id))
    });
    scores.truncate(limit);

    Ok(scores
        .into_iter()
        .zip(1u32..)
        .map(|(s, rank)| RankedPaper {
            rank,
            paper_id: s.paper_id,
            score: s.score,
            matched_reference: s.reference,
            matched_candidate: s.candidate,
            approximate: s.approximate,
        })
        .collect())
}
