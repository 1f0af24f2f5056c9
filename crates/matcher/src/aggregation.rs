//! Max-pooling of vector-pair scores into one score per candidate paper

use crate::grouping::VectorRef;
use crate::strategy::MatchCandidate;
use preprintbot_common::embeddings::PaperId;
use serde::Serialize;
use std::collections::BTreeMap;

/// Aggregated score of one candidate paper and the pair that produced it
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PaperScore {
    pub paper_id: PaperId,
    pub score: f32,
    pub reference: VectorRef,
    pub candidate: VectorRef,
    pub approximate: bool,
}

impl PaperScore {
    fn from_match(m: &MatchCandidate) -> Self {
        Self {
            paper_id: m.candidate_paper_id,
            score: m.score,
            reference: m.reference,
            candidate: m.candidate,
            approximate: m.approximate,
        }
    }

    /// Higher score wins; equal scores fall back to the lower pair
    fn beats(&self, other: &PaperScore) -> bool {
        match self.score.total_cmp(&other.score) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => {
                (self.reference, self.candidate) < (other.reference, other.candidate)
            }
        }
    }
}

/// Running per-paper maximum.
///
/// The result does not depend on the order or grouping in which matches
/// arrive, so candidate batches can be folded in one at a time.
#[derive(Debug, Clone, Default)]
pub struct MaxPool {
    best: BTreeMap<PaperId, PaperScore>,
}

impl MaxPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, candidate: &MatchCandidate) {
        let score = PaperScore::from_match(candidate);
        self.best
            .entry(score.paper_id)
            .and_modify(|current| {
                if score.beats(current) {
                    *current = score;
                }
            })
            .or_insert(score);
    }

    pub fn extend<'a>(&mut self, candidates: impl IntoIterator<Item = &'a MatchCandidate>) {
        for candidate in candidates {
            self.add(candidate);
        }
    }

    /// Fold another pool into this one
    pub fn merge(&mut self, other: MaxPool) {
        for (paper_id, score) in other.best {
            self.best
                .entry(paper_id)
                .and_modify(|current| {
                    if score.beats(current) {
                        *current = score;
                    }
                })
                .or_insert(score);
        }
    }

    pub fn len(&self) -> usize {
        self.best.len()
    }

    pub fn is_empty(&self) -> bool {
        self.best.is_empty()
    }

    /// Scores ordered by paper id. Papers without a contributing pair never appear.
    pub fn into_scores(self) -> Vec<PaperScore> {
        self.best.into_values().collect()
    }
}

/// One-shot aggregation of a list of matches
pub fn aggregate(candidates: &[MatchCandidate]) -> Vec<PaperScore> {
    let mut pool = MaxPool::new();
    pool.extend(candidates);
    pool.into_scores()
}
