//! Distribution of aggregated scores, taken before threshold filtering

use crate::threshold::{passes, ThresholdPolicy};
use preprintbot_common::recommendations::ThresholdLevel;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreSummary {
    pub count: usize,
    pub max: Option<f32>,
    pub min: Option<f32>,
    pub mean: Option<f32>,
    pub median: Option<f32>,
    pub above_low: usize,
    pub above_medium: usize,
    pub above_high: usize,
}

impl ScoreSummary {
    pub fn from_scores(scores: &[f32], thresholds: &ThresholdPolicy) -> Self {
        let above = |level| {
            let cutoff = thresholds.resolve(level);
            scores.iter().filter(|&&s| passes(s, cutoff)).count()
        };

        let mut sorted = scores.to_vec();
        sorted.sort_by(f32::total_cmp);

        let median = match sorted.len() {
            0 => None,
            n if n % 2 == 1 => Some(sorted[n / 2]),
            n => Some(((sorted[n / 2 - 1] as f64 + sorted[n / 2] as f64) / 2.0) as f32),
        };
        let mean = (!sorted.is_empty())
            .then(|| (sorted.iter().map(|&s| s as f64).sum::<f64>() / sorted.len() as f64) as f32);

        Self {
            count: sorted.len(),
            max: sorted.last().copied(),
            min: sorted.first().copied(),
            mean,
            median,
            above_low: above(ThresholdLevel::Low),
            above_medium: above(ThresholdLevel::Medium),
            above_high: above(ThresholdLevel::High),
        }
    }

    pub fn log(&self) {
        info!(
            count = self.count,
            max = ?self.max,
            min = ?self.min,
            mean = ?self.mean,
            median = ?self.median,
            above_low = self.above_low,
            above_medium = self.above_medium,
            above_high = self.above_high,
            "Score distribution"
        );
    }
}
