//! Symbolic-to-numeric similarity cutoffs

use preprintbot_common::errors::{AppError, Result};
use preprintbot_common::recommendations::ThresholdLevel;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const LOW_CUTOFF: f32 = 0.5;
pub const MEDIUM_CUTOFF: f32 = 0.6;
pub const HIGH_CUTOFF: f32 = 0.75;

/// Requested cutoff: a named level or an explicit value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdSpec {
    Level(ThresholdLevel),
    Custom(f32),
}

impl ThresholdSpec {
    /// Value persisted as the run's `threshold_level`
    pub fn label(&self) -> String {
        match self {
            ThresholdSpec::Level(level) => level.as_str().to_string(),
            ThresholdSpec::Custom(value) => format!("custom:{}", value),
        }
    }
}

impl Default for ThresholdSpec {
    fn default() -> Self {
        ThresholdSpec::Level(ThresholdLevel::default())
    }
}

impl From<ThresholdLevel> for ThresholdSpec {
    fn from(level: ThresholdLevel) -> Self {
        ThresholdSpec::Level(level)
    }
}

impl fmt::Display for ThresholdSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Fixed table of level cutoffs, passed to each run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    low: f32,
    medium: f32,
    high: f32,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            low: LOW_CUTOFF,
            medium: MEDIUM_CUTOFF,
            high: HIGH_CUTOFF,
        }
    }
}

impl ThresholdPolicy {
    /// Build a table with other cutoffs; they must lie in [0, 1] and
    /// increase strictly from low to high
    pub fn new(low: f32, medium: f32, high: f32) -> Result<Self> {
        for value in [low, medium, high] {
            Self::validate_custom(value)?;
        }
        if !(low < medium && medium < high) {
            return Err(AppError::Validation {
                message: format!(
                    "threshold levels must increase: low={} medium={} high={}",
                    low, medium, high
                ),
            });
        }
        Ok(Self { low, medium, high })
    }

    pub fn resolve(&self, level: ThresholdLevel) -> f32 {
        match level {
            ThresholdLevel::Low => self.low,
            ThresholdLevel::Medium => self.medium,
            ThresholdLevel::High => self.high,
        }
    }

    /// Accept a custom cutoff only within [0, 1]
    pub fn validate_custom(value: f32) -> Result<f32> {
        if (0.0..=1.0).contains(&value) {
            Ok(value)
        } else {
            Err(AppError::ThresholdOutOfRange { value })
        }
    }

    /// Numeric cutoff for a request
    pub fn cutoff(&self, spec: ThresholdSpec) -> Result<f32> {
        match spec {
            ThresholdSpec::Level(level) => Ok(self.resolve(level)),
            ThresholdSpec::Custom(value) => Self::validate_custom(value),
        }
    }
}

/// Lower-inclusive cutoff test
pub fn passes(score: f32, cutoff: f32) -> bool {
    score >= cutoff
}
