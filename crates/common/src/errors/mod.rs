//! Error types for PreprintBot services
//!
//! Provides a single error enum shared by the engine and its storage
//! backends, with:
//! - Distinct variants for structural, input, and recoverable faults
//! - Machine-readable error codes (persisted on failed runs)
//! - Classification helpers used by the run orchestrator

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,
    ThresholdOutOfRange,
    InvalidTopX,
    MalformedEmbedding,

    // Vector errors (2xxx)
    DimensionMismatch,
    InconsistentDimension,
    DegenerateVector,

    // Corpus errors (3xxx)
    EmptyCorpus,

    // Resource errors (4xxx)
    RunNotFound,

    // Conflict errors (5xxx)
    DuplicateRecommendation,
    InvalidRunTransition,

    // Lifecycle (6xxx)
    Cancelled,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1002,
            ErrorCode::ThresholdOutOfRange => 1003,
            ErrorCode::InvalidTopX => 1004,
            ErrorCode::MalformedEmbedding => 1005,

            // Vectors (2xxx)
            ErrorCode::DimensionMismatch => 2001,
            ErrorCode::InconsistentDimension => 2002,
            ErrorCode::DegenerateVector => 2003,

            // Corpus (3xxx)
            ErrorCode::EmptyCorpus => 3001,

            // Resources (4xxx)
            ErrorCode::RunNotFound => 4001,

            // Conflicts (5xxx)
            ErrorCode::DuplicateRecommendation => 5001,
            ErrorCode::InvalidRunTransition => 5002,

            // Lifecycle (6xxx)
            ErrorCode::Cancelled => 6001,

            // Database (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }

    /// Stable string form, as stored in `recommendation_runs.error_code`
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InvalidFormat => "INVALID_FORMAT",
            ErrorCode::ThresholdOutOfRange => "THRESHOLD_OUT_OF_RANGE",
            ErrorCode::InvalidTopX => "INVALID_TOP_X",
            ErrorCode::MalformedEmbedding => "MALFORMED_EMBEDDING",
            ErrorCode::DimensionMismatch => "DIMENSION_MISMATCH",
            ErrorCode::InconsistentDimension => "INCONSISTENT_DIMENSION",
            ErrorCode::DegenerateVector => "DEGENERATE_VECTOR",
            ErrorCode::EmptyCorpus => "EMPTY_CORPUS",
            ErrorCode::RunNotFound => "RUN_NOT_FOUND",
            ErrorCode::DuplicateRecommendation => "DUPLICATE_RECOMMENDATION",
            ErrorCode::InvalidRunTransition => "INVALID_RUN_TRANSITION",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::ConnectionError => "CONNECTION_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::SerializationError => "SERIALIZATION_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a matching operation a corpus plays
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CorpusRole {
    Reference,
    Candidate,
}

impl fmt::Display for CorpusRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorpusRole::Reference => f.write_str("reference"),
            CorpusRole::Candidate => f.write_str("candidate"),
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    #[error("Custom threshold {value} is outside [0, 1]")]
    ThresholdOutOfRange { value: f32 },

    #[error("top_x must be a positive integer, got {value}")]
    InvalidTopX { value: i64 },

    #[error("Malformed embedding for paper {paper_id}: {message}")]
    MalformedEmbedding { paper_id: i64, message: String },

    // Vector errors
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Inconsistent dimension for model {model}: expected {expected}, got {got}")]
    InconsistentDimension {
        model: String,
        expected: usize,
        got: usize,
    },

    #[error("Degenerate vector: {reason}")]
    DegenerateVector { reason: String },

    // Corpus errors
    #[error("Empty {role} corpus {corpus_id}: no usable vectors")]
    EmptyCorpus { corpus_id: i64, role: CorpusRole },

    // Resource errors
    #[error("Recommendation run not found: {id}")]
    RunNotFound { id: i64 },

    // Conflict errors
    #[error("Duplicate recommendation for paper {paper_id} in run {run_id}")]
    DuplicateRecommendation { run_id: i64, paper_id: i64 },

    #[error("Run {run_id} cannot move from {from} to {to}")]
    InvalidRunTransition {
        run_id: i64,
        from: String,
        to: String,
    },

    // Lifecycle
    #[error("Run {run_id} was cancelled")]
    Cancelled { run_id: i64 },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::ThresholdOutOfRange { .. } => ErrorCode::ThresholdOutOfRange,
            AppError::InvalidTopX { .. } => ErrorCode::InvalidTopX,
            AppError::MalformedEmbedding { .. } => ErrorCode::MalformedEmbedding,
            AppError::DimensionMismatch { .. } => ErrorCode::DimensionMismatch,
            AppError::InconsistentDimension { .. } => ErrorCode::InconsistentDimension,
            AppError::DegenerateVector { .. } => ErrorCode::DegenerateVector,
            AppError::EmptyCorpus { .. } => ErrorCode::EmptyCorpus,
            AppError::RunNotFound { .. } => ErrorCode::RunNotFound,
            AppError::DuplicateRecommendation { .. } => ErrorCode::DuplicateRecommendation,
            AppError::InvalidRunTransition { .. } => ErrorCode::InvalidRunTransition,
            AppError::Cancelled { .. } => ErrorCode::Cancelled,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Parameter faults that are rejected before any run record exists
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            AppError::Validation { .. }
                | AppError::ThresholdOutOfRange { .. }
                | AppError::InvalidTopX { .. }
        )
    }

    /// Faults recovered locally by skipping the offending vector
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AppError::DegenerateVector { .. })
    }

    /// Failures of the storage layer rather than of the data
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::DatabaseConnection { .. }
        )
    }
}

/// Structured error payload, as printed by the CLI
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<i64>,
}

impl ErrorDetails {
    pub fn from_error(err: &AppError, run_id: Option<i64>) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            run_id,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
