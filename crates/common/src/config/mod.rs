//! Configuration management for PreprintBot services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml)
//! - Default values

use crate::recommendations::{MatchMethod, ThresholdLevel};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Matching defaults
    #[serde(default)]
    pub matching: MatchingConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

/// Defaults applied when a caller does not specify a policy field
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MatchingConfig {
    #[serde(default)]
    pub threshold: ThresholdLevel,

    #[serde(default)]
    pub method: MatchMethod,

    /// Compare section vectors in addition to abstracts
    #[serde(default = "default_use_sections")]
    pub use_sections: bool,

    /// Maximum recommendations kept per run
    #[serde(default = "default_top_x")]
    pub top_x: i64,

    /// Embedding model whose vectors participate
    #[serde(default = "default_model_name")]
    pub model_name: Option<String>,

    /// Candidate papers loaded per batch
    #[serde(default = "default_candidate_batch_size")]
    pub candidate_batch_size: usize,

    /// Rayon worker threads (0 = rayon default)
    #[serde(default)]
    pub workers: usize,

    #[serde(default)]
    pub ann: AnnConfig,
}

/// HNSW parameters for the approximate strategy
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct AnnConfig {
    /// Neighbours per node
    #[serde(default = "default_ann_m")]
    pub m: usize,

    /// Candidate list size during construction
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,

    /// Candidate list size during search
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,

    /// Nearest candidate vectors returned per reference vector
    #[serde(default = "default_neighbors")]
    pub neighbors: usize,

    /// Below this many vectors a linear scan is used instead of HNSW
    #[serde(default = "default_min_vectors_for_ann")]
    pub min_vectors_for_ann: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_use_sections() -> bool { true }
fn default_top_x() -> i64 { 50 }
fn default_model_name() -> Option<String> { Some("all-MiniLM-L6-v2".to_string()) }
fn default_candidate_batch_size() -> usize { 256 }
fn default_ann_m() -> usize { 16 }
fn default_ef_construction() -> usize { 200 }
fn default_ef_search() -> usize { 64 }
fn default_neighbors() -> usize { 32 }
fn default_min_vectors_for_ann() -> usize { 1000 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "preprintbot-matcher".to_string() }

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: ThresholdLevel::default(),
            method: MatchMethod::default(),
            use_sections: default_use_sections(),
            top_x: default_top_x(),
            model_name: default_model_name(),
            candidate_batch_size: default_candidate_batch_size(),
            workers: 0,
            ann: AnnConfig::default(),
        }
    }
}

impl Default for AnnConfig {
    fn default() -> Self {
        Self {
            m: default_ann_m(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
            neighbors: default_neighbors(),
            min_vectors_for_ann: default_min_vectors_for_ann(),
        }
    }
}

impl AnnConfig {
    /// Whether an index of `num_vectors` vectors is worth building
    pub fn should_use_ann(&self, num_vectors: usize) -> bool {
        num_vectors >= self.min_vectors_for_ann
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__MATCHING__TOP_X=20
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/preprintbot".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            matching: MatchingConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.matching.threshold, ThresholdLevel::Medium);
        assert_eq!(config.matching.method, MatchMethod::Exact);
        assert!(config.matching.use_sections);
        assert_eq!(config.matching.top_x, 50);
        assert_eq!(config.matching.model_name.as_deref(), Some("all-MiniLM-L6-v2"));
    }

    #[test]
    fn test_partial_matching_section_uses_defaults() {
        let config: AppConfig = Config::builder()
            .set_override("database.url", "postgres://db/test")
            .unwrap()
            .set_override("matching.method", "approximate")
            .unwrap()
            .set_override("matching.ann.neighbors", 8)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.matching.method, MatchMethod::Approximate);
        assert_eq!(config.matching.ann.neighbors, 8);
        assert_eq!(config.matching.ann.m, 16);
        assert_eq!(config.matching.candidate_batch_size, 256);
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn test_observability_overrides() {
        let defaults = AppConfig::default();
        assert_eq!(defaults.observability.service_name, "preprintbot-matcher");

        let config: AppConfig = Config::builder()
            .set_override("database.url", "postgres://db/test")
            .unwrap()
            .set_override("observability.service_name", "matcher-nightly")
            .unwrap()
            .set_override("observability.json_logging", false)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.observability.service_name, "matcher-nightly");
        assert!(!config.observability.json_logging);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_should_use_ann() {
        let ann = AnnConfig::default();
        assert!(ann.should_use_ann(1000));
        assert!(!ann.should_use_ann(999));
    }
}
