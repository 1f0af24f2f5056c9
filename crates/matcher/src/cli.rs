//! Command-line arguments

use clap::{Args, Parser, Subcommand};
use preprintbot_common::config::MatchingConfig;
use preprintbot_common::recommendations::{MatchMethod, ThresholdLevel};
use preprintbot_matcher::{RunPolicy, ThresholdSpec};

#[derive(Debug, Parser)]
#[command(name = "matcher", version, about = "Match candidate papers against a reference corpus")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Compute and persist a new recommendation run
    Run(RunArgs),

    /// Print a stored run and its ranked rows
    Show {
        /// Run id
        #[arg(long)]
        run: i64,
    },
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Reference corpus id (the researcher's own papers)
    #[arg(long)]
    pub reference: i64,

    /// Candidate corpus id (new papers)
    #[arg(long)]
    pub candidate: i64,

    /// low, medium or high
    #[arg(long)]
    pub threshold: Option<ThresholdLevel>,

    /// Numeric cutoff in [0, 1], instead of a level
    #[arg(long, conflicts_with = "threshold")]
    pub custom_threshold: Option<f32>,

    /// exact or approximate
    #[arg(long)]
    pub method: Option<MatchMethod>,

    /// Match on abstract vectors only
    #[arg(long)]
    pub abstract_only: bool,

    /// Number of recommendations to keep
    #[arg(long)]
    pub top_x: Option<i64>,

    /// Embedding model to match on
    #[arg(long)]
    pub model: Option<String>,
}

impl RunArgs {
    /// Policy for this invocation, with unset flags taken from configuration
    pub fn policy(&self, defaults: &MatchingConfig) -> RunPolicy {
        let threshold = match (self.custom_threshold, self.threshold) {
            (Some(value), _) => ThresholdSpec::Custom(value),
            (None, Some(level)) => ThresholdSpec::Level(level),
            (None, None) => ThresholdSpec::Level(defaults.threshold),
        };

        RunPolicy {
            threshold,
            method: self.method.unwrap_or(defaults.method),
            use_sections: defaults.use_sections && !self.abstract_only,
            top_x: self.top_x.unwrap_or(defaults.top_x),
            model_name: self.model.clone().or_else(|| defaults.model_name.clone()),
        }
    }
}
