//! PreprintBot Matcher
//!
//! Runs one recommendation run between two corpora stored in PostgreSQL,
//! or prints a stored run.

mod cli;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Command, RunArgs};
use preprintbot_common::config::{AppConfig, ObservabilityConfig};
use preprintbot_common::errors::{AppError, ErrorDetails};
use preprintbot_common::metrics::register_metrics;
use preprintbot_common::recommendations::RunReader;
use preprintbot_common::{DbPool, Repository, VERSION};
use preprintbot_matcher::{CancelFlag, RunOrchestrator};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::load().context("failed to load configuration")?;

    init_tracing(&config.observability);
    info!(service = %config.observability.service_name, "Starting PreprintBot Matcher v{}", VERSION);
    register_metrics();

    info!("Connecting to database...");
    let repository = Arc::new(Repository::new(DbPool::new(&config.database).await?));

    match cli.command {
        Command::Run(args) => run(args, &config, repository).await,
        Command::Show { run } => show(run, repository).await,
    }
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // stdout carries the report
    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(args: RunArgs, config: &AppConfig, repository: Arc<Repository>) -> anyhow::Result<()> {
    let policy = args.policy(&config.matching);
    let orchestrator = RunOrchestrator::new(repository.clone(), repository, &config.matching)?;

    let cancel = CancelFlag::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling run");
                cancel.cancel();
            }
        })
    };

    let result = orchestrator
        .execute(args.reference, args.candidate, &policy, &cancel)
        .await;
    watcher.abort();

    match result {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            let run_id = match &e {
                AppError::Cancelled { run_id } => Some(*run_id),
                _ => None,
            };
            eprintln!("{}", serde_json::to_string_pretty(&ErrorDetails::from_error(&e, run_id))?);
            Err(e.into())
        }
    }
}

async fn show(run_id: i64, repository: Arc<Repository>) -> anyhow::Result<()> {
    let run = repository
        .get_run(run_id)
        .await?
        .ok_or(AppError::RunNotFound { id: run_id })?;
    let recommendations = repository.list_recommendations(run_id).await?;

    if !run.is_authoritative() {
        warn!(run_id, status = %run.status, "Run has not completed; rows are not authoritative");
    }

    let output = serde_json::json!({
        "run": run,
        "recommendations": recommendations,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
