mod collector;
mod config;
mod error;
mod models;
mod pricing;
mod rollup;
mod service;
mod storage;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use collector::{collect_observations, CollectSettings, SampleSource, SnapshotFile};
use crate::config::{db_path, ensure_initialized, load_config, AppConfig};
use error::AppError;
use models::{Observation, ResourceKey, ResourceKind, Sample};
use service::{CycleOutcome, CycleStatus, RollupService, RunSummary};
use std::path::PathBuf;
use std::sync::Arc;
use storage::{SharedStorage, Storage};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cost-minion")]
#[command(about = "Rolling hourly, daily, monthly and yearly cost records for cluster resources")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init,
    /// Price a cluster snapshot and fold it into the pod, node and app records.
    Ingest {
        #[arg(long)]
        snapshot: PathBuf,
    },
    /// Fold a single sample into one record.
    Observe {
        #[arg(long)]
        kind: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        namespace: String,
        #[arg(long)]
        actual: f64,
        #[arg(long)]
        requested: f64,
        #[arg(long)]
        at: Option<i64>,
    },
    Export {
        #[arg(long)]
        kind: Option<String>,
    },
}

fn validate_kind(input: &str) -> Result<ResourceKind, AppError> {
    ResourceKind::parse(input)
        .ok_or_else(|| AppError::Config("Unsupported kind. Use pod, node, or app.".into()))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_observations(
    cfg: &AppConfig,
    observations: Vec<Observation>,
    now: DateTime<Utc>,
) -> Result<Vec<CycleOutcome>, AppError> {
    let storage = Storage::open(&db_path()?)?;
    let svc = RollupService::new(Arc::new(SharedStorage::new(storage)), cfg.max_concurrency);
    Ok(svc.run(observations, now).await)
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            ensure_initialized()?;
            println!("Initialized cost-minion config and data directories.");
        }
        Commands::Ingest { snapshot } => {
            ensure_initialized()?;
            let cfg = load_config()?;
            let source = SnapshotFile { path: snapshot };
            let cluster = source.fetch_snapshot().await?;
            info!(source = source.name(), pods = cluster.pod_metrics.len(), "snapshot loaded");

            let settings = CollectSettings {
                app_label: cfg.app_label.clone(),
                node_cost_overrides: cfg.node_cost_overrides.clone(),
            };
            let now = Utc::now();
            let observations = collect_observations(&cluster, &settings, now.timestamp());
            let outcomes = run_observations(&cfg, observations, now).await?;
            let summary = RunSummary::from_outcomes(&outcomes);
            println!(
                "Created {} and updated {} records, {} failed",
                summary.created, summary.updated, summary.failed
            );
        }
        Commands::Observe {
            kind,
            name,
            namespace,
            actual,
            requested,
            at,
        } => {
            ensure_initialized()?;
            let kind = validate_kind(&kind)?;
            let cfg = load_config()?;
            let now = Utc::now();
            let observation = Observation {
                key: ResourceKey::new(kind, name, namespace),
                sample: Sample::new(actual, requested, at.unwrap_or(now.timestamp())),
            };
            let outcomes = run_observations(&cfg, vec![observation], now).await?;
            for outcome in outcomes {
                match outcome.result? {
                    CycleStatus::Created => println!("Created 1 record {}", outcome.key),
                    CycleStatus::Updated => println!("Updated 1 record {}", outcome.key),
                }
            }
        }
        Commands::Export { kind } => {
            ensure_initialized()?;
            let kind = kind.as_deref().map(validate_kind).transpose()?;
            let storage = Storage::open(&db_path()?)?;
            println!("{}", storage.export_json(kind)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_kind_accepts_known_values() {
        assert_eq!(validate_kind("pod").expect("pod"), ResourceKind::Pod);
        assert_eq!(validate_kind("Nodes").expect("nodes"), ResourceKind::Node);
        assert_eq!(validate_kind("app").expect("app"), ResourceKind::App);
    }

    #[test]
    fn validate_kind_rejects_unknown_values() {
        let err = validate_kind("service").expect_err("expected validation error");
        assert!(err.to_string().contains("Unsupported kind"));
    }

    #[test]
    fn cli_parses_observe_arguments() {
        let cli = Cli::try_parse_from([
            "cost-minion",
            "observe",
            "--kind",
            "pod",
            "--name",
            "web",
            "--namespace",
            "prod",
            "--actual",
            "1.5",
            "--requested",
            "2",
            "--at",
            "1700000000",
        ])
        .expect("parse observe");
        match cli.command {
            Commands::Observe {
                kind, actual, at, ..
            } => {
                assert_eq!(kind, "pod");
                assert_eq!(actual, 1.5);
                assert_eq!(at, Some(1_700_000_000));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
