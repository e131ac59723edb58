//! denormd — the adaptive denormalization daemon.
//!
//! Single binary that assembles the control plane:
//! - Rule repository (redb)
//! - Coordination namespace (redb)
//! - Topic provisioning + lifecycle coordinator
//! - Query event ingestion + priority aggregator
//! - Rule determination engine
//! - `/metrics` endpoint
//!
//! # Usage
//!
//! ```text
//! denormd run --config denorm.toml --events queries.jsonl --metrics-port 9464
//! denormd check --config denorm.toml
//! ```

mod http;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use denorm_coordinator::{
    CoordinatorService, CoordinatorState, LifecycleCoordinator, LifecycleSettings, LocalBroker,
    NamespaceStore, TopicProvisioner,
};
use denorm_core::DenormConfig;
use denorm_metrics::Telemetry;
use denorm_priority::{IngestRouter, PriorityAggregator, read_events, spawn_ingest_workers};
use denorm_rules::DeterminationEngine;
use denorm_state::{RuleRepository, RuleStore};

const DEFAULT_LOG_FILTER: &str =
    "info,denormd=debug,denorm_coordinator=debug,denorm_rules=debug,denorm_priority=debug";

/// Buffered events per ingest worker.
const INGEST_CHANNEL_CAPACITY: usize = 1024;

#[derive(Parser)]
#[command(name = "denormd", about = "Adaptive denormalization control plane")]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane until Ctrl-C or a coordinator failure.
    Run {
        /// Path to denorm.toml.
        #[arg(long)]
        config: PathBuf,

        /// JSON-lines query event source; `-` reads stdin.
        #[arg(long)]
        events: Option<String>,

        /// Serve /metrics and /shapes on this port.
        #[arg(long)]
        metrics_port: Option<u16>,

        /// Parallel ingest workers.
        #[arg(long, default_value = "4")]
        ingest_workers: usize,
    },

    /// Validate a config file and print the effective configuration.
    Check {
        /// Path to denorm.toml.
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            events,
            metrics_port,
            ingest_workers,
        } => run(&config, events, metrics_port, ingest_workers).await,
        Command::Check { config } => check(&config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn check(path: &Path) -> anyhow::Result<()> {
    let config = DenormConfig::from_file(path)?;
    println!("{} is valid\n", path.display());
    print!("{}", config.to_toml_string()?);
    Ok(())
}

async fn run(
    config_path: &Path,
    events: Option<String>,
    metrics_port: Option<u16>,
    ingest_workers: usize,
) -> anyhow::Result<()> {
    let config = DenormConfig::from_file(config_path)?;
    info!(config = %config_path.display(), "denorm daemon starting");

    // ── Stores ─────────────────────────────────────────────────

    std::fs::create_dir_all(&config.store.data_dir)?;
    let rules_path = config.store.data_dir.join("rules.redb");
    let rules = RuleStore::open(&rules_path)?;
    info!(path = ?rules_path, "rule repository opened");

    let namespace_path = PathBuf::from(&config.coordinator.coordination_address);
    if let Some(parent) = namespace_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let namespace = NamespaceStore::open(&namespace_path)?;
    info!(path = ?namespace_path, "coordination namespace opened");

    let broker = LocalBroker::new();
    info!(
        servers = %config.broker.bootstrap_servers,
        "using in-process broker"
    );

    let telemetry = Arc::new(Telemetry::new());
    let repository: Arc<dyn RuleRepository> = Arc::new(rules.clone());
    let aggregator = PriorityAggregator::new(config.determination.reservoir_capacity);

    // ── Coordinator (provisioning failure is fatal) ────────────

    let coordinator = LifecycleCoordinator::new(
        repository.clone(),
        Arc::new(namespace),
        LifecycleSettings::from(&config.coordinator),
    );
    let provisioner =
        TopicProvisioner::new(Arc::new(broker), &config.coordinator, &config.broker);
    let coordinator = CoordinatorService::new(coordinator, provisioner, &config.coordinator)
        .with_telemetry(telemetry.clone())
        .start()
        .await
        .context("coordinator failed to start")?;

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (router, workers) =
        spawn_ingest_workers(aggregator.clone(), ingest_workers, INGEST_CHANNEL_CAPACITY);
    let reader = match events {
        Some(source) => {
            let rx = shutdown_rx.clone();
            Some(tokio::spawn(ingest_from(source, router, rx)))
        }
        None => {
            info!("no event source configured, priorities will stay empty");
            drop(router);
            None
        }
    };

    let engine = DeterminationEngine::new(
        aggregator.clone(),
        repository,
        config.determination.max_rule_capacity as usize,
    )
    .with_telemetry(telemetry.clone());
    let engine_interval = config.determination.cycle_interval;
    let engine_shutdown = shutdown_rx.clone();
    let engine_handle = tokio::spawn(async move {
        engine.run(engine_interval, engine_shutdown).await;
    });

    let server = match metrics_port {
        Some(port) => {
            let router = http::build_router(http::HttpState {
                telemetry: telemetry.clone(),
                aggregator: aggregator.clone(),
                rules: rules.clone(),
            });
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!(%addr, "metrics server listening");
            let mut rx = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = rx.wait_for(|stop| *stop).await;
                    })
                    .await
            }))
        }
        None => None,
    };

    // ── Wait for Ctrl-C or coordinator failure ─────────────────

    let mut state = coordinator.subscribe();
    let coordinator_failed = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to install Ctrl-C handler")?;
            info!("shutdown signal received");
            false
        }
        _ = state.wait_for(|s| *s == CoordinatorState::Failed) => true,
    };

    let _ = shutdown_tx.send(true);
    let coordinator_result = coordinator.shutdown().await;

    if let Some(reader) = reader {
        match reader.await {
            Ok(Ok(routed)) => info!(routed, "event ingestion stopped"),
            Ok(Err(e)) => warn!(error = %e, "event ingestion failed"),
            Err(e) => warn!(error = %e, "event reader task panicked"),
        }
    }
    for worker in workers {
        let _ = worker.await;
    }
    let _ = engine_handle.await;
    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "metrics server error"),
            Err(e) => warn!(error = %e, "metrics server task panicked"),
        }
    }

    if let Ok(counts) = rules.status_counts() {
        for (status, count) in counts {
            info!(status = status.as_str(), count, "rules at shutdown");
        }
    }

    match coordinator_result {
        Err(e) => {
            error!(error = %e, "denorm daemon stopped after coordinator failure");
            Err(e)
        }
        Ok(()) if coordinator_failed => {
            anyhow::bail!("coordinator failed")
        }
        Ok(()) => {
            info!("denorm daemon stopped");
            Ok(())
        }
    }
}

async fn ingest_from(
    source: String,
    router: IngestRouter,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<u64> {
    if source == "-" {
        info!("reading query events from stdin");
        read_events(BufReader::new(tokio::io::stdin()), &router, shutdown).await
    } else {
        let file = tokio::fs::File::open(&source)
            .await
            .with_context(|| format!("failed to open event source {source}"))?;
        info!(path = %source, "reading query events");
        read_events(BufReader::new(file), &router, shutdown).await
    }
}
