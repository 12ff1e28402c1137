//! Memento Server - knowledge/memory store for coding agents.
//!
//! Serves line-delimited JSON-RPC 2.0 over stdio and owns the process
//! timers: the enrichment worker pool, the decay updater and the backup
//! scheduler. Logging goes to stderr because stdout carries the protocol.

mod methods;
mod protocol;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use memento_core::llm::{BreakerConfig, CircuitBreaker, HttpLlmClient, LlmClient};
use memento_core::{
    BackupConfig, BackupService, Config, MigrationManager, Pipeline, SearchEngine, SqliteStore,
};

use crate::protocol::stdio::StdioTransport;
use crate::server::{AppContext, RpcServer};

/// Memento JSON-RPC server.
#[derive(Debug, Parser)]
#[command(name = "memento-server", version, about)]
struct Args {
    /// Custom data directory for the database file
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// External migration directory (defaults to the embedded schema)
    #[arg(long)]
    migrations_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // stderr only; stdout is the JSON-RPC channel.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    info!("memento-server v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env().context("resolving configuration")?;
    if args.data_dir.is_some() {
        config.db_path = args.data_dir.clone().map(|d| d.join("memento.db"));
    }
    if args.migrations_dir.is_some() {
        config.migrations_dir = args.migrations_dir.clone();
    }

    // Storage engine.
    let migrations = match &config.migrations_dir {
        Some(dir) => MigrationManager::from_dir(dir)
            .with_context(|| format!("loading migrations from {}", dir.display()))?,
        None => MigrationManager::builtin(),
    };
    let store = Arc::new(
        SqliteStore::open_with_migrations(config.db_path.clone(), &migrations)
            .context("opening storage")?,
    );
    info!(path = %store.path().display(), "storage ready");

    // LLM client behind the circuit breaker.
    let http_client = Arc::new(HttpLlmClient::new(config.llm.clone()));
    let llm: Arc<dyn LlmClient> = Arc::new(CircuitBreaker::new(
        http_client,
        BreakerConfig::default(),
    ));
    match llm.health_check(std::time::Duration::from_secs(2)).await {
        Ok(()) => info!(url = %config.llm.base_url, "llm server reachable"),
        Err(err) => warn!(
            url = %config.llm.base_url,
            error = %err,
            "llm server unreachable, enrichment will retry"
        ),
    }

    // Enrichment pipeline with crash recovery.
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&store),
        Arc::clone(&llm),
        config.pipeline.clone(),
    ));
    pipeline.start().await.context("starting pipeline")?;
    info!(
        workers = config.pipeline.num_workers,
        queue = config.pipeline.queue_size,
        "enrichment pipeline running"
    );

    let search = Arc::new(SearchEngine::new(
        Arc::clone(&store),
        Some(Arc::clone(&llm)),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Decay timer. The last-run stamp persists in settings so restarts
    // don't double-apply decay.
    {
        let store = Arc::clone(&store);
        let half_life = config.decay_half_life_days;
        let interval = config.decay_interval;
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                let due = match store.get_setting("decay.last_run") {
                    Ok(Some(stamp)) => chrono::DateTime::parse_from_rfc3339(&stamp)
                        .map(|last| {
                            chrono::Utc::now().signed_duration_since(last)
                                > chrono::Duration::from_std(interval)
                                    .unwrap_or_else(|_| chrono::Duration::hours(6))
                        })
                        .unwrap_or(true),
                    Ok(None) => true,
                    Err(err) => {
                        warn!(error = %err, "could not read decay stamp, running anyway");
                        true
                    }
                };

                if due {
                    match store.update_decay_scores(half_life) {
                        Ok(updated) => {
                            info!(updated, "decay scores updated");
                            let _ = store
                                .set_setting("decay.last_run", &chrono::Utc::now().to_rfc3339());
                        }
                        Err(err) => warn!(error = %err, "decay update failed"),
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    // Backup scheduler.
    if config.backup_enabled {
        let backup_dir = config.backup_dir.clone().unwrap_or_else(|| {
            store
                .path()
                .parent()
                .map(|p| p.join("backups"))
                .unwrap_or_else(|| PathBuf::from("backups"))
        });
        let backup = Arc::new(BackupService::new(
            Arc::clone(&store),
            BackupConfig {
                backup_dir,
                interval: config.backup_interval,
                verify_backups: config.verify_backups,
                retention: config.retention.clone(),
            },
        ));
        info!(
            dir = %backup.config().backup_dir.display(),
            interval_secs = config.backup_interval.as_secs(),
            "backup scheduler running"
        );
        tokio::spawn(Arc::clone(&backup).start(shutdown_rx.clone()));
    }

    // Serve until stdin closes.
    let rpc = RpcServer::new(AppContext {
        store: Arc::clone(&store),
        pipeline: Arc::clone(&pipeline),
        search,
        llm: Some(Arc::clone(&llm)),
        llm_deadline: config.pipeline.llm_deadline,
    });
    info!("serving JSON-RPC on stdio");
    if let Err(err) = StdioTransport::new().run(rpc).await {
        error!(error = %err, "transport error");
    }

    // Two-phase shutdown: stop timers, then drain the worker pool.
    let _ = shutdown_tx.send(true);
    pipeline.shutdown().await;
    info!("memento-server stopped");
    Ok(())
}
