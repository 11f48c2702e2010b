//! Ethereum address watcher service
//!
//! Connects to the stores, the node and the broker, loads the watched
//! addresses, then runs the status endpoint and the monitoring orchestrator
//! side by side until a signal arrives or either task fails.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vigil::cache::RedisCache;
use vigil::config::Config;
use vigil::logging;
use vigil::publisher::KafkaPublisher;
use vigil::registry::AddressRegistry;
use vigil::rpc::AlloyLedger;
use vigil::status::{self, AppState};
use vigil::watcher::{is_cancelled, Watcher};

type TaskResult = (&'static str, Result<()>);

#[tokio::main]
async fn main() {
    let config = Config::parse();
    logging::init();

    match run(config).await {
        Ok(()) => info!("Watcher stopped"),
        Err(e) => {
            error!(error = ?e, "Watcher failed");
            std::process::exit(1);
        }
    }
}

async fn run(config: Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    info!(
        instance_id = %config.instance_id,
        rpc_url = %config.eth_rpc_url,
        chain_id = config.eth_chain_id,
        topic = %config.kafka_topic,
        backend = ?config.store.checkpoint_backend,
        "Starting Ethereum address watcher"
    );

    let cancel = CancellationToken::new();

    let pg = config.store.connect_postgres().await?;
    let cache = RedisCache::connect(&config.store.redis_url).await?;
    let keepalive = cache.spawn_keepalive(cancel.child_token());
    let ledger = AlloyLedger::connect(&config.eth_rpc_url, config.eth_chain_id).await?;
    let publisher = KafkaPublisher::connect(
        config.brokers(),
        config.kafka_topic.clone(),
        config.kafka_client_id.clone(),
    )?;

    let registry = Arc::new(AddressRegistry::connect(Arc::new(pg.clone()), Arc::new(cache)).await?);
    let checkpoints = config.store.checkpoint_store(Some(&pg)).await?;

    let watcher = Arc::new(Watcher::new(
        config.instance_id.clone(),
        config.eth_chain_id,
        registry.clone(),
        checkpoints.clone(),
        Arc::new(ledger),
        Arc::new(publisher),
    ));
    let state = AppState {
        instance_id: config.instance_id.clone(),
        registry,
        checkpoints,
        phase: watcher.phase(),
    };

    tokio::spawn(shutdown_signal(cancel.clone()));

    let mut tasks: JoinSet<TaskResult> = JoinSet::new();
    {
        let cancel = cancel.clone();
        let addr = config.http_address;
        let drain = config.http_drain();
        tasks.spawn(async move { ("status", status::serve(addr, state, cancel, drain).await) });
    }
    {
        let cancel = cancel.clone();
        tasks.spawn(async move { ("watcher", watcher.run(cancel).await) });
    }

    // First task to finish, for any reason, stops the other
    let mut outcome = Ok(());
    if let Some(joined) = tasks.join_next().await {
        record(&mut outcome, joined);
    }
    cancel.cancel();

    let drain = async {
        while let Some(joined) = tasks.join_next().await {
            record(&mut outcome, joined);
        }
    };
    if tokio::time::timeout(config.shutdown_timeout(), drain)
        .await
        .is_err()
    {
        warn!(
            timeout_secs = config.shutdown_timeout_secs,
            "Shutdown timed out, aborting remaining tasks"
        );
        tasks.abort_all();
    }

    if let Err(e) = keepalive.await {
        warn!(error = ?e, "Redis keep-alive task failed");
    }

    outcome
}

/// Keep the first real failure; cancellation is a clean stop.
fn record(outcome: &mut Result<()>, joined: std::result::Result<TaskResult, JoinError>) {
    let failure = match joined {
        Ok((name, Ok(()))) => {
            info!(task = name, "Task finished");
            None
        }
        Ok((name, Err(e))) if is_cancelled(&e) => {
            info!(task = name, "Task cancelled");
            None
        }
        Ok((name, Err(e))) => Some(e.context(format!("{} task failed", name))),
        Err(e) => Some(anyhow!("Task panicked: {}", e)),
    };

    if let Some(e) = failure {
        if outcome.is_ok() {
            *outcome = Err(e);
        } else {
            error!(error = ?e, "Additional task failure during shutdown");
        }
    }
}

/// Cancel `cancel` on SIGINT or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = ?e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = ?e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down gracefully..."),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully..."),
        _ = cancel.cancelled() => return,
    }
    cancel.cancel();
}
