//! `run` command handler
//!
//! Loads the configuration, starts the selected accounts and feeds the
//! NDJSON bridge on stdin into them until EOF or a shutdown signal.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cli::args::RunArgs;
use crate::config::loader::{ConfigLoader, LoadWarning};
use crate::config::schema::EngineConfig;
use crate::error::{PhaseKeeperError, WorkerError};
use crate::observability::EventEmitter;
use crate::transport::stdio::{BridgeReader, StdioBridge, pump};
use crate::transport::Transport;
use crate::worker::{AccountId, Coordinator, CoordinatorOptions};

/// Run the configured accounts against the stdio bridge.
///
/// # Errors
///
/// Returns a config error if loading fails, a worker error if an
/// `--account` is not configured, or an I/O error if the event file or the
/// bridge input fails.
pub async fn run(args: &RunArgs, cancel: CancellationToken) -> Result<(), PhaseKeeperError> {
    if let Some(port) = args.metrics_port {
        crate::observability::init_metrics(Some(port))?;
        tracing::info!(port, "Prometheus metrics endpoint started");
    }

    tracing::info!(config = %args.config.display(), "loading configuration");
    let loader = ConfigLoader::with_defaults();
    let load_result = loader.load(&args.config)?;
    log_warnings(&load_result.warnings);
    let config = load_result.config;

    let accounts = select_accounts(&config, &args.accounts)?;
    if accounts.is_empty() {
        tracing::warn!("no enabled accounts; nothing to run");
    }

    let events = Arc::new(match args.events_file {
        Some(ref path) => EventEmitter::from_file(path)?,
        None => EventEmitter::stderr(),
    });
    let transport: Arc<dyn Transport> = Arc::new(StdioBridge::stdout());
    let options = CoordinatorOptions {
        seed: args.seed,
        limits: loader.limits().matcher_limits(),
        ..CoordinatorOptions::default()
    };
    let coordinator = Coordinator::new(config, transport, events, options);

    for account in &accounts {
        coordinator.start_account(account)?;
    }
    tracing::info!(accounts = accounts.len(), "accounts started");

    let mut reader = BridgeReader::stdin();
    let pumped = pump(&mut reader, &coordinator, &cancel).await;

    coordinator.shutdown().await;
    let inputs = pumped?;
    tracing::info!(inputs, "run finished");
    Ok(())
}

fn log_warnings(warnings: &[LoadWarning]) {
    for warning in warnings {
        tracing::warn!(
            location = warning.location.as_deref().unwrap_or("<unknown>"),
            "{}",
            warning.message
        );
    }
}

/// Resolves `--account` values against the configuration.
///
/// With no explicit accounts, every enabled account is selected.
fn select_accounts(
    config: &EngineConfig,
    requested: &[String],
) -> Result<Vec<AccountId>, WorkerError> {
    if requested.is_empty() {
        return Ok(config
            .accounts
            .iter()
            .filter(|a| a.enabled)
            .map(|a| a.id.clone())
            .collect());
    }

    let mut selected: Vec<AccountId> = Vec::with_capacity(requested.len());
    for id in requested {
        let id = AccountId::new(id.as_str());
        if config.account(&id).is_none() {
            return Err(WorkerError::UnknownAccount(id));
        }
        if !selected.contains(&id) {
            selected.push(id);
        }
    }
    Ok(selected)
}
