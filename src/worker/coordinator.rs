//! Worker coordinator
//!
//! Owns one worker task per running account. Each worker is fed by its own
//! unbounded channel and watched by a supervisor task that turns a panic or
//! a safety stop into `error` status without touching any other account.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::config::schema::EngineConfig;
use crate::detection::MatcherLimits;
use crate::engine::{AccountRunContext, AccountSnapshot, SharedState};
use crate::error::WorkerError;
use crate::observability::{Event, EventEmitter, metrics};
use crate::transport::{InboundMessage, Transport};
use crate::worker::runner::{Worker, WorkerExit, panic_message};
use crate::worker::status::{AccountId, AccountReport, AccountStatus};

/// Default time allowed for a worker to finish after cancellation.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Coordinator tuning.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorOptions {
    /// Time allowed for a worker to finish after cancellation
    pub shutdown_timeout: Duration,
    /// Seed for deterministic target selection; `None` uses OS entropy
    pub seed: Option<u64>,
    /// Pattern compilation limits
    pub limits: MatcherLimits,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            seed: None,
            limits: MatcherLimits::default(),
        }
    }
}

struct WorkerHandle {
    inbound: mpsc::UnboundedSender<InboundMessage>,
    cancel: CancellationToken,
    worker: AbortHandle,
    supervisor: JoinHandle<()>,
}

impl WorkerHandle {
    fn is_live(&self) -> bool {
        !self.supervisor.is_finished()
    }
}

/// Runs accounts concurrently and isolates their failures.
pub struct Coordinator {
    shared: RwLock<Arc<SharedState>>,
    workers: DashMap<AccountId, WorkerHandle>,
    reports: DashMap<AccountId, Arc<watch::Sender<AccountReport>>>,
    running: Arc<AtomicUsize>,
    transport: Arc<dyn Transport>,
    events: Arc<EventEmitter>,
    options: CoordinatorOptions,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("workers", &self.workers.len())
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Compiles `config` and creates a coordinator with no running accounts.
    ///
    /// Patterns that fail to compile are reported as `ConfigWarning` events.
    #[must_use]
    pub fn new(
        config: Arc<EngineConfig>,
        transport: Arc<dyn Transport>,
        events: Arc<EventEmitter>,
        options: CoordinatorOptions,
    ) -> Self {
        let shared = build_shared(config, &options.limits, &events);
        Self {
            shared: RwLock::new(shared),
            workers: DashMap::new(),
            reports: DashMap::new(),
            running: Arc::new(AtomicUsize::new(0)),
            transport,
            events,
            options,
        }
    }

    fn shared(&self) -> Arc<SharedState> {
        Arc::clone(&self.shared.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// The configuration future starts will use.
    #[must_use]
    pub fn config(&self) -> Arc<EngineConfig> {
        Arc::clone(&self.shared().config)
    }

    fn report_sender(&self, account: &AccountId) -> Arc<watch::Sender<AccountReport>> {
        Arc::clone(
            self.reports
                .entry(account.clone())
                .or_insert_with(|| {
                    Arc::new(watch::channel(AccountReport::stopped(account.clone())).0)
                })
                .value(),
        )
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Starts a worker for `account` with a fresh context.
    ///
    /// An account in `error` status is restarted.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::AlreadyRunning`] if the account has a live
    /// worker, or [`WorkerError::UnknownAccount`] if it is not configured.
    pub fn start_account(&self, account: &AccountId) -> Result<(), WorkerError> {
        let entry = self.workers.entry(account.clone());
        if let dashmap::mapref::entry::Entry::Occupied(existing) = &entry {
            if existing.get().is_live() {
                return Err(WorkerError::AlreadyRunning(account.clone()));
            }
        }

        let shared = self.shared();
        let snapshot = Arc::new(AccountSnapshot::resolve(&shared, account)?);
        for warning in &snapshot.warnings {
            tracing::warn!(%account, "{warning}");
            self.events.emit(Event::ConfigWarning {
                timestamp: Utc::now(),
                account: Some(account.clone()),
                message: warning.clone(),
            });
        }

        let report = self.report_sender(account);
        report.send_modify(|r| *r = AccountReport::stopped(account.clone()));
        publish_status(&report, &self.events, AccountStatus::Starting, None);

        let context = match self.options.seed {
            Some(seed) => AccountRunContext::with_seed(snapshot, account_seed(seed, account)),
            None => AccountRunContext::new(snapshot),
        };
        let (inbound, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        // published before spawning so an immediate failure is not overwritten
        publish_status(&report, &self.events, AccountStatus::Running, None);
        let worker = tokio::spawn(
            Worker {
                context,
                inbound: rx,
                cancel: cancel.clone(),
                transport: Arc::clone(&self.transport),
                events: Arc::clone(&self.events),
                report: Arc::clone(&report),
            }
            .run(),
        );
        let abort = worker.abort_handle();

        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_accounts_running(running);

        let supervisor = tokio::spawn(supervise(
            account.clone(),
            worker,
            Arc::clone(&report),
            Arc::clone(&self.events),
            Arc::clone(&self.running),
        ));

        entry.insert(WorkerHandle {
            inbound,
            cancel,
            worker: abort,
            supervisor,
        });

        tracing::info!(%account, "account started");
        Ok(())
    }

    /// Cancels the worker of `account` and waits for it to finish.
    ///
    /// Pending waits are aborted and in-flight two-step state is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::NotRunning`] if the account has no worker.
    pub async fn stop_account(&self, account: &AccountId) -> Result<(), WorkerError> {
        let (_, mut handle) = self
            .workers
            .remove(account)
            .ok_or_else(|| WorkerError::NotRunning(account.clone()))?;
        let report = self.report_sender(account);

        if handle.is_live() {
            publish_status(&report, &self.events, AccountStatus::Stopping, None);
            handle.cancel.cancel();
            if tokio::time::timeout(self.options.shutdown_timeout, &mut handle.supervisor)
                .await
                .is_err()
            {
                tracing::warn!(
                    %account,
                    timeout_ms = u64::try_from(self.options.shutdown_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                    "worker did not stop in time, aborting"
                );
                handle.worker.abort();
                let _ = handle.supervisor.await;
            }
        }

        publish_status(&report, &self.events, AccountStatus::Stopped, None);
        tracing::info!(%account, "account stopped");
        Ok(())
    }

    /// Stops `account` if it has a worker, then starts it again.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::UnknownAccount`] if the account is not configured.
    pub async fn restart_account(&self, account: &AccountId) -> Result<(), WorkerError> {
        match self.stop_account(account).await {
            Ok(()) | Err(WorkerError::NotRunning(_)) => {}
            Err(e) => return Err(e),
        }
        self.start_account(account)
    }

    /// Stops every worker concurrently.
    pub async fn shutdown(&self) {
        let accounts: Vec<AccountId> = self.workers.iter().map(|w| w.key().clone()).collect();
        tracing::info!(accounts = accounts.len(), "shutting down workers");
        futures_util::future::join_all(accounts.iter().map(|a| self.stop_account(a))).await;
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Queues `message` for `account`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::NotRunning`] if the account has no live worker.
    pub fn dispatch(&self, account: &AccountId, message: InboundMessage) -> Result<(), WorkerError> {
        let handle = self
            .workers
            .get(account)
            .ok_or_else(|| WorkerError::NotRunning(account.clone()))?;
        handle
            .inbound
            .send(message)
            .map_err(|_| WorkerError::NotRunning(account.clone()))
    }

    /// Records a connection change reported by the transport.
    ///
    /// A running account goes to `reconnecting` on loss and back to `running`
    /// when the connection returns.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::NotRunning`] if the account has no live worker.
    pub fn report_connection(&self, account: &AccountId, connected: bool) -> Result<(), WorkerError> {
        if !self.workers.get(account).is_some_and(|h| h.is_live()) {
            return Err(WorkerError::NotRunning(account.clone()));
        }
        let report = self.report_sender(account);
        let current = report.borrow().status;
        let next = match (current, connected) {
            (AccountStatus::Running, false) => AccountStatus::Reconnecting,
            (AccountStatus::Reconnecting, true) => AccountStatus::Running,
            _ => return Ok(()),
        };
        publish_status(&report, &self.events, next, None);
        Ok(())
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Current report of `account`, or `None` if the account is unknown.
    #[must_use]
    pub fn status(&self, account: &AccountId) -> Option<AccountReport> {
        if let Some(report) = self.reports.get(account) {
            return Some(report.borrow().clone());
        }
        self.shared()
            .config
            .account(account)
            .map(|_| AccountReport::stopped(account.clone()))
    }

    /// Reports of every configured account in configuration order, followed
    /// by accounts that only exist in an earlier configuration.
    #[must_use]
    pub fn statuses(&self) -> Vec<AccountReport> {
        let config = self.config();
        let mut reports: Vec<AccountReport> = config
            .accounts
            .iter()
            .filter_map(|a| self.status(&a.id))
            .collect();
        let mut stale: Vec<AccountReport> = self
            .reports
            .iter()
            .filter(|r| config.account(r.key()).is_none())
            .map(|r| r.value().borrow().clone())
            .collect();
        stale.sort_by(|a, b| a.account.cmp(&b.account));
        reports.extend(stale);
        reports
    }

    /// Watches the report of `account`.
    #[must_use]
    pub fn subscribe(&self, account: &AccountId) -> watch::Receiver<AccountReport> {
        self.report_sender(account).subscribe()
    }

    /// Number of accounts with a live worker.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Replaces the configuration used by future starts.
    ///
    /// Running workers keep the snapshot they started with.
    pub fn replace_config(&self, config: Arc<EngineConfig>) {
        let shared = build_shared(config, &self.options.limits, &self.events);
        *self.shared.write().unwrap_or_else(PoisonError::into_inner) = shared;
        tracing::info!("configuration replaced; applies to future starts");
    }
}

fn build_shared(
    config: Arc<EngineConfig>,
    limits: &MatcherLimits,
    events: &EventEmitter,
) -> Arc<SharedState> {
    let shared = SharedState::build(config, limits);
    for warning in shared.compile_warnings() {
        events.emit(Event::ConfigWarning {
            timestamp: Utc::now(),
            account: None,
            message: warning.to_string(),
        });
    }
    Arc::new(shared)
}

fn publish_status(
    report: &watch::Sender<AccountReport>,
    events: &EventEmitter,
    status: AccountStatus,
    reason: Option<String>,
) {
    let account = report.borrow().account.clone();
    report.send_modify(|r| {
        r.status = status;
        r.reason.clone_from(&reason);
    });
    events.emit(Event::AccountStatusChanged {
        timestamp: Utc::now(),
        account,
        status,
        reason,
    });
}

async fn supervise(
    account: AccountId,
    worker: JoinHandle<WorkerExit>,
    report: Arc<watch::Sender<AccountReport>>,
    events: Arc<EventEmitter>,
    running: Arc<AtomicUsize>,
) {
    let exit = match worker.await {
        Ok(exit) => exit,
        Err(e) if e.is_panic() => WorkerExit::Panicked(panic_message(e.into_panic().as_ref())),
        Err(_) => WorkerExit::Cancelled,
    };

    let remaining = running.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
    metrics::set_accounts_running(remaining);

    match exit {
        WorkerExit::Cancelled => {}
        WorkerExit::InboundClosed => {
            tracing::info!(%account, "inbound channel closed");
            publish_status(
                &report,
                &events,
                AccountStatus::Stopped,
                Some("inbound closed".to_owned()),
            );
        }
        WorkerExit::JoinAbandoned(reason) => {
            metrics::record_worker_failure("join_abandoned");
            publish_status(
                &report,
                &events,
                AccountStatus::Error,
                Some(format!("join abandoned: {reason}")),
            );
        }
        WorkerExit::Panicked(message) => {
            tracing::error!(%account, panic = %message, "account worker panicked");
            metrics::record_worker_failure("panic");
            publish_status(
                &report,
                &events,
                AccountStatus::Error,
                Some(format!("worker panicked: {message}")),
            );
        }
    }
}

/// Derives a per-account seed so accounts do not share a random sequence.
fn account_seed(seed: u64, account: &AccountId) -> u64 {
    account
        .as_str()
        .bytes()
        .fold(seed ^ 0xcbf2_9ce4_8422_2325, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;

    const CONFIG: &str = r#"
moderators: [777]
phase_patterns:
  - { phase: join_confirmation, text: "you joined" }
actions:
  - name: vote
    button: player_list
    patterns: [{ text: "vote now" }]
    targets: { priority_list: [alice] }
accounts:
  - id: main
  - id: alt
"#;

    fn coordinator() -> (
        Coordinator,
        mpsc::UnboundedReceiver<crate::transport::OutboundCommand>,
    ) {
        let config: EngineConfig = serde_yaml::from_str(CONFIG).unwrap();
        let (transport, rx) = ChannelTransport::new();
        let coordinator = Coordinator::new(
            Arc::new(config),
            Arc::new(transport),
            Arc::new(EventEmitter::noop()),
            CoordinatorOptions {
                seed: Some(1),
                ..CoordinatorOptions::default()
            },
        );
        (coordinator, rx)
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let (coordinator, _rx) = coordinator();
        let main = AccountId::new("main");
        coordinator.start_account(&main).unwrap();
        assert!(matches!(
            coordinator.start_account(&main),
            Err(WorkerError::AlreadyRunning(_))
        ));
        assert_eq!(coordinator.running_count(), 1);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let (coordinator, _rx) = coordinator();
        let ghost = AccountId::new("ghost");
        assert!(matches!(
            coordinator.start_account(&ghost),
            Err(WorkerError::UnknownAccount(_))
        ));
        assert!(coordinator.status(&ghost).is_none());
        assert!(matches!(
            coordinator.dispatch(&ghost, InboundMessage::new(777, "hi")),
            Err(WorkerError::NotRunning(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_and_stop() {
        let (coordinator, mut rx) = coordinator();
        let main = AccountId::new("main");
        coordinator.start_account(&main).unwrap();
        assert_eq!(
            coordinator.status(&main).unwrap().status,
            AccountStatus::Running
        );

        coordinator
            .dispatch(
                &main,
                InboundMessage::new(777, "vote now").with_buttons(["alice", "bob"]),
            )
            .unwrap();
        let sent = rx.recv().await.unwrap();
        assert_eq!(sent.account, main);
        assert_eq!(sent.command.payload(), "alice");

        coordinator.stop_account(&main).await.unwrap();
        assert_eq!(
            coordinator.status(&main).unwrap().status,
            AccountStatus::Stopped
        );
        assert_eq!(coordinator.running_count(), 0);
        assert!(matches!(
            coordinator.stop_account(&main).await,
            Err(WorkerError::NotRunning(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_reports() {
        let (coordinator, _rx) = coordinator();
        let main = AccountId::new("main");
        assert!(coordinator.report_connection(&main, false).is_err());

        coordinator.start_account(&main).unwrap();
        coordinator.report_connection(&main, false).unwrap();
        assert_eq!(
            coordinator.status(&main).unwrap().status,
            AccountStatus::Reconnecting
        );
        coordinator.report_connection(&main, true).unwrap();
        assert_eq!(
            coordinator.status(&main).unwrap().status,
            AccountStatus::Running
        );
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_statuses_in_config_order() {
        let (coordinator, _rx) = coordinator();
        coordinator.start_account(&AccountId::new("alt")).unwrap();
        let statuses = coordinator.statuses();
        let ids: Vec<&str> = statuses.iter().map(|r| r.account.as_str()).collect();
        assert_eq!(ids, ["main", "alt"]);
        assert_eq!(statuses[0].status, AccountStatus::Stopped);
        assert_eq!(statuses[1].status, AccountStatus::Running);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_replace_config_applies_to_future_starts() {
        let (coordinator, _rx) = coordinator();
        let mut config: EngineConfig = serde_yaml::from_str(CONFIG).unwrap();
        config.accounts.retain(|a| a.id.as_str() == "main");
        coordinator.replace_config(Arc::new(config));

        assert!(matches!(
            coordinator.start_account(&AccountId::new("alt")),
            Err(WorkerError::UnknownAccount(_))
        ));
        assert_eq!(coordinator.statuses().len(), 1);
    }

    #[test]
    fn test_account_seed_differs_per_account() {
        let a = account_seed(1, &AccountId::new("main"));
        let b = account_seed(1, &AccountId::new("alt"));
        assert_ne!(a, b);
        assert_eq!(a, account_seed(1, &AccountId::new("main")));
    }
}
