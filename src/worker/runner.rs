//! Account worker loop
//!
//! One task per running account. The task is the only owner of the
//! account's [`AccountRunContext`]; messages are consumed strictly in arrival
//! order, and the only suspension points are the join retry timer and the
//! per-action delay.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::engine::{AccountRunContext, ActionDecision, JoinOutcome, Outcome};
use crate::error::ResolutionError;
use crate::join::AbandonReason;
use crate::observability::{Event, EventEmitter, metrics};
use crate::phase::{Phase, PhaseOutcome};
use crate::transport::{InboundMessage, Transport, sanitize_for_log};
use crate::worker::status::{AccountId, AccountReport};

/// Maximum characters of message text included in logs.
const LOG_TEXT_LEN: usize = 120;

/// Why a worker loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// The account was stopped.
    Cancelled,
    /// The inbound channel closed.
    InboundClosed,
    /// The join policy gave up; a restart is required.
    JoinAbandoned(AbandonReason),
    /// Evaluation panicked.
    Panicked(String),
}

/// Everything a worker task owns.
pub struct Worker {
    /// Per-account engine state
    pub context: AccountRunContext,
    /// Messages for this account
    pub inbound: mpsc::UnboundedReceiver<InboundMessage>,
    /// Cancelled when the account is stopped
    pub cancel: CancellationToken,
    /// Outbound commands
    pub transport: Arc<dyn Transport>,
    /// Event sink
    pub events: Arc<EventEmitter>,
    /// Published account report
    pub report: Arc<watch::Sender<AccountReport>>,
}

enum Flow {
    Continue,
    Stop(WorkerExit),
}

impl Worker {
    fn account(&self) -> &AccountId {
        &self.context.snapshot().account
    }

    /// Runs until cancelled, the inbound channel closes, evaluation panics,
    /// or joining is abandoned.
    pub async fn run(mut self) -> WorkerExit {
        let mut retry_at: Option<Instant> = None;

        loop {
            let outcomes = tokio::select! {
                biased;

                () = self.cancel.cancelled() => return WorkerExit::Cancelled,

                () = wait_until(retry_at) => {
                    retry_at = None;
                    self.context.retry_join(Instant::now()).into_iter().collect()
                }

                message = self.inbound.recv() => {
                    let Some(message) = message else {
                        return WorkerExit::InboundClosed;
                    };
                    metrics::record_message(self.account());
                    tracing::trace!(
                        account = %self.account(),
                        sender = message.sender_id,
                        text = %sanitize_for_log(&message.text, LOG_TEXT_LEN),
                        "message received"
                    );
                    let now = Instant::now();
                    let context = &mut self.context;
                    match guarded(|| context.process(&message, now)) {
                        Ok(outcomes) => outcomes,
                        Err(reason) => return WorkerExit::Panicked(reason),
                    }
                }
            };

            for outcome in outcomes {
                if let Flow::Stop(exit) = self.handle(outcome, &mut retry_at).await {
                    self.publish_progress();
                    return exit;
                }
            }
            self.publish_progress();
        }
    }

    async fn handle(&mut self, outcome: Outcome, retry_at: &mut Option<Instant>) -> Flow {
        match outcome {
            Outcome::BanWarning { pattern } => {
                tracing::warn!(account = %self.account(), %pattern, "ban warning detected");
                metrics::record_ban_warning(self.account());
                self.events.emit(Event::BanWarningDetected {
                    timestamp: Utc::now(),
                    account: self.account().clone(),
                    pattern,
                });
                Flow::Continue
            }
            Outcome::Phase(phase) => {
                self.on_phase(phase, retry_at);
                Flow::Continue
            }
            Outcome::Join(join) => self.on_join(join, retry_at).await,
            Outcome::Action(decision) => self.on_action(decision).await,
            Outcome::Unresolved {
                action,
                step,
                error,
            } => {
                tracing::info!(
                    account = %self.account(),
                    %action,
                    step = step.number(),
                    %error,
                    "prompt left unanswered"
                );
                let event = match error {
                    ResolutionError::NoEligibleTarget => {
                        metrics::record_resolution_failure("no_eligible_target");
                        Event::NoEligibleTarget {
                            timestamp: Utc::now(),
                            account: self.account().clone(),
                            action,
                            step: step.number(),
                        }
                    }
                    ResolutionError::NoActivePair => {
                        metrics::record_resolution_failure("no_active_pair");
                        Event::NoActivePair {
                            timestamp: Utc::now(),
                            account: self.account().clone(),
                            action,
                        }
                    }
                };
                self.events.emit(event);
                Flow::Continue
            }
        }
    }

    fn on_phase(&self, outcome: PhaseOutcome, retry_at: &mut Option<Instant>) {
        match outcome {
            PhaseOutcome::Entered { from, to } => {
                tracing::info!(account = %self.account(), %from, %to, "phase changed");
                metrics::record_phase_transition(self.account(), from, to);
                self.events.emit(Event::PhaseChanged {
                    timestamp: Utc::now(),
                    account: self.account().clone(),
                    from,
                    to,
                });
                if to != Phase::JoinTime {
                    *retry_at = None;
                }
            }
            PhaseOutcome::Rejected { current, matched } => {
                metrics::record_rejected_transition(current, matched);
            }
            PhaseOutcome::Reaffirmed(_) => {}
        }
    }

    async fn on_join(&mut self, outcome: JoinOutcome, retry_at: &mut Option<Instant>) -> Flow {
        match outcome {
            JoinOutcome::Attempt {
                attempt,
                max_attempts,
                command,
            } => {
                metrics::record_join_attempt(self.account());
                let sent = match &command {
                    Some(command) => {
                        tracing::info!(
                            account = %self.account(),
                            attempt,
                            max_attempts,
                            "joining game"
                        );
                        match self.transport.execute(self.account(), command).await {
                            Ok(()) => true,
                            Err(e) => {
                                tracing::warn!(account = %self.account(), error = %e, "join command failed");
                                metrics::record_transport_error();
                                false
                            }
                        }
                    }
                    None => {
                        tracing::warn!(
                            account = %self.account(),
                            attempt,
                            "no join affordance in message, attempt counted"
                        );
                        false
                    }
                };
                self.events.emit(Event::JoinAttempted {
                    timestamp: Utc::now(),
                    account: self.account().clone(),
                    attempt,
                    max_attempts,
                    sent,
                });
                Flow::Continue
            }
            JoinOutcome::Cooldown(remaining) => {
                tracing::debug!(
                    account = %self.account(),
                    remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
                    "join on cooldown, retry scheduled"
                );
                // past the clock's range the retry never fires
                if let Some(at) = Instant::now().checked_add(remaining) {
                    retry_at.get_or_insert(at);
                }
                Flow::Continue
            }
            JoinOutcome::Abandoned(reason) => {
                tracing::warn!(account = %self.account(), %reason, "join abandoned");
                self.events.emit(Event::JoinAbandoned {
                    timestamp: Utc::now(),
                    account: self.account().clone(),
                    reason: reason.to_string(),
                });
                Flow::Stop(WorkerExit::JoinAbandoned(reason))
            }
        }
    }

    async fn on_action(&mut self, decision: ActionDecision) -> Flow {
        if !decision.delay.is_zero() {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::debug!(
                        account = %self.account(),
                        action = %decision.name,
                        "stopped during action delay, decision dropped"
                    );
                    return Flow::Stop(WorkerExit::Cancelled);
                }
                () = tokio::time::sleep(decision.delay) => {}
            }
        }

        let account = self.account().clone();
        match self.transport.execute(&account, &decision.command).await {
            Ok(()) => {
                if let Some(pair) = decision.pending {
                    self.context
                        .commit_pending(decision.action, pair, Instant::now());
                }
                tracing::info!(
                    %account,
                    action = %decision.name,
                    step = decision.step.number(),
                    command = decision.command.kind(),
                    choice = %sanitize_for_log(decision.command.payload(), LOG_TEXT_LEN),
                    "action taken"
                );
                metrics::record_decision(&account, decision.command.kind(), decision.delay);
                self.events.emit(Event::ActionTaken {
                    timestamp: Utc::now(),
                    account,
                    action: decision.name,
                    step: decision.step.number(),
                    command: decision.command.kind().to_owned(),
                    choice: decision.command.payload().to_owned(),
                });
            }
            Err(e) => {
                tracing::warn!(
                    %account,
                    action = %decision.name,
                    error = %e,
                    "transport rejected action command"
                );
                metrics::record_transport_error();
            }
        }
        Flow::Continue
    }

    fn publish_progress(&self) {
        let phase = self.context.phase();
        let policy = self.context.join_policy();
        let attempts = policy.attempts();
        let abandoned = policy.abandoned().is_some();
        let processed = self.context.processed();
        self.report.send_modify(|report| {
            report.phase = Some(phase);
            report.join_attempts = attempts;
            report.join_abandoned = abandoned;
            report.messages_processed = processed;
        });
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Runs `f`, turning a panic into its message.
fn guarded<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::config::schema::EngineConfig;
    use crate::detection::MatcherLimits;
    use crate::engine::{AccountSnapshot, SharedState};
    use crate::transport::{ChannelTransport, Command, OutboundCommand};

    const MODERATOR: i64 = 777;

    const CONFIG: &str = r#"
moderators: [777]
join:
  max_attempts: 2
  cooldown_seconds: 60
phase_patterns:
  - { phase: join_time, text: "registration open" }
  - { phase: join_confirmation, text: "you joined" }
  - { phase: game_end, text: "game over" }
actions:
  - name: vote
    button: player_list
    patterns: [{ text: "vote now" }]
    targets: { priority_list: [alice] }
accounts: [{ id: main }]
"#;

    struct Harness {
        inbound: mpsc::UnboundedSender<InboundMessage>,
        outbound: UnboundedReceiver<OutboundCommand>,
        cancel: CancellationToken,
        report: watch::Receiver<AccountReport>,
        events: Arc<EventEmitter>,
        task: tokio::task::JoinHandle<WorkerExit>,
    }

    fn spawn() -> Harness {
        spawn_with(CONFIG)
    }

    fn spawn_with(yaml: &str) -> Harness {
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        let shared = Arc::new(SharedState::build(
            Arc::new(config),
            &MatcherLimits::default(),
        ));
        let account = AccountId::new("main");
        let snapshot = Arc::new(AccountSnapshot::resolve(&shared, &account).unwrap());
        let (transport, outbound) = ChannelTransport::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let (report_tx, report) = watch::channel(AccountReport::stopped(account));
        let events = Arc::new(EventEmitter::noop());
        let cancel = CancellationToken::new();
        let worker = Worker {
            context: AccountRunContext::with_seed(snapshot, 7),
            inbound: rx,
            cancel: cancel.clone(),
            transport: Arc::new(transport),
            events: Arc::clone(&events),
            report: Arc::new(report_tx),
        };
        Harness {
            inbound: tx,
            outbound,
            cancel,
            report,
            events,
            task: tokio::spawn(worker.run()),
        }
    }

    fn msg(text: &str) -> InboundMessage {
        InboundMessage::new(MODERATOR, text)
    }

    #[tokio::test]
    async fn test_action_sent_and_progress_published() {
        let mut h = spawn();
        h.inbound
            .send(msg("vote now").with_buttons(["bob", "alice"]))
            .unwrap();

        let sent = h.outbound.recv().await.unwrap();
        assert_eq!(
            sent.command,
            Command::Click {
                choice: "alice".to_string()
            }
        );

        h.report
            .wait_for(|r| r.messages_processed == 1)
            .await
            .unwrap();
        h.cancel.cancel();
        assert_eq!(h.task.await.unwrap(), WorkerExit::Cancelled);
        assert!(h.events.event_count() >= 1);
    }

    #[tokio::test]
    async fn test_inbound_closed_ends_worker() {
        let h = spawn();
        drop(h.inbound);
        assert_eq!(h.task.await.unwrap(), WorkerExit::InboundClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_retry_then_abandon() {
        let mut h = spawn();
        h.inbound
            .send(msg("registration open").with_join_token("abc"))
            .unwrap();
        let first = h.outbound.recv().await.unwrap();
        assert_eq!(
            first.command,
            Command::Text {
                text: "/start abc".to_string()
            }
        );

        // reaffirmation inside the cooldown schedules a retry
        h.inbound.send(msg("registration open")).unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        let second = h.outbound.recv().await.unwrap();
        assert_eq!(second.command.payload(), "/start abc");

        tokio::time::sleep(Duration::from_secs(61)).await;
        h.inbound.send(msg("registration open")).unwrap();
        assert!(matches!(
            h.task.await.unwrap(),
            WorkerExit::JoinAbandoned(AbandonReason::AttemptsExhausted { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_cancels_retry() {
        let mut h = spawn();
        h.inbound.send(msg("registration open")).unwrap();
        h.inbound.send(msg("registration open")).unwrap();
        h.inbound.send(msg("you joined")).unwrap();
        h.report
            .wait_for(|r| r.phase == Some(Phase::JoinConfirmation))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        // no token was offered and the scheduled retry was dropped
        assert!(h.outbound.try_recv().is_err());
        assert_eq!(h.report.borrow().join_attempts, 1);
        h.cancel.cancel();
        assert_eq!(h.task.await.unwrap(), WorkerExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_cooldown_keeps_worker_alive() {
        let mut h = spawn_with(&CONFIG.replace("cooldown_seconds: 60", "cooldown_seconds: 1.0e19"));
        h.inbound
            .send(msg("registration open").with_join_token("abc"))
            .unwrap();
        assert_eq!(h.outbound.recv().await.unwrap().command.payload(), "/start abc");

        h.inbound.send(msg("registration open")).unwrap();
        h.report
            .wait_for(|r| r.messages_processed == 2)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(h.outbound.try_recv().is_err());
        assert_eq!(h.report.borrow().join_attempts, 1);
        assert!(!h.task.is_finished());

        h.cancel.cancel();
        assert_eq!(h.task.await.unwrap(), WorkerExit::Cancelled);
    }

    #[test]
    fn test_guarded_reports_panic_message() {
        assert_eq!(guarded(|| 5), Ok(5));
        let caught = guarded(|| -> u8 { panic!("evaluation blew up") });
        assert_eq!(caught, Err("evaluation blew up".to_string()));

        let caught = guarded(|| -> u8 { panic!("bad target {}", 3) });
        assert_eq!(caught, Err("bad target 3".to_string()));
    }

    #[test]
    fn test_panic_message_payloads() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
