//! Per-account run context
//!
//! Owns the phase machine, the join policy and the pending two-step pair of
//! one account. Processing order for every message:
//!
//! 1. moderator filter
//! 2. ban-warning interrupt
//! 3. phase marker and its side effects
//! 4. action trigger

use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::time::Instant;

use crate::config::schema::SendAs;
use crate::detection::{ActionTrigger, Step};
use crate::engine::outcome::{ActionDecision, JoinOutcome, Outcome};
use crate::engine::snapshot::{AccountSnapshot, ResolvedButton};
use crate::error::ResolutionError;
use crate::join::{JoinDecision, JoinPolicy};
use crate::phase::{Phase, PhaseMachine, PhaseOutcome};
use crate::targeting::{
    PendingPair, TwoStepPlan, resolve, resolve_two_step, select_fixed, select_yes_no,
};
use crate::transport::{Command, InboundMessage};

#[derive(Debug, Clone)]
struct PendingStep {
    action: usize,
    pair: PendingPair,
    committed_at: Instant,
}

/// Mutable state of one running account.
#[derive(Debug)]
pub struct AccountRunContext {
    snapshot: Arc<AccountSnapshot>,
    phase: PhaseMachine,
    join: JoinPolicy,
    pending: Option<PendingStep>,
    last_join_token: Option<String>,
    rng: StdRng,
    processed: u64,
}

impl AccountRunContext {
    /// Creates a fresh context seeded from the OS.
    #[must_use]
    pub fn new(snapshot: Arc<AccountSnapshot>) -> Self {
        Self::with_rng(snapshot, StdRng::from_os_rng())
    }

    /// Creates a fresh context with a deterministic random source.
    #[must_use]
    pub fn with_seed(snapshot: Arc<AccountSnapshot>, seed: u64) -> Self {
        Self::with_rng(snapshot, StdRng::seed_from_u64(seed))
    }

    fn with_rng(snapshot: Arc<AccountSnapshot>, rng: StdRng) -> Self {
        let phase = PhaseMachine::new(Arc::clone(&snapshot.shared.transitions));
        let join = JoinPolicy::new(
            snapshot.join,
            Arc::clone(&snapshot.shared.catalog.ban_warnings),
        );
        Self {
            snapshot,
            phase,
            join,
            pending: None,
            last_join_token: None,
            rng,
            processed: 0,
        }
    }

    /// The snapshot this context runs on.
    #[must_use]
    pub const fn snapshot(&self) -> &Arc<AccountSnapshot> {
        &self.snapshot
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase.current()
    }

    /// The join policy state.
    #[must_use]
    pub const fn join_policy(&self) -> &JoinPolicy {
        &self.join
    }

    /// Messages offered to [`process`](Self::process), moderator or not.
    #[must_use]
    pub const fn processed(&self) -> u64 {
        self.processed
    }

    /// The pending two-step pair, if one is live at `now`.
    #[must_use]
    pub fn pending_pair(&self, now: Instant) -> Option<&PendingPair> {
        self.pending
            .as_ref()
            .filter(|p| !self.is_expired(p, now))
            .map(|p| &p.pair)
    }

    /// Evaluates one inbound message.
    pub fn process(&mut self, message: &InboundMessage, now: Instant) -> Vec<Outcome> {
        self.processed = self.processed.saturating_add(1);

        let shared = Arc::clone(&self.snapshot.shared);
        if !shared.is_moderator(message.sender_id) {
            tracing::trace!(
                account = %self.snapshot.account,
                sender = message.sender_id,
                "ignoring message from non-moderator"
            );
            return Vec::new();
        }

        let mut outcomes = Vec::new();
        let text = message.text.as_str();

        if let Some(hit) = self.join.on_message(text) {
            outcomes.push(Outcome::BanWarning {
                pattern: hit.pattern,
            });
        }

        if let Some(found) = shared.catalog.phases.find(text) {
            let outcome = self.phase.observe(found.pattern.label, now);
            outcomes.push(Outcome::Phase(outcome));
            self.apply_phase(outcome, message, now, &mut outcomes);
        }

        if let Some(found) = shared.catalog.actions.find(text) {
            outcomes.push(self.evaluate_action(&found.pattern.label, message, now));
        }

        outcomes
    }

    /// Runs a deferred join retry.
    ///
    /// Returns `None` when the retry no longer applies: the account left
    /// `JoinTime` or already joined.
    pub fn retry_join(&mut self, now: Instant) -> Option<Outcome> {
        if self.phase.current() != Phase::JoinTime || self.join.has_joined() {
            return None;
        }
        let token = self.last_join_token.clone();
        Some(self.attempt_join(token.as_deref(), now))
    }

    /// Records that the transport accepted a first-step click.
    pub fn commit_pending(&mut self, action: usize, pair: PendingPair, now: Instant) {
        self.pending = Some(PendingStep {
            action,
            pair,
            committed_at: now,
        });
    }

    // ========================================================================
    // Phase
    // ========================================================================

    fn apply_phase(
        &mut self,
        outcome: PhaseOutcome,
        message: &InboundMessage,
        now: Instant,
        outcomes: &mut Vec<Outcome>,
    ) {
        match outcome {
            PhaseOutcome::Entered {
                to: Phase::JoinTime,
                ..
            } => {
                self.join.reset_round();
                self.pending = None;
                self.join_prompt(message, now, outcomes);
            }
            PhaseOutcome::Reaffirmed(Phase::JoinTime) => {
                self.join_prompt(message, now, outcomes);
            }
            PhaseOutcome::Entered {
                to: Phase::JoinConfirmation | Phase::GameStart,
                ..
            } => self.join.mark_joined(),
            PhaseOutcome::Entered {
                to: Phase::GameEnd,
                ..
            } => {
                self.join.reset_round();
                self.pending = None;
                self.last_join_token = None;
            }
            PhaseOutcome::Reaffirmed(_) | PhaseOutcome::Rejected { .. } => {}
        }
    }

    fn join_prompt(&mut self, message: &InboundMessage, now: Instant, outcomes: &mut Vec<Outcome>) {
        if let Some(token) = &message.join_token {
            self.last_join_token = Some(token.clone());
        }
        if self.join.has_joined() {
            return;
        }
        let token = self.last_join_token.clone();
        outcomes.push(self.attempt_join(token.as_deref(), now));
    }

    fn attempt_join(&mut self, token: Option<&str>, now: Instant) -> Outcome {
        let outcome = match self.join.attempt_join(now) {
            JoinDecision::Proceed {
                attempt,
                max_attempts,
            } => JoinOutcome::Attempt {
                attempt,
                max_attempts,
                command: self.snapshot.join_affordance.command_for(token),
            },
            JoinDecision::Cooldown(remaining) => JoinOutcome::Cooldown(remaining),
            JoinDecision::Abandoned(reason) => JoinOutcome::Abandoned(reason),
        };
        Outcome::Join(outcome)
    }

    // ========================================================================
    // Actions
    // ========================================================================

    fn evaluate_action(
        &mut self,
        trigger: &ActionTrigger,
        message: &InboundMessage,
        now: Instant,
    ) -> Outcome {
        let snapshot = Arc::clone(&self.snapshot);
        let Some(action) = snapshot.actions.get(trigger.action) else {
            return Outcome::Unresolved {
                action: trigger.name.clone(),
                step: trigger.step,
                error: ResolutionError::NoEligibleTarget,
            };
        };
        let candidates = message.candidates();
        let step = if action.two_step {
            trigger.step
        } else {
            Step::First
        };

        let resolved: Result<(Command, Option<PendingPair>), ResolutionError> = match &action.button
        {
            ResolvedButton::YesNo(answer) => {
                select_yes_no(*answer, candidates, action.targets.random_fallback)
                    .map(|choice| (Command::Click { choice }, None))
            }
            ResolvedButton::Fixed {
                text,
                send_as: SendAs::Click,
            } => Ok((
                Command::Click {
                    choice: select_fixed(text, candidates),
                },
                None,
            )),
            ResolvedButton::Fixed {
                text,
                send_as: SendAs::Message,
            } => Ok((Command::Text { text: text.clone() }, None)),
            ResolvedButton::PlayerList if action.two_step => {
                self.expire_pending(now);
                let pending = self
                    .pending
                    .as_ref()
                    .filter(|p| p.action == trigger.action)
                    .map(|p| p.pair.clone());
                let plan = resolve_two_step(
                    step,
                    candidates.unwrap_or_default(),
                    &action.targets,
                    pending.as_ref(),
                    &mut self.rng,
                );
                plan.map(|plan| match plan {
                    TwoStepPlan::First { choice, pending } => {
                        (Command::Click { choice }, Some(pending))
                    }
                    TwoStepPlan::Second { choice } => {
                        self.pending = None;
                        (Command::Click { choice }, None)
                    }
                })
            }
            ResolvedButton::PlayerList => resolve(
                candidates.unwrap_or_default(),
                &action.targets,
                &mut self.rng,
            )
            .map(|choice| (Command::Click { choice }, None))
            .ok_or(ResolutionError::NoEligibleTarget),
        };

        match resolved {
            Ok((command, pending)) => Outcome::Action(ActionDecision {
                action: trigger.action,
                name: action.name.clone(),
                step,
                command,
                delay: action.delay.sample(&mut self.rng),
                pending,
            }),
            Err(error) => Outcome::Unresolved {
                action: action.name.clone(),
                step,
                error,
            },
        }
    }

    fn is_expired(&self, pending: &PendingStep, now: Instant) -> bool {
        now.saturating_duration_since(pending.committed_at) > self.snapshot.two_step_timeout
    }

    fn expire_pending(&mut self, now: Instant) {
        if let Some(pending) = &self.pending {
            if self.is_expired(pending, now) {
                tracing::debug!(
                    account = %self.snapshot.account,
                    first = %pending.pair.first,
                    "pending two-step pair expired"
                );
                self.pending = None;
            }
        }
    }

    /// Lifetime of a pending two-step pair.
    #[must_use]
    pub fn two_step_timeout(&self) -> Duration {
        self.snapshot.two_step_timeout
    }
}

// ============================================================================
// Tests
// ============================================================================
