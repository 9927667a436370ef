//! What processing a message produced
//!
//! The engine is synchronous and never performs I/O. It returns an ordered
//! list of outcomes which the worker turns into sends, events and status.

use std::time::Duration;

use crate::detection::Step;
use crate::error::ResolutionError;
use crate::join::AbandonReason;
use crate::phase::PhaseOutcome;
use crate::targeting::PendingPair;
use crate::transport::Command;

/// A click or message the account should send for an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDecision {
    /// Index of the action in the configuration
    pub action: usize,
    /// Action name
    pub name: String,
    /// Prompt step answered
    pub step: Step,
    /// What to send
    pub command: Command,
    /// Wait before sending
    pub delay: Duration,
    /// Pair to remember once the transport accepted the first step
    pub pending: Option<PendingPair>,
}

/// Result of asking the join policy for an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Send the join command, if there is one.
    Attempt {
        /// 1-based attempt within the round
        attempt: u32,
        /// Attempts allowed per round
        max_attempts: u32,
        /// `None` when the message offered no way to join
        command: Option<Command>,
    },
    /// Retry after the remaining cooldown.
    Cooldown(Duration),
    /// Joining is over for this run.
    Abandoned(AbandonReason),
}

/// One observable effect of a message, in processing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A ban warning was detected.
    BanWarning {
        /// Text of the matching pattern
        pattern: String,
    },
    /// A phase marker was seen.
    Phase(PhaseOutcome),
    /// The join policy was consulted.
    Join(JoinOutcome),
    /// An action resolved to a command.
    Action(ActionDecision),
    /// An action matched but nothing could be selected.
    Unresolved {
        /// Action name
        action: String,
        /// Prompt step
        step: Step,
        /// Why
        error: ResolutionError,
    },
}
