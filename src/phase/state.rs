//! Per-account phase state machine
//!
//! Consumes phase-labeled pattern matches and advances the account's current
//! phase according to a [`TransitionTable`]. The machine is owned by exactly
//! one account worker; it is plain mutable state, never shared.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::phase::transitions::TransitionTable;

// ============================================================================
// Phase
// ============================================================================

/// Game phase announced by the moderator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// The moderator is accepting players
    JoinTime,
    /// The moderator acknowledged this account's join
    JoinConfirmation,
    /// The game is running
    GameStart,
    /// The game ended
    GameEnd,
}

impl Phase {
    /// All phases in cycle order.
    pub const ALL: [Self; 4] = [
        Self::JoinTime,
        Self::JoinConfirmation,
        Self::GameStart,
        Self::GameEnd,
    ];

    /// Returns the phase that follows `self` in the base cycle.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::JoinTime => Self::JoinConfirmation,
            Self::JoinConfirmation => Self::GameStart,
            Self::GameStart => Self::GameEnd,
            Self::GameEnd => Self::JoinTime,
        }
    }

    /// Returns the `snake_case` name used in configuration and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::JoinTime => "join_time",
            Self::JoinConfirmation => "join_confirmation",
            Self::GameStart => "game_start",
            Self::GameEnd => "game_end",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::JoinTime => 0,
            Self::JoinConfirmation => 1,
            Self::GameStart => 2,
            Self::GameEnd => 3,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Result of offering a phase match to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// The machine moved to a new phase.
    Entered {
        /// Phase before the transition
        from: Phase,
        /// Phase after the transition
        to: Phase,
    },
    /// The match named the current phase; nothing moved.
    Reaffirmed(Phase),
    /// The transition table does not allow the move.
    Rejected {
        /// Phase the machine stays in
        current: Phase,
        /// Phase the message announced
        matched: Phase,
    },
}

impl PhaseOutcome {
    /// Returns the phase the machine is in after this outcome.
    #[must_use]
    pub const fn current(&self) -> Phase {
        match *self {
            Self::Entered { to, .. } => to,
            Self::Reaffirmed(phase) => phase,
            Self::Rejected { current, .. } => current,
        }
    }
}

// ============================================================================
// Machine
// ============================================================================

/// Phase state machine for one account.
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    current: Phase,
    table: Arc<TransitionTable>,
    entered_at: Option<Instant>,
    transitions: u64,
}

impl PhaseMachine {
    /// Creates a machine in [`Phase::JoinTime`].
    #[must_use]
    pub fn new(table: Arc<TransitionTable>) -> Self {
        Self {
            current: Phase::JoinTime,
            table,
            entered_at: None,
            transitions: 0,
        }
    }

    /// Returns the current phase.
    #[must_use]
    pub const fn current(&self) -> Phase {
        self.current
    }

    /// Returns when the current phase was entered, or `None` before the
    /// first transition.
    #[must_use]
    pub const fn entered_at(&self) -> Option<Instant> {
        self.entered_at
    }

    /// Returns the number of transitions taken since start.
    #[must_use]
    pub const fn transition_count(&self) -> u64 {
        self.transitions
    }

    /// Offers a matched phase seen at `now` to the machine.
    pub fn observe(&mut self, matched: Phase, now: Instant) -> PhaseOutcome {
        if matched == self.current {
            return PhaseOutcome::Reaffirmed(matched);
        }

        if !self.table.allows(self.current, matched) {
            tracing::debug!(
                current = %self.current,
                matched = %matched,
                "phase transition not allowed"
            );
            return PhaseOutcome::Rejected {
                current: self.current,
                matched,
            };
        }

        let from = self.current;
        self.current = matched;
        self.entered_at = Some(now);
        self.transitions = self.transitions.saturating_add(1);
        PhaseOutcome::Entered { from, to: matched }
    }
}

// ============================================================================
// Tests
// ============================================================================
