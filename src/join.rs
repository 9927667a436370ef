//! Join retry policy
//!
//! Bounds how often an account tries to join a game and stops it for good
//! when the moderator warns about a ban. The policy is a plain state machine
//! driven by the caller's clock so it behaves identically under test.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::detection::{BanWarning, PatternSet};

/// Resolved join rule for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinRule {
    /// Attempts allowed per round (at least 1)
    pub max_attempts: u32,
    /// Minimum spacing between attempts
    pub cooldown: Duration,
}

/// Why joining was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// The moderator posted a ban warning
    BanWarning,
    /// Every attempt of the round was used
    AttemptsExhausted {
        /// Attempts made
        attempts: u32,
    },
}

impl std::fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BanWarning => f.write_str("ban warning detected"),
            Self::AttemptsExhausted { attempts } => {
                write!(f, "join attempts exhausted after {attempts} tries")
            }
        }
    }
}

/// Decision returned by [`JoinPolicy::attempt_join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinDecision {
    /// Send the join command now.
    Proceed {
        /// 1-based attempt number within the round
        attempt: u32,
        /// Attempts allowed per round
        max_attempts: u32,
    },
    /// Too soon; try again after `remaining`.
    Cooldown(Duration),
    /// Stop joining for the rest of the run.
    Abandoned(AbandonReason),
}

/// A ban warning found in a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanWarningHit {
    /// Text of the pattern that matched
    pub pattern: String,
}

/// When the next attempt may go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CooldownState {
    Ready,
    Until(Instant),
    /// The cooldown ends past the clock's range.
    Forever,
}

/// Per-account join retry state.
#[derive(Debug)]
pub struct JoinPolicy {
    rule: JoinRule,
    ban_patterns: Arc<PatternSet<BanWarning>>,
    attempts: u32,
    cooldown: CooldownState,
    joined: bool,
    abandoned: Option<AbandonReason>,
}

impl JoinPolicy {
    /// Creates a policy with a fresh round.
    #[must_use]
    pub const fn new(rule: JoinRule, ban_patterns: Arc<PatternSet<BanWarning>>) -> Self {
        Self {
            rule,
            ban_patterns,
            attempts: 0,
            cooldown: CooldownState::Ready,
            joined: false,
            abandoned: None,
        }
    }

    /// Checks `text` for a ban warning.
    ///
    /// The first hit abandons the policy permanently and is returned; later
    /// hits return `None` since there is nothing left to stop.
    pub fn on_message(&mut self, text: &str) -> Option<BanWarningHit> {
        if self.abandoned == Some(AbandonReason::BanWarning) {
            return None;
        }
        let hit = self.ban_patterns.find(text)?;
        self.abandoned = Some(AbandonReason::BanWarning);
        Some(BanWarningHit {
            pattern: hit.pattern.text.clone(),
        })
    }

    /// Decides whether a join command may be sent at `now`.
    ///
    /// A cooldown answer does not consume an attempt. A cooldown too long
    /// to represent as an instant never expires and is reported as
    /// [`Duration::MAX`].
    pub fn attempt_join(&mut self, now: Instant) -> JoinDecision {
        if let Some(reason) = self.abandoned {
            return JoinDecision::Abandoned(reason);
        }

        match self.cooldown {
            CooldownState::Until(until) if now < until => {
                return JoinDecision::Cooldown(until - now);
            }
            CooldownState::Forever => return JoinDecision::Cooldown(Duration::MAX),
            CooldownState::Ready | CooldownState::Until(_) => {}
        }

        self.attempts = self.attempts.saturating_add(1);
        if self.attempts > self.rule.max_attempts {
            let reason = AbandonReason::AttemptsExhausted {
                attempts: self.rule.max_attempts,
            };
            self.abandoned = Some(reason);
            return JoinDecision::Abandoned(reason);
        }

        self.cooldown = now
            .checked_add(self.rule.cooldown)
            .map_or(CooldownState::Forever, CooldownState::Until);
        JoinDecision::Proceed {
            attempt: self.attempts,
            max_attempts: self.rule.max_attempts,
        }
    }

    /// Records that the moderator confirmed the join.
    pub const fn mark_joined(&mut self) {
        self.joined = true;
    }

    /// Starts a new round. Abandonment survives.
    pub const fn reset_round(&mut self) {
        self.attempts = 0;
        self.cooldown = CooldownState::Ready;
        self.joined = false;
    }

    /// Returns whether this round's join was confirmed.
    #[must_use]
    pub const fn has_joined(&self) -> bool {
        self.joined
    }

    /// Returns the abandonment reason, if abandoned.
    #[must_use]
    pub const fn abandoned(&self) -> Option<AbandonReason> {
        self.abandoned
    }

    /// Attempts made in the current round.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The rule this policy enforces.
    #[must_use]
    pub const fn rule(&self) -> JoinRule {
        self.rule
    }
}
