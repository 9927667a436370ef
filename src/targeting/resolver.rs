//! Target selection
//!
//! Pure functions over the transport-supplied candidate labels. The random
//! source is a parameter so callers decide between a seeded and an OS-seeded
//! generator.
//!
//! A candidate matches a configured identifier when the two are equal after
//! trimming and case folding; when nothing in the list matches exactly, a
//! candidate that contains the identifier matches. The value returned is
//! always the candidate's own label.

use rand::Rng;
use rand::seq::IndexedRandom;

use crate::config::schema::YesNo;
use crate::detection::Step;
use crate::error::ResolutionError;
use crate::targeting::config::TargetConfig;

/// Words recognised as an affirmative button.
pub const YES_KEYWORDS: [&str; 5] = ["yes", "بله", "آره", "✓", "✅"];

/// Words recognised as a negative button.
pub const NO_KEYWORDS: [&str; 5] = ["no", "خیر", "نه", "✗", "❌"];

// ============================================================================
// Candidate Matching
// ============================================================================

fn normalize(label: &str) -> String {
    label.trim().to_lowercase()
}

/// Finds the candidate that matches `wanted`.
#[must_use]
pub fn find_candidate<'c>(candidates: &'c [String], wanted: &str) -> Option<&'c str> {
    let wanted = normalize(wanted);
    if wanted.is_empty() {
        return None;
    }

    candidates
        .iter()
        .find(|c| normalize(c) == wanted)
        .or_else(|| candidates.iter().find(|c| normalize(c).contains(&wanted)))
        .map(String::as_str)
}

fn is_listed(candidate: &str, list: &[String]) -> bool {
    let candidate = normalize(candidate);
    list.iter().map(String::as_str).map(normalize).any(|entry| {
        !entry.is_empty() && (candidate == entry || candidate.contains(&entry))
    })
}

fn random_eligible<'c, R: Rng + ?Sized>(
    candidates: &'c [String],
    blacklist: &[String],
    exclude: Option<&str>,
    rng: &mut R,
) -> Option<&'c str> {
    let eligible: Vec<&String> = candidates
        .iter()
        .filter(|c| !c.trim().is_empty())
        .filter(|c| !is_listed(c, blacklist))
        .filter(|c| exclude.is_none_or(|x| normalize(c) != normalize(x)))
        .collect();
    eligible.choose(rng).copied().map(String::as_str)
}

// ============================================================================
// Single-Step Resolution
// ============================================================================

/// Picks a player from `candidates`.
///
/// The first `priority_list` entry present wins, even if blacklisted.
/// Otherwise, with `random_fallback`, a uniformly random candidate outside the
/// blacklist is chosen.
#[must_use]
pub fn resolve<R: Rng + ?Sized>(
    candidates: &[String],
    config: &TargetConfig,
    rng: &mut R,
) -> Option<String> {
    if let Some(explicit) = config
        .priority_list
        .iter()
        .find_map(|entry| find_candidate(candidates, entry))
    {
        return Some(explicit.to_string());
    }

    if !config.random_fallback {
        return None;
    }

    random_eligible(candidates, &config.blacklist, None, rng).map(ToString::to_string)
}

// ============================================================================
// Two-Step Resolution
// ============================================================================

/// First-step selection awaiting its second step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPair {
    /// Label clicked on the first step
    pub first: String,
    /// Configured partner; `None` when the first step was random
    pub partner: Option<String>,
}

/// Selection made for one step of a two-step action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TwoStepPlan {
    /// First step: click `choice` and remember `pending` once acknowledged.
    First {
        /// Label to click
        choice: String,
        /// State for the second step
        pending: PendingPair,
    },
    /// Second step: click `choice`.
    Second {
        /// Label to click
        choice: String,
    },
}

impl TwoStepPlan {
    /// Label to click for this step.
    #[must_use]
    pub fn choice(&self) -> &str {
        match self {
            Self::First { choice, .. } | Self::Second { choice } => choice,
        }
    }
}

/// Resolves one step of a two-step action.
///
/// # Errors
///
/// Returns [`ResolutionError::NoEligibleTarget`] when step 1 finds no pair and
/// no fallback, or a random second step has nothing left to pick, and
/// [`ResolutionError::NoActivePair`] when step 2 arrives without `pending`.
pub fn resolve_two_step<R: Rng + ?Sized>(
    step: Step,
    candidates: &[String],
    config: &TargetConfig,
    pending: Option<&PendingPair>,
    rng: &mut R,
) -> Result<TwoStepPlan, ResolutionError> {
    match step {
        Step::First => {
            let paired = config.target_pairs.iter().find_map(|(first, second)| {
                find_candidate(candidates, first).map(|label| (label, second))
            });

            if let Some((label, partner)) = paired {
                return Ok(TwoStepPlan::First {
                    choice: label.to_string(),
                    pending: PendingPair {
                        first: label.to_string(),
                        partner: Some(partner.clone()),
                    },
                });
            }

            if !config.random_fallback {
                return Err(ResolutionError::NoEligibleTarget);
            }

            let label = random_eligible(candidates, &config.blacklist, None, rng)
                .ok_or(ResolutionError::NoEligibleTarget)?;
            Ok(TwoStepPlan::First {
                choice: label.to_string(),
                pending: PendingPair {
                    first: label.to_string(),
                    partner: None,
                },
            })
        }
        Step::Second => {
            let pending = pending.ok_or(ResolutionError::NoActivePair)?;
            let choice = match &pending.partner {
                Some(partner) => find_candidate(candidates, partner)
                    .map_or_else(|| partner.clone(), ToString::to_string),
                None => random_eligible(candidates, &config.blacklist, Some(&pending.first), rng)
                    .map(ToString::to_string)
                    .ok_or(ResolutionError::NoEligibleTarget)?,
            };
            Ok(TwoStepPlan::Second { choice })
        }
    }
}

// ============================================================================
// Yes/No and Fixed Responses
// ============================================================================

/// Picks the button for a yes/no prompt.
///
/// # Errors
///
/// Returns [`ResolutionError::NoEligibleTarget`] when candidates are supplied,
/// none carries the answer, and `random_fallback` is off.
pub fn select_yes_no(
    answer: YesNo,
    candidates: Option<&[String]>,
    random_fallback: bool,
) -> Result<String, ResolutionError> {
    let keywords = match answer {
        YesNo::Yes => &YES_KEYWORDS,
        YesNo::No => &NO_KEYWORDS,
    };

    let Some(candidates) = candidates.filter(|c| !c.is_empty()) else {
        return Ok(keywords[0].to_string());
    };

    keywords
        .iter()
        .find_map(|keyword| find_candidate(candidates, keyword))
        .map(ToString::to_string)
        .or_else(|| candidates.first().filter(|_| random_fallback).cloned())
        .ok_or(ResolutionError::NoEligibleTarget)
}

/// Picks the button carrying a fixed response; falls back to the text itself.
#[must_use]
pub fn select_fixed(text: &str, candidates: Option<&[String]>) -> String {
    candidates
        .and_then(|c| find_candidate(c, text))
        .map_or_else(|| text.to_string(), ToString::to_string)
}

// ============================================================================
// Tests
// ============================================================================
