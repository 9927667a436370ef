//! Configuration validation
//!
//! Semantic checks on a deserialized [`EngineConfig`]. Validation collects
//! ALL issues rather than stopping at the first one.
//!
//! Errors are structural problems that make the configuration meaningless.
//! Warnings are degradations the engine survives at run time: a pattern that
//! never matches, a malformed target pair that is skipped.

use std::collections::HashSet;

use crate::config::loader::ConfigLimits;
use crate::config::schema::{
    AccountConfig, ActionConfig, ButtonType, EngineConfig, JoinOverride, PatternConfig,
    TargetOverride,
};
use crate::detection::compile_text;
use crate::error::{Severity, ValidationIssue};
use crate::targeting::config::is_well_formed;

/// Maximum edit distance for "did you mean" suggestions.
const SUGGESTION_DISTANCE: usize = 3;

/// Cooldowns longer than this are accepted with a warning.
const MAX_PRACTICAL_COOLDOWN_SECS: f64 = 365.0 * 24.0 * 3600.0;

// ============================================================================
// Public API
// ============================================================================

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Configuration validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a configuration and returns every issue found.
    pub fn validate(&mut self, config: &EngineConfig, limits: &ConfigLimits) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.validate_moderators(config);
        self.validate_transitions(config);
        self.validate_join(config);
        self.validate_patterns(config, limits);
        self.validate_actions(config);
        self.validate_accounts(config);
        self.validate_limits(config, limits);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Global Settings
    // ========================================================================

    fn validate_moderators(&mut self, config: &EngineConfig) {
        if config.moderators.is_empty() {
            self.add_warning(
                "moderators",
                "No moderators configured; messages from every sender will be evaluated",
            );
        }
    }

    fn validate_transitions(&mut self, config: &EngineConfig) {
        for (i, (from, to)) in config.transitions.extra.iter().enumerate() {
            if from == to {
                self.add_warning(
                    &format!("transitions.extra[{i}]"),
                    &format!("Self-transition {from} -> {to} is ignored"),
                );
            }
        }
    }

    fn validate_join(&mut self, config: &EngineConfig) {
        if config.join.max_attempts == 0 {
            self.add_error("join.max_attempts", "max_attempts must be at least 1");
        }
        self.validate_cooldown(config.join.cooldown_seconds, "join.cooldown_seconds");

        if config.two_step_timeout_seconds == 0 {
            self.add_warning(
                "two_step_timeout_seconds",
                "Two-step timeout is 0; every second step will find no active pair",
            );
        }
    }

    fn validate_cooldown(&mut self, seconds: f64, path: &str) {
        if !seconds.is_finite() || seconds < 0.0 {
            self.add_error(
                path,
                &format!("Cooldown must be a finite, non-negative number of seconds, got {seconds}"),
            );
        } else if seconds > MAX_PRACTICAL_COOLDOWN_SECS {
            self.add_warning(
                path,
                &format!("Cooldown of {seconds} seconds exceeds a year; retries will never fire"),
            );
        }
    }

    // ========================================================================
    // Patterns
    // ========================================================================

    fn validate_patterns(&mut self, config: &EngineConfig, limits: &ConfigLimits) {
        for (i, pattern) in config.ban_warnings.iter().enumerate() {
            self.validate_pattern(pattern, &format!("ban_warnings[{i}]"), limits);
        }
        for (i, phase) in config.phase_patterns.iter().enumerate() {
            self.validate_pattern(&phase.pattern, &format!("phase_patterns[{i}]"), limits);
        }
        for (i, action) in config.actions.iter().enumerate() {
            for (j, pattern) in action.patterns.iter().enumerate() {
                self.validate_pattern(
                    &pattern.pattern,
                    &format!("actions[{i}].patterns[{j}]"),
                    limits,
                );
            }
        }
    }

    fn validate_pattern(&mut self, pattern: &PatternConfig, base_path: &str, limits: &ConfigLimits) {
        if let Err(reason) = compile_text(&pattern.text, pattern.regex, &limits.matcher_limits()) {
            self.add_warning(
                &format!("{base_path}.text"),
                &format!("Pattern {:?} never matches: {reason}", pattern.text),
            );
        }
    }

    // ========================================================================
    // Actions
    // ========================================================================

    fn validate_actions(&mut self, config: &EngineConfig) {
        let mut seen = HashSet::new();
        for (i, action) in config.actions.iter().enumerate() {
            let path = format!("actions[{i}]");

            if action.name.trim().is_empty() {
                self.add_error(&format!("{path}.name"), "Action name cannot be empty");
            } else if !seen.insert(action.name.as_str()) {
                self.add_error(
                    &format!("{path}.name"),
                    &format!("Duplicate action name '{}'", action.name),
                );
            }

            if action.patterns.is_empty() {
                self.add_warning(
                    &format!("{path}.patterns"),
                    &format!("Action '{}' has no patterns and never triggers", action.name),
                );
            }

            self.validate_steps(action, &path);
            self.validate_button(config, action, &path);
            self.validate_delay(
                action.delay_min_seconds,
                action.delay_max_seconds,
                &path,
            );

            self.validate_pairs(&action.target_pairs, &format!("{path}.target_pairs"));
            self.validate_target_override(&action.targets, &format!("{path}.targets"));
        }
    }

    fn validate_steps(&mut self, action: &ActionConfig, path: &str) {
        let mut has_second = false;
        for (j, pattern) in action.patterns.iter().enumerate() {
            match pattern.step {
                1 => {}
                2 if action.two_step => has_second = true,
                2 => self.add_warning(
                    &format!("{path}.patterns[{j}].step"),
                    &format!(
                        "Action '{}' is not two-step; step 2 is treated as step 1",
                        action.name
                    ),
                ),
                other => self.add_error(
                    &format!("{path}.patterns[{j}].step"),
                    &format!("Step must be 1 or 2, got {other}"),
                ),
            }
        }
        if action.two_step && !has_second && !action.patterns.is_empty() {
            self.add_warning(
                &format!("{path}.patterns"),
                &format!(
                    "Two-step action '{}' has no step 2 pattern; the second pick is never made",
                    action.name
                ),
            );
        }
    }

    fn validate_button(&mut self, config: &EngineConfig, action: &ActionConfig, path: &str) {
        if action.two_step && action.button != ButtonType::PlayerList {
            self.add_error(
                &format!("{path}.two_step"),
                &format!(
                    "Two-step actions require button type player_list, got {}",
                    action.button
                ),
            );
        }

        if action.two_step && !has_any_pairs(config, action) {
            self.add_error(
                &format!("{path}.target_pairs"),
                &format!(
                    "Two-step action '{}' has no target pairs globally or for any account",
                    action.name
                ),
            );
        }

        if action.button == ButtonType::Fixed {
            match &action.response {
                None => self.add_error(
                    &format!("{path}.response"),
                    "Fixed actions require a response",
                ),
                Some(response) if response.text.trim().is_empty() => self.add_error(
                    &format!("{path}.response.text"),
                    "Fixed response text cannot be empty",
                ),
                Some(_) => {}
            }
        }
    }

    fn validate_delay(&mut self, min: f64, max: f64, path: &str) {
        for (value, field) in [(min, "delay_min_seconds"), (max, "delay_max_seconds")] {
            if !value.is_finite() || value < 0.0 {
                self.add_error(
                    &format!("{path}.{field}"),
                    &format!("Delay must be a finite, non-negative number of seconds, got {value}"),
                );
            }
        }
        if min > max {
            self.add_error(
                &format!("{path}.delay_min_seconds"),
                &format!("delay_min_seconds ({min}) is greater than delay_max_seconds ({max})"),
            );
        }
    }

    fn validate_pairs(&mut self, pairs: &[(String, String)], path: &str) {
        for (k, pair) in pairs.iter().enumerate() {
            if !is_well_formed(pair) {
                self.add_warning(
                    &format!("{path}[{k}]"),
                    &format!(
                        "Malformed target pair [{:?}, {:?}] is skipped; sides must be two different names",
                        pair.0, pair.1
                    ),
                );
            }
        }
    }

    fn validate_target_override(&mut self, targets: &TargetOverride, path: &str) {
        if let Some(pairs) = &targets.target_pairs {
            self.validate_pairs(pairs, &format!("{path}.target_pairs"));
        }
    }

    // ========================================================================
    // Accounts
    // ========================================================================

    fn validate_accounts(&mut self, config: &EngineConfig) {
        if config.accounts.is_empty() {
            self.add_error("accounts", "No accounts configured");
            return;
        }

        let mut seen = HashSet::new();
        for (i, account) in config.accounts.iter().enumerate() {
            let path = format!("accounts[{i}]");
            let id = account.id.as_str();

            if id.trim().is_empty() {
                self.add_error(&format!("{path}.id"), "Account id cannot be empty");
            } else if !seen.insert(id) {
                self.add_error(
                    &format!("{path}.id"),
                    &format!("Duplicate account id '{id}'"),
                );
            }

            self.validate_join_override(&account.join, &format!("{path}.join"));
            self.validate_account_delay(config, account, &path);

            for (name, targets) in &account.targets {
                let target_path = format!("{path}.targets.{name}");
                if config.action(name).is_none() {
                    let message = suggest(name, config.actions.iter().map(|a| a.name.as_str()))
                        .map_or_else(
                            || format!("Unknown action '{name}'; override is ignored"),
                            |s| format!("Unknown action '{name}'; did you mean '{s}'?"),
                        );
                    self.add_warning(&target_path, &message);
                }
                self.validate_target_override(targets, &target_path);
            }
        }
    }

    fn validate_join_override(&mut self, join: &JoinOverride, path: &str) {
        if join.max_attempts == Some(0) {
            self.add_error(
                &format!("{path}.max_attempts"),
                "max_attempts must be at least 1",
            );
        }
        if let Some(cooldown) = join.cooldown_seconds {
            self.validate_cooldown(cooldown, &format!("{path}.cooldown_seconds"));
        }
    }

    fn validate_account_delay(&mut self, config: &EngineConfig, account: &AccountConfig, path: &str) {
        if account.delay_min_seconds.is_none() && account.delay_max_seconds.is_none() {
            return;
        }
        // an account override pairs with each action's own bound for the other side
        for action in &config.actions {
            let min = account.delay_min_seconds.unwrap_or(action.delay_min_seconds);
            let max = account.delay_max_seconds.unwrap_or(action.delay_max_seconds);
            let before = self.errors.len();
            self.validate_delay(min, max, path);
            if self.errors.len() > before {
                break;
            }
        }
        if config.actions.is_empty() {
            self.validate_delay(
                account.delay_min_seconds.unwrap_or(0.0),
                account.delay_max_seconds.unwrap_or(f64::MAX),
                path,
            );
        }
    }

    // ========================================================================
    // Limits
    // ========================================================================

    fn validate_limits(&mut self, config: &EngineConfig, limits: &ConfigLimits) {
        if config.accounts.len() > limits.max_accounts {
            self.add_error(
                "accounts",
                &format!(
                    "Too many accounts: {} (maximum: {}). \
                     Set PHASEKEEPER_MAX_ACCOUNTS to increase the limit.",
                    config.accounts.len(),
                    limits.max_accounts
                ),
            );
        }

        for (i, action) in config.actions.iter().enumerate() {
            let pair_count = action.target_pairs.len()
                + action.targets.target_pairs.as_ref().map_or(0, Vec::len);
            if pair_count > limits.max_target_pairs {
                self.add_error(
                    &format!("actions[{i}].target_pairs"),
                    &format!(
                        "Too many target pairs: {pair_count} (maximum: {}). \
                         Set PHASEKEEPER_MAX_TARGET_PAIRS to increase the limit.",
                        limits.max_target_pairs
                    ),
                );
            }
        }
    }

    // ========================================================================
    // Helper Methods
    // ========================================================================

    /// Adds an error to the collection.
    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    /// Adds a warning to the collection.
    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Whether a two-step action has pairs at any configuration layer.
fn has_any_pairs(config: &EngineConfig, action: &ActionConfig) -> bool {
    let non_empty = |pairs: Option<&Vec<(String, String)>>| pairs.is_some_and(|p| !p.is_empty());
    !action.target_pairs.is_empty()
        || non_empty(action.targets.target_pairs.as_ref())
        || config.accounts.iter().any(|account| {
            non_empty(
                account
                    .targets
                    .get(&action.name)
                    .and_then(|t| t.target_pairs.as_ref()),
            )
        })
}

/// Closest known name within [`SUGGESTION_DISTANCE`] edits.
fn suggest<'a>(input: &str, known: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    known
        .map(|name| (name, strsim::damerau_levenshtein(input, name)))
        .filter(|(_, distance)| *distance <= SUGGESTION_DISTANCE)
        .min_by_key(|(_, distance)| *distance)
        .map(|(name, _)| name)
}

// ============================================================================
// Tests
// ============================================================================
