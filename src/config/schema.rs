//! Configuration schema types
//!
//! These types are deserialized from the YAML run configuration. They are
//! the *authored* form: layered, possibly malformed. The flattened, per-account
//! form used at run time lives in [`crate::engine::AccountSnapshot`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::phase::Phase;
use crate::worker::AccountId;

// ============================================================================
// Defaults
// ============================================================================

/// Default maximum join attempts per round.
pub const DEFAULT_JOIN_MAX_ATTEMPTS: u32 = 5;

/// Default join cooldown in seconds.
pub const DEFAULT_JOIN_COOLDOWN_SECONDS: f64 = 5.0;

/// Default command sent to join a game; `{token}` is replaced by the
/// message's join token.
pub const DEFAULT_JOIN_COMMAND: &str = "/start {token}";

/// Default lifetime of a pending two-step pair in seconds.
pub const DEFAULT_TWO_STEP_TIMEOUT_SECONDS: u64 = 120;

const fn default_two_step_timeout() -> u64 {
    DEFAULT_TWO_STEP_TIMEOUT_SECONDS
}

const fn default_true() -> bool {
    true
}

const fn default_step() -> u8 {
    1
}

// ============================================================================
// Top-Level Configuration
// ============================================================================

/// Root configuration for a `phasekeeper` run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Sender ids whose messages are evaluated; empty accepts every sender
    #[serde(default)]
    pub moderators: Vec<i64>,

    /// Allowed phase transitions beyond the base cycle
    #[serde(default)]
    pub transitions: TransitionConfig,

    /// Global join rule
    #[serde(default)]
    pub join: JoinConfig,

    /// Patterns that signal a ban warning from the moderator
    #[serde(default)]
    pub ban_warnings: Vec<PatternConfig>,

    /// Phase marker patterns
    #[serde(default)]
    pub phase_patterns: Vec<PhasePatternConfig>,

    /// Action definitions with their trigger patterns
    #[serde(default)]
    pub actions: Vec<ActionConfig>,

    /// Lifetime of a pending two-step pair
    #[serde(default = "default_two_step_timeout")]
    pub two_step_timeout_seconds: u64,

    /// Managed accounts
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

impl EngineConfig {
    /// Looks up an account definition by id.
    #[must_use]
    pub fn account(&self, id: &AccountId) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| &a.id == id)
    }

    /// Looks up an action definition by name.
    #[must_use]
    pub fn action(&self, name: &str) -> Option<&ActionConfig> {
        self.actions.iter().find(|a| a.name == name)
    }
}

// ============================================================================
// Patterns
// ============================================================================

/// A single authored pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PatternConfig {
    /// Substring or regular expression
    pub text: String,

    /// Whether `text` is a regular expression
    #[serde(default)]
    pub regex: bool,

    /// Lower numbers are evaluated first
    #[serde(default)]
    pub priority: i32,
}

/// A phase marker pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PhasePatternConfig {
    /// Phase this pattern announces
    pub phase: Phase,

    /// The pattern itself
    #[serde(flatten)]
    pub pattern: PatternConfig,
}

/// An action trigger pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ActionPatternConfig {
    /// The pattern itself
    #[serde(flatten)]
    pub pattern: PatternConfig,

    /// Prompt step (1 or 2); only meaningful for two-step actions
    #[serde(default = "default_step")]
    pub step: u8,
}

// ============================================================================
// Phase Transitions
// ============================================================================

/// Configurable phase transition table.
///
/// The base cycle `join_time → join_confirmation → game_start → game_end →
/// join_time` is always allowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TransitionConfig {
    /// Phases reachable from any phase
    #[serde(default = "default_escape_phases")]
    pub escape_to: Vec<Phase>,

    /// Additional `[from, to]` edges
    #[serde(default)]
    pub extra: Vec<(Phase, Phase)>,
}

fn default_escape_phases() -> Vec<Phase> {
    vec![Phase::JoinTime, Phase::GameEnd]
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            escape_to: default_escape_phases(),
            extra: Vec::new(),
        }
    }
}

// ============================================================================
// Join Rules
// ============================================================================

/// Global join rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JoinConfig {
    /// Attempts allowed per round before the account abandons joining
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Minimum spacing between attempts
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: f64,

    /// Text sent to join; `{token}` is replaced by the message's join token
    #[serde(default = "default_join_command")]
    pub command: String,

    /// Button label clicked to join when a message has no join token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<String>,
}

const fn default_max_attempts() -> u32 {
    DEFAULT_JOIN_MAX_ATTEMPTS
}

const fn default_cooldown() -> f64 {
    DEFAULT_JOIN_COOLDOWN_SECONDS
}

fn default_join_command() -> String {
    DEFAULT_JOIN_COMMAND.to_string()
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_JOIN_MAX_ATTEMPTS,
            cooldown_seconds: DEFAULT_JOIN_COOLDOWN_SECONDS,
            command: default_join_command(),
            button: None,
        }
    }
}

/// Per-account join rule override; absent fields inherit the global rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JoinOverride {
    /// Overrides `join.max_attempts`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    /// Overrides `join.cooldown_seconds`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<f64>,
}

// ============================================================================
// Actions
// ============================================================================

/// Shape of a prompt's response options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonType {
    /// One button per player
    PlayerList,
    /// A yes/no question
    YesNo,
    /// A fixed response
    Fixed,
}

impl std::fmt::Display for ButtonType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PlayerList => "player_list",
            Self::YesNo => "yes_no",
            Self::Fixed => "fixed",
        };
        f.write_str(name)
    }
}

/// Answer given to a yes/no prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YesNo {
    /// Affirmative
    #[default]
    Yes,
    /// Negative
    No,
}

/// How a fixed response is delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendAs {
    /// Click the button carrying the text
    #[default]
    Click,
    /// Send the text as a chat message
    Message,
}

/// Predefined response of a `fixed` action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FixedResponseConfig {
    /// Response text
    pub text: String,

    /// Delivery mode
    #[serde(default)]
    pub send_as: SendAs,
}

/// An ordered `(first, second)` target pair for two-step actions.
pub type TargetPair = (String, String);

/// Target rule fields; every field is optional so the same type serves as
/// the action-level default and the per-account override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TargetOverride {
    /// Explicit targets in preference order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_list: Option<Vec<String>>,

    /// Players never chosen by the random fallback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blacklist: Option<Vec<String>>,

    /// Pick a random eligible player when no explicit target is present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_fallback: Option<bool>,

    /// Pairs for two-step actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_pairs: Option<Vec<TargetPair>>,
}

/// An action definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ActionConfig {
    /// Unique action name
    pub name: String,

    /// Response shape
    pub button: ButtonType,

    /// Trigger patterns
    #[serde(default)]
    pub patterns: Vec<ActionPatternConfig>,

    /// Whether the action spans two prompts
    #[serde(default)]
    pub two_step: bool,

    /// Pairs for two-step actions (global default)
    #[serde(default)]
    pub target_pairs: Vec<TargetPair>,

    /// Target rule (global default)
    #[serde(default)]
    pub targets: TargetOverride,

    /// Answer for `yes_no` actions
    #[serde(default)]
    pub answer: YesNo,

    /// Response for `fixed` actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<FixedResponseConfig>,

    /// Lower bound of the random pre-send delay
    #[serde(default)]
    pub delay_min_seconds: f64,

    /// Upper bound of the random pre-send delay
    #[serde(default)]
    pub delay_max_seconds: f64,
}

// ============================================================================
// Accounts
// ============================================================================

/// A managed account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AccountConfig {
    /// Unique account id
    pub id: AccountId,

    /// Whether `run` starts this account by default
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Join rule override
    #[serde(default)]
    pub join: JoinOverride,

    /// Target overrides keyed by action name
    #[serde(default)]
    pub targets: BTreeMap<String, TargetOverride>,

    /// Overrides every action's `delay_min_seconds`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_min_seconds: Option<f64>,

    /// Overrides every action's `delay_max_seconds`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_max_seconds: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_defaults() {
        let yaml = "accounts:\n  - id: main\n";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.accounts.len(), 1);
        assert!(config.accounts[0].enabled);
        assert_eq!(config.join.max_attempts, DEFAULT_JOIN_MAX_ATTEMPTS);
        assert_eq!(config.join.command, "/start {token}");
        assert_eq!(config.two_step_timeout_seconds, 120);
        assert_eq!(
            config.transitions.escape_to,
            vec![Phase::JoinTime, Phase::GameEnd]
        );
    }

    #[test]
    fn test_phase_pattern_flattens_pattern_fields() {
        let yaml = r#"
phase: join_confirmation
text: "you joined"
priority: 3
"#;
        let pattern: PhasePatternConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(pattern.phase, Phase::JoinConfirmation);
        assert_eq!(pattern.pattern.text, "you joined");
        assert_eq!(pattern.pattern.priority, 3);
        assert!(!pattern.pattern.regex);
    }

    #[test]
    fn test_two_step_action_parses_pairs_and_steps() {
        let yaml = r#"
name: cupid
button: player_list
two_step: true
target_pairs: [[carol, dave]]
patterns:
  - { text: "first lover", step: 1 }
  - { text: "second lover", step: 2 }
"#;
        let action: ActionConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(action.two_step);
        assert_eq!(
            action.target_pairs,
            vec![("carol".to_string(), "dave".to_string())]
        );
        assert_eq!(action.patterns[1].step, 2);
        assert_eq!(action.button, ButtonType::PlayerList);
    }

    #[test]
    fn test_account_override_fields_are_optional() {
        let yaml = r"
id: alt
join: { max_attempts: 2 }
targets:
  vote: { blacklist: [mallory] }
";
        let account: AccountConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(account.join.max_attempts, Some(2));
        assert!(account.join.cooldown_seconds.is_none());
        let vote = &account.targets["vote"];
        assert!(vote.priority_list.is_none());
        assert_eq!(vote.blacklist.as_deref(), Some(&["mallory".to_string()][..]));
    }

    #[test]
    fn test_unknown_button_type_rejected() {
        let yaml = "name: x\nbutton: dropdown\n";
        assert!(serde_yaml::from_str::<ActionConfig>(yaml).is_err());
    }

    #[test]
    fn test_button_type_display() {
        assert_eq!(ButtonType::PlayerList.to_string(), "player_list");
        assert_eq!(ButtonType::YesNo.to_string(), "yes_no");
        assert_eq!(ButtonType::Fixed.to_string(), "fixed");
    }
}
