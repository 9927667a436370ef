//! Immutable per-run configuration
//!
//! [`SharedState`] holds what every account reads: compiled patterns, the
//! transition table and the moderator set. [`AccountSnapshot`] flattens the
//! two-layer configuration for a single account once, at start.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::config::schema::{ButtonType, EngineConfig, SendAs, YesNo};
use crate::detection::{CompileWarning, MatcherLimits, PatternCatalog};
use crate::error::WorkerError;
use crate::join::JoinRule;
use crate::phase::TransitionTable;
use crate::targeting::TargetConfig;
use crate::transport::Command;
use crate::worker::AccountId;

/// Placeholder replaced by the join token in the join command.
pub const JOIN_TOKEN_PLACEHOLDER: &str = "{token}";

// ============================================================================
// Shared State
// ============================================================================

/// Read-only data shared by every account of one configuration.
#[derive(Debug)]
pub struct SharedState {
    /// The configuration the state was built from
    pub config: Arc<EngineConfig>,
    /// Compiled patterns
    pub catalog: PatternCatalog,
    /// Allowed phase transitions
    pub transitions: Arc<TransitionTable>,
    /// Senders whose messages are evaluated; empty accepts all
    pub moderators: HashSet<i64>,
}

impl SharedState {
    /// Compiles `config`.
    #[must_use]
    pub fn build(config: Arc<EngineConfig>, limits: &MatcherLimits) -> Self {
        let catalog = PatternCatalog::compile(&config, limits);
        let transitions = Arc::new(TransitionTable::from_config(&config.transitions));
        let moderators = config.moderators.iter().copied().collect();
        Self {
            config,
            catalog,
            transitions,
            moderators,
        }
    }

    /// Returns whether messages from `sender_id` are evaluated.
    #[must_use]
    pub fn is_moderator(&self, sender_id: i64) -> bool {
        self.moderators.is_empty() || self.moderators.contains(&sender_id)
    }

    /// Patterns that failed to compile.
    pub fn compile_warnings(&self) -> impl Iterator<Item = &CompileWarning> {
        self.catalog.warnings()
    }
}

// ============================================================================
// Resolved Actions
// ============================================================================

/// Response shape with its resolved parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedButton {
    /// Pick a player
    PlayerList,
    /// Answer a yes/no prompt
    YesNo(YesNo),
    /// Send a fixed response
    Fixed {
        /// Response text
        text: String,
        /// Delivery mode
        send_as: SendAs,
    },
}

/// Uniform random delay range applied before sending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DelayRange {
    min: Duration,
    max: Duration,
}

impl DelayRange {
    /// Creates a range; bounds are swapped if given in the wrong order.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// Builds a range from seconds; negative or non-finite values become zero.
    #[must_use]
    pub fn from_secs_f64(min: f64, max: f64) -> Self {
        Self::new(secs(min), secs(max))
    }

    /// Draws a delay.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        rng.random_range(self.min..=self.max)
    }

    /// Returns `true` when no delay is ever applied.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.max.is_zero()
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// An action as one account sees it.
#[derive(Debug, Clone)]
pub struct ResolvedAction {
    /// Action name
    pub name: String,
    /// Response shape
    pub button: ResolvedButton,
    /// Whether the action spans two prompts
    pub two_step: bool,
    /// Layered target rule
    pub targets: TargetConfig,
    /// Pre-send delay
    pub delay: DelayRange,
}

// ============================================================================
// Account Snapshot
// ============================================================================

/// How an account joins a game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinAffordance {
    /// Text template; `{token}` is replaced by the message's join token
    pub command: String,
    /// Button clicked when a message has no token
    pub button: Option<String>,
}

impl JoinAffordance {
    /// Builds the join command for a message carrying `token`.
    ///
    /// Returns `None` when there is neither a token nor a join button.
    #[must_use]
    pub fn command_for(&self, token: Option<&str>) -> Option<Command> {
        match (token, &self.button) {
            (Some(token), _) => Some(Command::Text {
                text: self.command.replace(JOIN_TOKEN_PLACEHOLDER, token),
            }),
            (None, Some(button)) => Some(Command::Click {
                choice: button.clone(),
            }),
            (None, None) => None,
        }
    }
}

/// Everything one account needs for a run, resolved once at start.
#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    /// Account
    pub account: AccountId,
    /// Shared compiled state
    pub shared: Arc<SharedState>,
    /// Actions indexed like the configuration's action list
    pub actions: Vec<ResolvedAction>,
    /// Join rule after overrides
    pub join: JoinRule,
    /// How to join
    pub join_affordance: JoinAffordance,
    /// Lifetime of a pending two-step pair
    pub two_step_timeout: Duration,
    /// Degradations found while resolving (malformed pairs)
    pub warnings: Vec<String>,
}

impl AccountSnapshot {
    /// Flattens the configuration for `account`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::UnknownAccount`] if the account is not configured.
    pub fn resolve(shared: &Arc<SharedState>, account: &AccountId) -> Result<Self, WorkerError> {
        let config = &shared.config;
        let account_config = config
            .account(account)
            .ok_or_else(|| WorkerError::UnknownAccount(account.clone()))?;

        let mut warnings = Vec::new();
        let actions = config
            .actions
            .iter()
            .map(|action| {
                let mut targets = TargetConfig::layered(
                    &action.targets,
                    &action.target_pairs,
                    account_config.targets.get(&action.name),
                );
                for (first, second) in targets.retain_well_formed_pairs() {
                    warnings.push(format!(
                        "action '{}': skipping malformed target pair [{first:?}, {second:?}]",
                        action.name
                    ));
                }

                let button = match action.button {
                    ButtonType::PlayerList => ResolvedButton::PlayerList,
                    ButtonType::YesNo => ResolvedButton::YesNo(action.answer),
                    ButtonType::Fixed => {
                        let response = action.response.as_ref();
                        ResolvedButton::Fixed {
                            text: response.map(|r| r.text.clone()).unwrap_or_default(),
                            send_as: response.map(|r| r.send_as).unwrap_or_default(),
                        }
                    }
                };

                ResolvedAction {
                    name: action.name.clone(),
                    button,
                    two_step: action.two_step && action.button == ButtonType::PlayerList,
                    targets,
                    delay: DelayRange::from_secs_f64(
                        account_config
                            .delay_min_seconds
                            .unwrap_or(action.delay_min_seconds),
                        account_config
                            .delay_max_seconds
                            .unwrap_or(action.delay_max_seconds),
                    ),
                }
            })
            .collect();

        let join = JoinRule {
            max_attempts: account_config
                .join
                .max_attempts
                .unwrap_or(config.join.max_attempts)
                .max(1),
            cooldown: secs(
                account_config
                    .join
                    .cooldown_seconds
                    .unwrap_or(config.join.cooldown_seconds),
            ),
        };

        Ok(Self {
            account: account.clone(),
            shared: Arc::clone(shared),
            actions,
            join,
            join_affordance: JoinAffordance {
                command: config.join.command.clone(),
                button: config.join.button.clone(),
            },
            two_step_timeout: Duration::from_secs(config.two_step_timeout_seconds),
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn shared(yaml: &str) -> Arc<SharedState> {
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        Arc::new(SharedState::build(Arc::new(config), &MatcherLimits::default()))
    }

    const CONFIG: &str = r#"
moderators: [10]
join: { max_attempts: 3, cooldown_seconds: 2.5, button: "Join" }
actions:
  - name: vote
    button: player_list
    targets: { priority_list: [alice], blacklist: [bob], random_fallback: true }
    delay_min_seconds: 1
    delay_max_seconds: 2
  - name: cupid
    button: player_list
    two_step: true
    target_pairs: [[carol, dave], [eve, eve], ["", x]]
  - name: skip
    button: fixed
    response: { text: "Skip", send_as: message }
accounts:
  - id: main
  - id: alt
    join: { max_attempts: 1 }
    delay_max_seconds: 0
    delay_min_seconds: 0
    targets:
      vote: { priority_list: [erin] }
"#;

    #[test]
    fn test_resolves_account_overrides() {
        let shared = shared(CONFIG);
        let main = AccountSnapshot::resolve(&shared, &AccountId::new("main")).unwrap();
        let alt = AccountSnapshot::resolve(&shared, &AccountId::new("alt")).unwrap();

        assert_eq!(main.join.max_attempts, 3);
        assert_eq!(main.join.cooldown, Duration::from_millis(2500));
        assert_eq!(alt.join.max_attempts, 1);
        assert_eq!(alt.join.cooldown, Duration::from_millis(2500));

        assert_eq!(main.actions[0].targets.priority_list, vec!["alice"]);
        assert_eq!(alt.actions[0].targets.priority_list, vec!["erin"]);
        assert_eq!(alt.actions[0].targets.blacklist, vec!["bob"]);

        assert!(!main.actions[0].delay.is_zero());
        assert!(alt.actions[0].delay.is_zero());
    }

    #[test]
    fn test_malformed_pairs_become_warnings() {
        let shared = shared(CONFIG);
        let main = AccountSnapshot::resolve(&shared, &AccountId::new("main")).unwrap();
        assert_eq!(main.actions[1].targets.target_pairs.len(), 1);
        assert_eq!(main.warnings.len(), 2);
        assert!(main.warnings[0].contains("cupid"));
    }

    #[test]
    fn test_unknown_account() {
        let shared = shared(CONFIG);
        let err = AccountSnapshot::resolve(&shared, &AccountId::new("ghost")).unwrap_err();
        assert!(matches!(err, WorkerError::UnknownAccount(_)));
    }

    #[test]
    fn test_fixed_response_resolved() {
        let shared = shared(CONFIG);
        let main = AccountSnapshot::resolve(&shared, &AccountId::new("main")).unwrap();
        assert_eq!(
            main.actions[2].button,
            ResolvedButton::Fixed {
                text: "Skip".to_string(),
                send_as: SendAs::Message
            }
        );
    }

    #[test]
    fn test_moderator_filter() {
        let shared = shared(CONFIG);
        assert!(shared.is_moderator(10));
        assert!(!shared.is_moderator(11));

        let open = self::shared("accounts: [{ id: a }]");
        assert!(open.is_moderator(12345));
    }

    #[test]
    fn test_join_affordance() {
        let affordance = JoinAffordance {
            command: "/start {token}".to_string(),
            button: Some("Join".to_string()),
        };
        assert_eq!(
            affordance.command_for(Some("abc")),
            Some(Command::Text {
                text: "/start abc".to_string()
            })
        );
        assert_eq!(
            affordance.command_for(None),
            Some(Command::Click {
                choice: "Join".to_string()
            })
        );
        let bare = JoinAffordance {
            command: "/start {token}".to_string(),
            button: None,
        };
        assert!(bare.command_for(None).is_none());
    }

    #[test]
    fn test_delay_range_sampling() {
        let range = DelayRange::from_secs_f64(2.0, 1.0);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let delay = range.sample(&mut rng);
            assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_secs(2));
        }
        assert_eq!(
            DelayRange::from_secs_f64(-1.0, f64::NAN).sample(&mut rng),
            Duration::ZERO
        );
    }
}
