//! Compiled pattern catalog
//!
//! Phase markers, action triggers and ban warnings are compiled once per
//! configuration and shared read-only by every account worker.

use std::fmt::Display;
use std::sync::Arc;

use crate::config::schema::EngineConfig;
use crate::detection::matcher::{CompileWarning, MatcherLimits, Pattern, PatternSet};
use crate::phase::Phase;

// ============================================================================
// Labels
// ============================================================================

/// Prompt step of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Single-step actions and the first prompt of two-step actions
    First,
    /// Second prompt of a two-step action
    Second,
}

impl Step {
    /// Maps an authored step number; anything but `2` is the first step.
    #[must_use]
    pub const fn from_number(step: u8) -> Self {
        if step == 2 { Self::Second } else { Self::First }
    }

    /// Returns the authored step number.
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::First => 1,
            Self::Second => 2,
        }
    }
}

/// Label of an action trigger pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTrigger {
    /// Index into the configured actions
    pub action: usize,
    /// Action name, for diagnostics
    pub name: String,
    /// Which prompt this pattern recognizes
    pub step: Step,
}

impl Display for ActionTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "action {} step {}", self.name, self.step.number())
    }
}

/// Label of a ban-warning pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BanWarning;

impl Display for BanWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ban warning")
    }
}

/// A pattern label of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternLabel {
    /// Phase marker
    Phase(Phase),
    /// Action trigger
    Action(ActionTrigger),
    /// Ban warning
    BanWarning,
}

impl Display for PatternLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Phase(phase) => write!(f, "phase {phase}"),
            Self::Action(trigger) => trigger.fmt(f),
            Self::BanWarning => BanWarning.fmt(f),
        }
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Every compiled pattern set of one configuration.
#[derive(Debug, Clone, Default)]
pub struct PatternCatalog {
    /// Phase markers
    pub phases: PatternSet<Phase>,
    /// Action triggers
    pub actions: PatternSet<ActionTrigger>,
    /// Ban warnings, shared with every account's join policy
    pub ban_warnings: Arc<PatternSet<BanWarning>>,
}

impl PatternCatalog {
    /// Compiles all pattern sets of `config`.
    ///
    /// Step numbers on actions that are not two-step are folded into step 1.
    #[must_use]
    pub fn compile(config: &EngineConfig, limits: &MatcherLimits) -> Self {
        let phases = PatternSet::compile(
            config.phase_patterns.iter().map(|p| Pattern {
                text: p.pattern.text.clone(),
                is_regex: p.pattern.regex,
                priority: p.pattern.priority,
                label: p.phase,
            }),
            limits,
        );

        let actions = PatternSet::compile(
            config
                .actions
                .iter()
                .enumerate()
                .flat_map(|(index, action)| {
                    action.patterns.iter().map(move |p| Pattern {
                        text: p.pattern.text.clone(),
                        is_regex: p.pattern.regex,
                        priority: p.pattern.priority,
                        label: ActionTrigger {
                            action: index,
                            name: action.name.clone(),
                            step: if action.two_step {
                                Step::from_number(p.step)
                            } else {
                                Step::First
                            },
                        },
                    })
                }),
            limits,
        );

        let ban_warnings = Arc::new(PatternSet::compile(
            config.ban_warnings.iter().map(|p| Pattern {
                text: p.text.clone(),
                is_regex: p.regex,
                priority: p.priority,
                label: BanWarning,
            }),
            limits,
        ));

        Self {
            phases,
            actions,
            ban_warnings,
        }
    }

    /// All compile warnings across the three sets.
    pub fn warnings(&self) -> impl Iterator<Item = &CompileWarning> {
        self.phases
            .warnings()
            .iter()
            .chain(self.actions.warnings())
            .chain(self.ban_warnings.warnings())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> EngineConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_compiles_all_sets() {
        let config = config(
            r#"
ban_warnings: [{ text: "banned" }]
phase_patterns:
  - { phase: join_time, text: "join now" }
  - { phase: game_end, text: "(broken", regex: true }
actions:
  - name: cupid
    button: player_list
    two_step: true
    target_pairs: [[a, b]]
    patterns:
      - { text: "first lover" }
      - { text: "second lover", step: 2 }
  - name: vote
    button: player_list
    patterns: [{ text: "vote", step: 2 }]
accounts: [{ id: main }]
"#,
        );
        let catalog = PatternCatalog::compile(&config, &MatcherLimits::default());

        assert_eq!(catalog.phases.len(), 2);
        assert_eq!(catalog.actions.len(), 3);
        assert_eq!(catalog.warnings().count(), 1);

        let second = catalog.actions.find("pick the second lover").unwrap();
        assert_eq!(second.pattern.label.step, Step::Second);
        assert_eq!(second.pattern.label.action, 0);

        // step numbers only matter for two-step actions
        let vote = catalog.actions.find("vote!").unwrap();
        assert_eq!(vote.pattern.label.step, Step::First);
        assert_eq!(vote.pattern.label.name, "vote");

        assert!(catalog.ban_warnings.find("you will be BANNED").is_some());
        assert_eq!(
            catalog.phases.find("JOIN NOW please").unwrap().pattern.label,
            Phase::JoinTime
        );
    }

    #[test]
    fn test_label_display() {
        assert_eq!(
            PatternLabel::Phase(Phase::GameStart).to_string(),
            "phase game_start"
        );
        assert_eq!(PatternLabel::BanWarning.to_string(), "ban warning");
        let trigger = ActionTrigger {
            action: 0,
            name: "cupid".to_string(),
            step: Step::Second,
        };
        assert_eq!(PatternLabel::Action(trigger).to_string(), "action cupid step 2");
    }

    #[test]
    fn test_step_from_number() {
        assert_eq!(Step::from_number(1), Step::First);
        assert_eq!(Step::from_number(2), Step::Second);
        assert_eq!(Step::from_number(0), Step::First);
    }
}
