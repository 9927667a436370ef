//! Allowed phase transitions
//!
//! The base cycle is always allowed. Escape targets and extra edges come
//! from [`TransitionConfig`].

use crate::config::schema::TransitionConfig;
use crate::phase::state::Phase;

const PHASES: usize = Phase::ALL.len();

/// Adjacency matrix of allowed `from → to` phase transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionTable {
    allowed: [[bool; PHASES]; PHASES],
}

impl TransitionTable {
    /// Creates a table containing only the base cycle.
    #[must_use]
    pub fn cycle_only() -> Self {
        let mut table = Self {
            allowed: [[false; PHASES]; PHASES],
        };
        for phase in Phase::ALL {
            table.allow(phase, phase.next());
        }
        table
    }

    /// Builds the table from configuration.
    #[must_use]
    pub fn from_config(config: &TransitionConfig) -> Self {
        let mut table = Self::cycle_only();
        for &target in &config.escape_to {
            for from in Phase::ALL {
                table.allow(from, target);
            }
        }
        for &(from, to) in &config.extra {
            table.allow(from, to);
        }
        table
    }

    /// Returns a copy of the table with one more allowed edge.
    #[must_use]
    pub fn with_edge(mut self, from: Phase, to: Phase) -> Self {
        self.allow(from, to);
        self
    }

    /// Returns whether `from → to` is allowed. Self-edges never are.
    #[must_use]
    pub const fn allows(&self, from: Phase, to: Phase) -> bool {
        self.allowed[from.index()][to.index()]
    }

    /// Lists every allowed edge in `(from, to)` order.
    #[must_use]
    pub fn edges(&self) -> Vec<(Phase, Phase)> {
        Phase::ALL
            .iter()
            .flat_map(|&from| Phase::ALL.iter().map(move |&to| (from, to)))
            .filter(|&(from, to)| self.allows(from, to))
            .collect()
    }

    fn allow(&mut self, from: Phase, to: Phase) {
        if from != to {
            self.allowed[from.index()][to.index()] = true;
        }
    }
}

impl Default for TransitionTable {
    fn default() -> Self {
        Self::from_config(&TransitionConfig::default())
    }
}
