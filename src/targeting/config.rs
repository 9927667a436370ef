//! Resolved target rules
//!
//! An action's `targets` block is the default; an account's override
//! replaces it field by field.

use crate::config::schema::{TargetOverride, TargetPair};

/// Target rule for one action on one account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetConfig {
    /// Explicit targets in preference order
    pub priority_list: Vec<String>,
    /// Players the random fallback never picks
    pub blacklist: Vec<String>,
    /// Whether to pick randomly when no explicit target is present
    pub random_fallback: bool,
    /// Ordered pairs for two-step actions
    pub target_pairs: Vec<TargetPair>,
}

impl TargetConfig {
    /// Layers `account` over `global`.
    ///
    /// `global_pairs` are the action-level pairs, which live beside the
    /// `targets` block rather than inside it.
    #[must_use]
    pub fn layered(
        global: &TargetOverride,
        global_pairs: &[TargetPair],
        account: Option<&TargetOverride>,
    ) -> Self {
        Self {
            priority_list: account
                .and_then(|t| t.priority_list.clone())
                .or_else(|| global.priority_list.clone())
                .unwrap_or_default(),
            blacklist: account
                .and_then(|t| t.blacklist.clone())
                .or_else(|| global.blacklist.clone())
                .unwrap_or_default(),
            random_fallback: account
                .and_then(|t| t.random_fallback)
                .or(global.random_fallback)
                .unwrap_or(false),
            target_pairs: account
                .and_then(|t| t.target_pairs.clone())
                .or_else(|| global.target_pairs.clone())
                .unwrap_or_else(|| global_pairs.to_vec()),
        }
    }

    /// Drops malformed pairs (empty side, or both sides equal) and returns
    /// them for reporting.
    pub fn retain_well_formed_pairs(&mut self) -> Vec<TargetPair> {
        let (kept, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut self.target_pairs)
            .into_iter()
            .partition(is_well_formed);
        self.target_pairs = kept;
        dropped
    }
}

/// Returns whether a pair names two distinct, non-empty players.
#[must_use]
pub fn is_well_formed((first, second): &TargetPair) -> bool {
    let first = first.trim();
    let second = second.trim();
    !first.is_empty() && !second.is_empty() && first.to_lowercase() != second.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Option<Vec<String>> {
        Some(list.iter().map(ToString::to_string).collect())
    }

    fn pair(a: &str, b: &str) -> TargetPair {
        (a.to_string(), b.to_string())
    }

    #[test]
    fn test_global_only() {
        let global = TargetOverride {
            priority_list: names(&["alice"]),
            blacklist: names(&["bob"]),
            random_fallback: Some(true),
            target_pairs: None,
        };
        let config = TargetConfig::layered(&global, &[], None);
        assert_eq!(config.priority_list, vec!["alice"]);
        assert_eq!(config.blacklist, vec!["bob"]);
        assert!(config.random_fallback);
    }

    #[test]
    fn test_account_override_is_field_by_field() {
        let global = TargetOverride {
            priority_list: names(&["alice"]),
            blacklist: names(&["bob"]),
            random_fallback: Some(true),
            target_pairs: None,
        };
        let account = TargetOverride {
            priority_list: names(&["erin"]),
            ..TargetOverride::default()
        };
        let config = TargetConfig::layered(&global, &[], Some(&account));
        assert_eq!(config.priority_list, vec!["erin"]);
        assert_eq!(config.blacklist, vec!["bob"]);
        assert!(config.random_fallback);
    }

    #[test]
    fn test_empty_override_list_replaces_global() {
        let global = TargetOverride {
            blacklist: names(&["bob"]),
            ..TargetOverride::default()
        };
        let account = TargetOverride {
            blacklist: Some(Vec::new()),
            ..TargetOverride::default()
        };
        let config = TargetConfig::layered(&global, &[], Some(&account));
        assert!(config.blacklist.is_empty());
    }

    #[test]
    fn test_pairs_inherit_from_action_level() {
        let pairs = vec![pair("carol", "dave")];
        let config = TargetConfig::layered(&TargetOverride::default(), &pairs, None);
        assert_eq!(config.target_pairs, pairs);
        assert!(!config.random_fallback);

        let account = TargetOverride {
            target_pairs: Some(vec![pair("x", "y")]),
            ..TargetOverride::default()
        };
        let config = TargetConfig::layered(&TargetOverride::default(), &pairs, Some(&account));
        assert_eq!(config.target_pairs, vec![pair("x", "y")]);
    }

    #[test]
    fn test_malformed_pairs_dropped() {
        let mut config = TargetConfig {
            target_pairs: vec![pair("a", "b"), pair("", "b"), pair("Carl", "carl "), pair("c", "d")],
            ..TargetConfig::default()
        };
        let dropped = config.retain_well_formed_pairs();
        assert_eq!(config.target_pairs, vec![pair("a", "b"), pair("c", "d")]);
        assert_eq!(dropped.len(), 2);
    }
}
