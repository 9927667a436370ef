//! Account identity and observable status

use serde::{Deserialize, Serialize};

use crate::phase::Phase;

/// Identifier of a managed account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Creates an account id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Lifecycle status reported to the presentation layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// No worker
    #[default]
    Stopped,
    /// Worker being created
    Starting,
    /// Consuming messages
    Running,
    /// Shutdown requested
    Stopping,
    /// Transport reported a lost connection
    Reconnecting,
    /// Worker failed or hit a safety stop; restart required
    Error,
}

impl AccountStatus {
    /// Returns the `snake_case` name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountReport {
    /// Account
    pub account: AccountId,
    /// Lifecycle status
    pub status: AccountStatus,
    /// Why the account is in its status, when notable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Current phase while a context exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    /// Join attempts in the current round
    pub join_attempts: u32,
    /// Whether joining was abandoned for this run
    pub join_abandoned: bool,
    /// Messages consumed since start
    pub messages_processed: u64,
}

impl AccountReport {
    /// A report for an account without a worker.
    #[must_use]
    pub const fn stopped(account: AccountId) -> Self {
        Self {
            account,
            status: AccountStatus::Stopped,
            reason: None,
            phase: None,
            join_attempts: 0,
            join_abandoned: false,
            messages_processed: 0,
        }
    }
}
