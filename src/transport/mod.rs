//! Transport collaborator interface
//!
//! The engine never talks to the chat network itself. Inbound messages are
//! handed to the coordinator by whoever owns the connection, and outbound
//! decisions leave through a [`Transport`]: a button click or a text message.
//! Sends are fire-and-forget; a returned error is logged and counted by the
//! caller and never retried.

pub mod channel;
pub mod stdio;

pub use channel::ChannelTransport;
pub use stdio::{BridgeInput, BridgeReader, StdioBridge};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::worker::AccountId;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Default maximum inbound line size in bytes (1 MB).
pub const DEFAULT_MAX_LINE_SIZE: usize = 1024 * 1024;

// ============================================================================
// Messages
// ============================================================================

/// A chat message delivered to one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// When the transport received the message
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Chat id of the sender
    pub sender_id: i64,

    /// Message text
    #[serde(default)]
    pub text: String,

    /// Labels of the inline buttons attached to the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_candidates: Option<Vec<String>>,

    /// Deep-link token offered for joining the game
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_token: Option<String>,
}

impl InboundMessage {
    /// Creates a message without buttons or join token, stamped now.
    pub fn new(sender_id: i64, text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            sender_id,
            text: text.into(),
            button_candidates: None,
            join_token: None,
        }
    }

    /// Attaches button labels.
    #[must_use]
    pub fn with_buttons<I, S>(mut self, buttons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.button_candidates = Some(buttons.into_iter().map(Into::into).collect());
        self
    }

    /// Attaches a join token.
    #[must_use]
    pub fn with_join_token(mut self, token: impl Into<String>) -> Self {
        self.join_token = Some(token.into());
        self
    }

    /// Button labels, if any were supplied.
    #[must_use]
    pub fn candidates(&self) -> Option<&[String]> {
        self.button_candidates.as_deref()
    }
}

/// What to send on behalf of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Click the button carrying `choice`.
    Click {
        /// Button label
        choice: String,
    },
    /// Send `text` as a chat message.
    Text {
        /// Message body
        text: String,
    },
}

impl Command {
    /// Short name for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Click { .. } => "click",
            Self::Text { .. } => "text",
        }
    }

    /// The label or text carried by the command.
    #[must_use]
    pub fn payload(&self) -> &str {
        match self {
            Self::Click { choice } => choice,
            Self::Text { text } => text,
        }
    }
}

/// A command addressed to an account, as written to the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundCommand {
    /// Account that sends
    pub account: AccountId,

    /// The command itself
    #[serde(flatten)]
    pub command: Command,
}

// ============================================================================
// Transport Trait
// ============================================================================

/// Outbound side of the chat transport.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Clicks the button labelled `choice` as `account`.
    async fn send_click(&self, account: &AccountId, choice: &str) -> Result<()>;

    /// Sends `text` as `account`.
    async fn send_text(&self, account: &AccountId, text: &str) -> Result<()>;

    /// Sends a [`Command`].
    async fn execute(&self, account: &AccountId, command: &Command) -> Result<()> {
        match command {
            Command::Click { choice } => self.send_click(account, choice).await,
            Command::Text { text } => self.send_text(account, text).await,
        }
    }
}

/// Truncates and strips control characters from untrusted text before logging.
#[must_use]
pub fn sanitize_for_log(input: &str, max_len: usize) -> String {
    input
        .chars()
        .take(max_len)
        .map(|c| {
            if c.is_control() && c != '\t' {
                '\u{FFFD}'
            } else {
                c
            }
        })
        .collect()
}
