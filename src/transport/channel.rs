//! In-process transport backed by a tokio channel.
//!
//! Commands are pushed as [`OutboundCommand`]s to the receiver returned by
//! [`ChannelTransport::new`]. Used by embedding applications and tests.

use tokio::sync::mpsc;

use super::{Command, OutboundCommand, Result, Transport};
use crate::error::TransportError;
use crate::worker::AccountId;

/// Transport that forwards commands into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<OutboundCommand>,
}

impl ChannelTransport {
    /// Creates the transport and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn push(&self, account: &AccountId, command: Command) -> Result<()> {
        self.tx
            .send(OutboundCommand {
                account: account.clone(),
                command,
            })
            .map_err(|_| TransportError::Closed("outbound channel receiver dropped".to_string()))
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn send_click(&self, account: &AccountId, choice: &str) -> Result<()> {
        self.push(
            account,
            Command::Click {
                choice: choice.to_string(),
            },
        )
    }

    async fn send_text(&self, account: &AccountId, text: &str) -> Result<()> {
        self.push(
            account,
            Command::Text {
                text: text.to_string(),
            },
        )
    }
}
