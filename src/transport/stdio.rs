//! NDJSON bridge over stdin/stdout.
//!
//! The process that owns the chat connections writes one [`BridgeInput`]
//! per line to our stdin and reads one [`OutboundCommand`] per line from our
//! stdout. Logs never go to stdout.
//!
//! # Edge Cases Handled
//!
//! - Last line without `\n` is still parsed before EOF.
//! - Empty lines are skipped.
//! - Lines over the size limit are drained without buffering and skipped.
//! - Invalid UTF-8 and malformed JSON are logged and skipped.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use serde::{Deserialize, Serialize};

use super::{
    Command, DEFAULT_MAX_LINE_SIZE, InboundMessage, OutboundCommand, Result, Transport,
    sanitize_for_log,
};
use crate::config::loader::env_or;
use crate::worker::{AccountId, Coordinator};

/// Environment variable overriding the inbound line size limit.
pub const MAX_LINE_SIZE_ENV: &str = "PHASEKEEPER_MAX_LINE_SIZE";

/// Inbound size limit from `PHASEKEEPER_MAX_LINE_SIZE`, or the default.
#[must_use]
pub fn max_line_size_from_env() -> usize {
    env_or(MAX_LINE_SIZE_ENV, DEFAULT_MAX_LINE_SIZE)
}

// ============================================================================
// Input
// ============================================================================

/// One line of bridge input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BridgeInput {
    /// A chat message seen by `account`.
    Message {
        /// Receiving account
        account: AccountId,
        /// The message
        #[serde(flatten)]
        message: InboundMessage,
    },
    /// Start a worker for `account`.
    Start {
        /// Account
        account: AccountId,
    },
    /// Stop the worker of `account`.
    Stop {
        /// Account
        account: AccountId,
    },
    /// The connection of `account` was lost or restored.
    Connection {
        /// Account
        account: AccountId,
        /// Whether the account is connected now
        connected: bool,
    },
}

impl BridgeInput {
    /// The account the input is about.
    #[must_use]
    pub const fn account(&self) -> &AccountId {
        match self {
            Self::Message { account, .. }
            | Self::Start { account }
            | Self::Stop { account }
            | Self::Connection { account, .. } => account,
        }
    }
}

/// Bounded NDJSON reader for [`BridgeInput`] lines.
pub struct BridgeReader<R> {
    reader: BufReader<R>,
    max_line_size: usize,
}

impl BridgeReader<tokio::io::Stdin> {
    /// Reads from stdin with the limit from the environment.
    #[must_use]
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin(), max_line_size_from_env())
    }
}

impl<R: AsyncRead + Unpin> BridgeReader<R> {
    /// Wraps `reader`; lines longer than `max_line_size` bytes are skipped.
    pub fn new(reader: R, max_line_size: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_line_size,
        }
    }

    /// Returns the next well-formed input, or `None` at EOF.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if reading fails.
    pub async fn next_input(&mut self) -> Result<Option<BridgeInput>> {
        let read_limit = self.max_line_size.saturating_add(1);
        let mut buf: Vec<u8> = Vec::with_capacity(read_limit.min(64 * 1024));

        loop {
            buf.clear();
            let mut overflowed = false;

            loop {
                let available = self.reader.fill_buf().await?;
                if available.is_empty() {
                    if buf.is_empty() && !overflowed {
                        return Ok(None);
                    }
                    break;
                }

                let (chunk, consumed, at_newline) =
                    match available.iter().position(|&b| b == b'\n') {
                        Some(pos) => (&available[..pos], pos + 1, true),
                        None => (available, available.len(), false),
                    };
                if !overflowed {
                    let remaining = read_limit.saturating_sub(buf.len());
                    let copy_len = chunk.len().min(remaining);
                    buf.extend_from_slice(&chunk[..copy_len]);
                    overflowed = chunk.len() > remaining;
                }
                self.reader.consume(consumed);
                if at_newline {
                    break;
                }
            }

            if overflowed || buf.len() > self.max_line_size {
                tracing::warn!(
                    limit = self.max_line_size,
                    "bridge line exceeds size limit, skipping"
                );
                continue;
            }

            let line = match std::str::from_utf8(&buf) {
                Ok(s) => s.trim(),
                Err(e) => {
                    tracing::warn!("invalid UTF-8 on bridge, skipping line: {e}");
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<BridgeInput>(line) {
                Ok(input) => return Ok(Some(input)),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        line = %sanitize_for_log(line, 200),
                        "malformed bridge input, skipping"
                    );
                }
            }
        }
    }
}

// ============================================================================
// Output
// ============================================================================

/// Writes [`OutboundCommand`] lines.
pub struct StdioBridge<W> {
    writer: Mutex<BufWriter<W>>,
}

impl StdioBridge<tokio::io::Stdout> {
    /// Writes to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> std::fmt::Debug for StdioBridge<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioBridge").finish_non_exhaustive()
    }
}

impl<W: AsyncWrite + Unpin + Send> StdioBridge<W> {
    /// Wraps `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
        }
    }

    /// Unwraps the writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner().into_inner()
    }

    async fn write_command(&self, command: &OutboundCommand) -> Result<()> {
        let serialized = serde_json::to_string(command)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(serialized.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        drop(writer);
        Ok(())
    }
}

#[async_trait::async_trait]
impl<W: AsyncWrite + Unpin + Send> Transport for StdioBridge<W> {
    async fn send_click(&self, account: &AccountId, choice: &str) -> Result<()> {
        self.write_command(&OutboundCommand {
            account: account.clone(),
            command: Command::Click {
                choice: choice.to_owned(),
            },
        })
        .await
    }

    async fn send_text(&self, account: &AccountId, text: &str) -> Result<()> {
        self.write_command(&OutboundCommand {
            account: account.clone(),
            command: Command::Text {
                text: text.to_owned(),
            },
        })
        .await
    }
}

// ============================================================================
// Pump
// ============================================================================

/// Feeds bridge input into `coordinator` until EOF or cancellation.
///
/// Requests the coordinator refuses are logged and skipped. Returns the
/// number of inputs read.
///
/// # Errors
///
/// Returns an I/O error if reading fails.
pub async fn pump<R: AsyncRead + Unpin>(
    reader: &mut BridgeReader<R>,
    coordinator: &Coordinator,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut count = 0_u64;
    loop {
        let input = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("bridge cancelled");
                break;
            }
            input = reader.next_input() => input?,
        };
        let Some(input) = input else {
            tracing::info!("bridge input closed");
            break;
        };
        count += 1;

        let account = input.account().clone();
        let result = match input {
            BridgeInput::Message { message, .. } => coordinator.dispatch(&account, message),
            BridgeInput::Start { .. } => coordinator.start_account(&account),
            BridgeInput::Stop { .. } => coordinator.stop_account(&account).await,
            BridgeInput::Connection { connected, .. } => {
                coordinator.report_connection(&account, connected)
            }
        };
        if let Err(e) = result {
            tracing::warn!(%account, error = %e, "bridge request refused");
        }
    }
    Ok(count)
}
