//! Shared integration-test harness: in-process coordinators over a channel
//! transport, and a `phasekeeper run` child process driven over the NDJSON
//! bridge.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use phasekeeper::config::schema::EngineConfig;
use phasekeeper::error::TransportError;
use phasekeeper::observability::EventEmitter;
use phasekeeper::transport::{ChannelTransport, InboundMessage, OutboundCommand, Transport};
use phasekeeper::worker::{AccountId, AccountReport, Coordinator, CoordinatorOptions};

/// Default timeout for a single expected message.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Sender id used as the moderator in every fixture.
pub const MODERATOR: i64 = 777;

/// Returns the path to a test fixture.
#[must_use]
pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Reads and parses a fixture.
#[allow(clippy::missing_panics_doc)]
#[must_use]
pub fn load_fixture(name: &str) -> EngineConfig {
    let raw = std::fs::read_to_string(fixture_path(name)).expect("fixture not found");
    serde_yaml::from_str(&raw).expect("fixture is not valid YAML")
}

/// A moderator message.
#[must_use]
pub fn moderator(text: &str) -> InboundMessage {
    InboundMessage::new(MODERATOR, text)
}

// ============================================================================
// In-process harness
// ============================================================================

/// Coordinator wired to a channel transport.
pub struct Harness {
    pub coordinator: Coordinator,
    pub outbound: mpsc::UnboundedReceiver<OutboundCommand>,
}

impl Harness {
    /// Builds a coordinator for `config` with a fixed seed.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let (transport, outbound) = ChannelTransport::new();
        Self {
            coordinator: coordinator_with(config, Arc::new(transport)),
            outbound,
        }
    }

    /// Waits for the next outbound command.
    #[allow(clippy::missing_panics_doc)]
    pub async fn next_command(&mut self) -> OutboundCommand {
        tokio::time::timeout(DEFAULT_TIMEOUT, self.outbound.recv())
            .await
            .expect("timed out waiting for outbound command")
            .expect("outbound channel closed")
    }

    /// Waits until `account`'s report satisfies `predicate`.
    #[allow(clippy::missing_panics_doc)]
    pub async fn wait_for_report<F>(&self, account: &AccountId, predicate: F) -> AccountReport
    where
        F: FnMut(&AccountReport) -> bool,
    {
        let mut rx = self.coordinator.subscribe(account);
        let report = tokio::time::timeout(DEFAULT_TIMEOUT, rx.wait_for(predicate))
            .await
            .expect("timed out waiting for account report")
            .expect("report channel closed");
        report.clone()
    }
}

/// Builds a coordinator over an arbitrary transport.
#[must_use]
pub fn coordinator_with(config: EngineConfig, transport: Arc<dyn Transport>) -> Coordinator {
    Coordinator::new(
        Arc::new(config),
        transport,
        Arc::new(EventEmitter::noop()),
        CoordinatorOptions {
            seed: Some(42),
            ..CoordinatorOptions::default()
        },
    )
}

/// Transport that panics whenever `doomed` sends, and forwards everything
/// else to an inner channel transport.
pub struct PanickingTransport {
    doomed: AccountId,
    inner: ChannelTransport,
}

impl PanickingTransport {
    /// Creates the transport and the receiver for commands that got through.
    #[must_use]
    pub fn new(doomed: &str) -> (Self, mpsc::UnboundedReceiver<OutboundCommand>) {
        let (inner, rx) = ChannelTransport::new();
        (
            Self {
                doomed: AccountId::new(doomed),
                inner,
            },
            rx,
        )
    }
}

#[async_trait::async_trait]
impl Transport for PanickingTransport {
    async fn send_click(&self, account: &AccountId, choice: &str) -> Result<(), TransportError> {
        assert!(account != &self.doomed, "transport exploded for {account}");
        self.inner.send_click(account, choice).await
    }

    async fn send_text(&self, account: &AccountId, text: &str) -> Result<(), TransportError> {
        assert!(account != &self.doomed, "transport exploded for {account}");
        self.inner.send_text(account, text).await
    }
}

// ============================================================================
// Child process harness
// ============================================================================

/// Runs `phasekeeper` with `args` to completion and captures its output.
#[allow(clippy::missing_panics_doc)]
#[must_use]
pub fn spawn_command(args: &[&str]) -> std::process::Output {
    std::process::Command::new(env!("CARGO_BIN_EXE_phasekeeper"))
        .args(args)
        .output()
        .expect("failed to run phasekeeper")
}

/// A running `phasekeeper run` process.
///
/// The child process is killed on drop via `kill_on_drop(true)`.
pub struct PhaseKeeperProcess {
    child: Child,
    stdin: Option<tokio::process::ChildStdin>,
    reader: BufReader<tokio::process::ChildStdout>,
}

impl PhaseKeeperProcess {
    /// Spawns `phasekeeper run` for the given config; `extra` is appended.
    #[allow(clippy::missing_panics_doc)]
    #[must_use]
    pub fn spawn(config_path: &Path, extra: &[&str]) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_phasekeeper"))
            .args([
                "--quiet",
                "run",
                "--config",
                config_path.to_str().expect("non-UTF-8 config path"),
                "--seed",
                "42",
            ])
            .args(extra)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .expect("failed to spawn phasekeeper");

        let stdin = child.stdin.take().expect("stdin not captured");
        let stdout = child.stdout.take().expect("stdout not captured");
        Self {
            child,
            stdin: Some(stdin),
            reader: BufReader::new(stdout),
        }
    }

    /// Writes one bridge input line.
    #[allow(clippy::missing_panics_doc)]
    pub async fn send(&mut self, input: &Value) {
        let mut line = serde_json::to_string(input).expect("failed to serialize input");
        line.push('\n');
        let stdin = self.stdin.as_mut().expect("stdin already closed");
        stdin
            .write_all(line.as_bytes())
            .await
            .expect("failed to write to stdin");
        stdin.flush().await.expect("failed to flush stdin");
    }

    /// Sends a moderator message to `account`.
    pub async fn send_message(&mut self, account: &str, text: &str, buttons: &[&str]) {
        self.send(&json!({
            "kind": "message",
            "account": account,
            "sender_id": MODERATOR,
            "text": text,
            "button_candidates": buttons,
        }))
        .await;
    }

    /// Reads one outbound command line.
    #[allow(clippy::missing_panics_doc)]
    pub async fn read_command(&mut self) -> Value {
        let mut line = String::new();
        tokio::time::timeout(DEFAULT_TIMEOUT, async {
            loop {
                line.clear();
                let n = self
                    .reader
                    .read_line(&mut line)
                    .await
                    .expect("read_line I/O error");
                assert!(n > 0, "unexpected EOF from phasekeeper");
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    return serde_json::from_str::<Value>(trimmed)
                        .unwrap_or_else(|e| panic!("invalid JSON from phasekeeper: {e}\nline: {line}"));
                }
            }
        })
        .await
        .expect("timed out waiting for outbound command")
    }

    /// Closes stdin and waits for exit; returns the exit code.
    #[allow(clippy::missing_panics_doc)]
    pub async fn shutdown(mut self) -> Option<i32> {
        drop(self.stdin.take());
        match tokio::time::timeout(DEFAULT_TIMEOUT, self.child.wait()).await {
            Ok(status) => status.expect("failed to wait for phasekeeper").code(),
            Err(_) => {
                self.child.kill().await.expect("failed to kill child");
                None
            }
        }
    }
}
