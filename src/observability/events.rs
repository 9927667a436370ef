//! Structured event stream for the presentation layer.
//!
//! Typed events are serialized as newline-delimited JSON (JSONL) with a
//! monotonically increasing sequence number. Emission never fails the caller.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::phase::Phase;
use crate::worker::{AccountId, AccountStatus};

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete event emitted while accounts run.
///
/// Each variant is tagged with `"type"` when serialized to JSON.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// An account changed lifecycle status.
    AccountStatusChanged {
        /// When the change happened.
        timestamp: DateTime<Utc>,
        /// Account.
        account: AccountId,
        /// New status.
        status: AccountStatus,
        /// Why, when notable.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// An account entered a new phase.
    PhaseChanged {
        /// When the transition occurred.
        timestamp: DateTime<Utc>,
        /// Account.
        account: AccountId,
        /// Previous phase.
        from: Phase,
        /// New phase.
        to: Phase,
    },

    /// An action command was accepted by the transport.
    ActionTaken {
        /// When the command was sent.
        timestamp: DateTime<Utc>,
        /// Account.
        account: AccountId,
        /// Action name.
        action: String,
        /// Prompt step.
        step: u8,
        /// `"click"` or `"text"`.
        command: String,
        /// Button label or text sent.
        choice: String,
    },

    /// An action matched but no target could be selected.
    NoEligibleTarget {
        /// When the prompt was evaluated.
        timestamp: DateTime<Utc>,
        /// Account.
        account: AccountId,
        /// Action name.
        action: String,
        /// Prompt step.
        step: u8,
    },

    /// A second-step prompt arrived without an acknowledged first step.
    NoActivePair {
        /// When the prompt was evaluated.
        timestamp: DateTime<Utc>,
        /// Account.
        account: AccountId,
        /// Action name.
        action: String,
    },

    /// A join attempt was made.
    JoinAttempted {
        /// When the attempt was made.
        timestamp: DateTime<Utc>,
        /// Account.
        account: AccountId,
        /// 1-based attempt within the round.
        attempt: u32,
        /// Attempts allowed per round.
        max_attempts: u32,
        /// Whether a join command was sent.
        sent: bool,
    },

    /// Joining was abandoned for the rest of the run.
    JoinAbandoned {
        /// When the policy gave up.
        timestamp: DateTime<Utc>,
        /// Account.
        account: AccountId,
        /// Human-readable reason.
        reason: String,
    },

    /// The moderator posted a ban warning.
    BanWarningDetected {
        /// When the warning was seen.
        timestamp: DateTime<Utc>,
        /// Account.
        account: AccountId,
        /// Pattern that matched.
        pattern: String,
    },

    /// A configuration problem degraded the run.
    ConfigWarning {
        /// When the warning was raised.
        timestamp: DateTime<Utc>,
        /// Account the warning applies to, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        account: Option<AccountId>,
        /// Description.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// One JSONL line: the event plus its position in the stream.
#[derive(Serialize)]
struct Sequenced<'a> {
    sequence: u64,
    #[serde(flatten)]
    event: &'a Event,
}

/// Writes [`Event`]s as JSONL to a shared sink.
///
/// Every worker holds the same emitter, so lines are written under a lock
/// and numbered from 0. A line that fails to serialize or write is dropped.
pub struct EventEmitter {
    sink: Mutex<BufWriter<Box<dyn Write + Send>>>,
    next_sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("emitted", &self.event_count())
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Emitter over an arbitrary sink.
    #[must_use]
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Mutex::new(BufWriter::new(sink)),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Emitter over stderr; stdout belongs to the NDJSON bridge.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Emitter that numbers events but writes nothing.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Emitter over a newly created (truncated) file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if `path` cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        std::fs::File::create(path).map(|file| Self::new(Box::new(file)))
    }

    /// Numbers `event` and writes it as one line.
    pub fn emit(&self, event: Event) {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let Ok(mut sink) = self.sink.lock() else {
            return;
        };
        let line = Sequenced {
            sequence,
            event: &event,
        };
        if serde_json::to_writer(&mut *sink, &line).is_ok() {
            let _ = sink.write_all(b"\n");
            let _ = sink.flush();
        }
    }

    /// Events emitted so far, including dropped lines.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.next_sequence.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
