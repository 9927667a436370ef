//! Error types for `phasekeeper`
//!
//! Configuration errors, transport failures, and worker lifecycle errors are
//! aggregated into [`PhaseKeeperError`], which maps every variant to a process
//! exit code. Resolution failures are not errors of the run; they are the
//! non-fatal outcomes carried by [`ResolutionError`].

use std::path::PathBuf;
use thiserror::Error;

use crate::worker::AccountId;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `phasekeeper` CLI operations.
///
/// These codes follow Unix conventions.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// The configuration could not be loaded or failed validation
    pub const CONFIG_ERROR: i32 = 2;

    /// Reading stdin or writing the events file failed
    pub const IO_ERROR: i32 = 3;

    /// Transport error (bridge closed, command rejected)
    pub const TRANSPORT_ERROR: i32 = 4;

    /// Worker lifecycle error (unknown account, already running)
    pub const WORKER_ERROR: i32 = 5;

    /// Command-line arguments were rejected
    pub const USAGE_ERROR: i32 = 64;

    /// Second Ctrl+C during shutdown
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `phasekeeper` operations.
#[derive(Debug, Error)]
pub enum PhaseKeeperError {
    /// The configuration file was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport layer error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Worker lifecycle error
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Output or input JSON was malformed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl PhaseKeeperError {
    /// Process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Transport(_) => ExitCode::TRANSPORT_ERROR,
            Self::Worker(_) => ExitCode::WORKER_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Why a configuration file was rejected.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// File being parsed
        path: PathBuf,
        /// 1-based line reported by the YAML parser
        line: Option<usize>,
        /// Parser message
        message: String,
    },

    /// At least one validation error was found
    #[error("validation failed for {path}: {}", summarize(errors))]
    ValidationError {
        /// File that was validated
        path: String,
        /// Every error-severity issue, in discovery order
        errors: Vec<ValidationIssue>,
    },

    /// The configuration file does not exist or cannot be read
    #[error("file not found: {path}")]
    MissingFile {
        /// Requested path
        path: PathBuf,
    },

    /// A value is outside the accepted range
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Offending field
        field: String,
        /// Value found
        value: String,
        /// Accepted range
        expected: String,
    },
}

fn summarize(errors: &[ValidationIssue]) -> String {
    match errors {
        [] => "no details".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
    }
}

// ============================================================================
// Validation Types
// ============================================================================

/// One problem found while validating a configuration.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., "actions[2].target_pairs[0]")
    pub path: String,
    /// What is wrong
    pub message: String,
    /// Whether the issue refuses the load
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{severity}: {} at {}", self.message, self.path)
    }
}

/// How serious a [`ValidationIssue`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The run refuses to start
    Error,
    /// Warning - degraded but usable configuration
    Warning,
}

// ============================================================================
// Transport Errors
// ============================================================================

/// Errors reported by a transport collaborator.
///
/// The engine treats commands as fire-and-forget: these are logged and
/// counted, never retried.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Writing to the bridge failed
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A command could not be encoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The outbound side of the transport is gone
    #[error("transport closed: {0}")]
    Closed(String),

    /// The transport refused the command
    #[error("command rejected: {0}")]
    Rejected(String),
}

// ============================================================================
// Worker Errors
// ============================================================================

/// Worker lifecycle errors raised by the coordinator.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The account is not present in the configuration
    #[error("unknown account '{0}'")]
    UnknownAccount(AccountId),

    /// The account already has a live worker
    #[error("account '{0}' is already running")]
    AlreadyRunning(AccountId),

    /// The account has no live worker to receive the request
    #[error("account '{0}' is not running")]
    NotRunning(AccountId),
}

// ============================================================================
// Resolution Failures
// ============================================================================

/// Non-fatal target resolution failures.
///
/// These are recorded as observable outcomes; message processing continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// No candidate survived the priority list, blacklist and fallback rules
    #[error("no eligible target")]
    NoEligibleTarget,

    /// A second-step prompt arrived without an acknowledged first step
    #[error("no active pair for second step")]
    NoActivePair,
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `phasekeeper` operations.
pub type Result<T> = std::result::Result<T, PhaseKeeperError>;

// ============================================================================
// Tests
// ============================================================================
