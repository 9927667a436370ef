//! Prometheus metrics.
//!
//! Every recording function is a no-op until [`init_metrics`] installs a
//! global recorder, so the engine records unconditionally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::PhaseKeeperError;
use crate::phase::Phase;
use crate::worker::AccountId;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Maximum length for account id labels.
const MAX_ACCOUNT_LABEL_LEN: usize = 64;

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. Otherwise the recorder is installed without an
/// endpoint.
///
/// # Errors
///
/// Returns `PhaseKeeperError::Io` if the recorder or HTTP listener
/// cannot be installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), PhaseKeeperError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| PhaseKeeperError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "phasekeeper_messages_total",
        "Moderator messages processed per account"
    );
    describe_counter!(
        "phasekeeper_phase_transitions_total",
        "Accepted phase transitions"
    );
    describe_counter!(
        "phasekeeper_rejected_transitions_total",
        "Phase matches rejected by the transition table"
    );
    describe_counter!(
        "phasekeeper_decisions_total",
        "Action commands accepted by the transport"
    );
    describe_counter!(
        "phasekeeper_resolution_failures_total",
        "Matched prompts with no selectable target"
    );
    describe_counter!("phasekeeper_join_attempts_total", "Join attempts made");
    describe_counter!(
        "phasekeeper_ban_warnings_total",
        "Ban warnings seen from the moderator"
    );
    describe_counter!(
        "phasekeeper_worker_failures_total",
        "Account workers that panicked or abandoned joining"
    );
    describe_counter!(
        "phasekeeper_transport_errors_total",
        "Commands the transport rejected or failed to deliver"
    );
    describe_histogram!(
        "phasekeeper_action_delay_ms",
        "Randomized delay before an action command"
    );
    describe_gauge!("phasekeeper_accounts_running", "Accounts currently running");
}

/// Sanitizes an account id for use as a metrics label.
fn account_label(account: &AccountId) -> String {
    account
        .as_str()
        .chars()
        .take(MAX_ACCOUNT_LABEL_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Records a processed moderator message.
pub fn record_message(account: &AccountId) {
    counter!("phasekeeper_messages_total", "account" => account_label(account)).increment(1);
}

/// Records an accepted phase transition.
pub fn record_phase_transition(account: &AccountId, from: Phase, to: Phase) {
    counter!(
        "phasekeeper_phase_transitions_total",
        "account" => account_label(account),
        "from" => from.as_str(),
        "to" => to.as_str(),
    )
    .increment(1);
}

/// Records a phase match the transition table rejected.
pub fn record_rejected_transition(current: Phase, matched: Phase) {
    counter!(
        "phasekeeper_rejected_transitions_total",
        "current" => current.as_str(),
        "matched" => matched.as_str(),
    )
    .increment(1);
}

/// Records an action command the transport accepted.
pub fn record_decision(account: &AccountId, kind: &'static str, delay: Duration) {
    counter!(
        "phasekeeper_decisions_total",
        "account" => account_label(account),
        "command" => kind,
    )
    .increment(1);
    histogram!("phasekeeper_action_delay_ms").record(delay.as_secs_f64() * 1000.0);
}

/// Records a prompt that could not be answered.
///
/// `reason` is one of a fixed set of error names.
pub fn record_resolution_failure(reason: &'static str) {
    counter!("phasekeeper_resolution_failures_total", "reason" => reason).increment(1);
}

/// Records a join attempt.
pub fn record_join_attempt(account: &AccountId) {
    counter!("phasekeeper_join_attempts_total", "account" => account_label(account)).increment(1);
}

/// Records a ban warning.
pub fn record_ban_warning(account: &AccountId) {
    counter!("phasekeeper_ban_warnings_total", "account" => account_label(account)).increment(1);
}

/// Records a worker failure by kind (`panic` or `join_abandoned`).
pub fn record_worker_failure(kind: &'static str) {
    counter!("phasekeeper_worker_failures_total", "kind" => kind).increment(1);
}

/// Records a transport failure.
pub fn record_transport_error() {
    counter!("phasekeeper_transport_errors_total").increment(1);
}

/// Sets the number of running accounts.
#[allow(clippy::cast_precision_loss)]
pub fn set_accounts_running(count: usize) {
    gauge!("phasekeeper_accounts_running").set(count as f64);
}
