//! Prometheus Metrics Module
//!
//! Exposes sync engine metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Scans**: auto-sync scans by outcome
//! - **Runs**: per-credential sync runs by outcome and duration
//! - **Frames**: inbound sync frames processed and dropped
//! - **Connections**: reconnect attempts and active syncs
//! - **Auth**: token requests by outcome
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the status server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns `BuildError` if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "broker_sync_scans_total",
        "Auto-sync scans by outcome"
    );

    describe_counter!(
        "broker_sync_runs_total",
        "Per-credential sync runs by outcome"
    );
    describe_histogram!(
        "broker_sync_run_seconds",
        "Wall time of per-credential sync runs"
    );

    describe_counter!(
        "broker_sync_frames_received_total",
        "Sync frames applied to progress"
    );
    describe_counter!(
        "broker_sync_frames_dropped_total",
        "Sync frames that could not be attributed to an account"
    );

    describe_counter!(
        "broker_sync_reconnects_total",
        "Reconnect attempts"
    );
    describe_gauge!(
        "broker_sync_active_syncs",
        "Credential sets currently syncing"
    );

    describe_counter!(
        "broker_sync_auth_requests_total",
        "Token requests by outcome"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for an auto-sync scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Outside the scan window.
    OutsideWindow,
    /// No credential set was due.
    NothingDue,
    /// Another process holds the lock.
    LockBusy,
    /// Due credential sets were synced.
    Ran,
}

impl ScanOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::OutsideWindow => "outside_window",
            Self::NothingDue => "nothing_due",
            Self::LockBusy => "lock_busy",
            Self::Ran => "ran",
        }
    }
}

/// Outcome label for a token request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Token granted.
    Granted,
    /// Deferred with a ticket.
    Deferred,
    /// CAPTCHA demanded.
    Captcha,
    /// Credentials rejected.
    Rejected,
}

impl AuthOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Deferred => "deferred",
            Self::Captcha => "captcha",
            Self::Rejected => "rejected",
        }
    }
}

/// Record an auto-sync scan.
pub fn record_scan(outcome: ScanOutcome) {
    counter!("broker_sync_scans_total", "outcome" => outcome.as_str()).increment(1);
}

/// Record a finished sync run.
pub fn record_run(outcome: &'static str, elapsed: Duration) {
    counter!("broker_sync_runs_total", "outcome" => outcome).increment(1);
    histogram!("broker_sync_run_seconds").record(elapsed.as_secs_f64());
}

/// Record a sync frame applied to progress.
pub fn record_frame_received() {
    counter!("broker_sync_frames_received_total").increment(1);
}

/// Record a sync frame that was dropped.
pub fn record_frame_dropped(reason: &'static str) {
    counter!("broker_sync_frames_dropped_total", "reason" => reason).increment(1);
}

/// Record a reconnect attempt.
pub fn record_reconnect() {
    counter!("broker_sync_reconnects_total").increment(1);
}

/// Update the number of credential sets currently syncing.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_syncs(count: usize) {
    gauge!("broker_sync_active_syncs").set(count as f64);
}

/// Record a token request.
pub fn record_auth(outcome: AuthOutcome) {
    counter!("broker_sync_auth_requests_total", "outcome" => outcome.as_str()).increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_outcome_as_str() {
        assert_eq!(ScanOutcome::OutsideWindow.as_str(), "outside_window");
        assert_eq!(ScanOutcome::NothingDue.as_str(), "nothing_due");
        assert_eq!(ScanOutcome::LockBusy.as_str(), "lock_busy");
        assert_eq!(ScanOutcome::Ran.as_str(), "ran");
    }

    #[test]
    fn auth_outcome_as_str() {
        assert_eq!(AuthOutcome::Granted.as_str(), "granted");
        assert_eq!(AuthOutcome::Captcha.as_str(), "captcha");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_scan(ScanOutcome::Ran);
        record_frame_dropped("unknown_account");
        set_active_syncs(2);
    }
}
