//! Textual progress lines from older servers.
//!
//! Recognized forms, case-insensitive:
//!
//! ```text
//! Processing account ACC1
//! Total days: 120
//! Total days for ACC1: 120
//! Processing date 3 of 120 for ACC1 (2024-03-11)
//! Completed account ACC1: 42 orders
//! Account ACC1 failed: <reason>
//! ```

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::domain::progress::ProgressEvent;

static STARTED: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)^processing account ([^\s:]+)$"));
static TOTAL: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)^total days(?: for ([^\s:]+))?:\s*(\d+)$"));
static DAY: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)^processing date (\d+) of (\d+) for ([^\s:]+) \((\d{4}-\d{2}-\d{2})\)$")
});
static COMPLETED: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)^completed account ([^\s:]+)(?::\s*(\d+) orders?)?$"));
static FAILED: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)^account ([^\s:]+) failed:\s*(.+)$"));

#[allow(clippy::unwrap_used)]
fn compile(pattern: &str) -> Regex {
    // Patterns are literals above.
    Regex::new(pattern).unwrap()
}

/// Translate one textual progress line into a typed event.
///
/// Returns `None` for lines that carry no progress.
#[must_use]
pub fn translate_log_line(line: &str) -> Option<ProgressEvent> {
    let line = line.trim();

    if let Some(caps) = DAY.captures(line) {
        return Some(ProgressEvent::DayProgress {
            day: caps[1].parse().ok()?,
            total_days: caps[2].parse().ok()?,
            account: caps[3].to_string(),
            date: NaiveDate::parse_from_str(&caps[4], "%Y-%m-%d").ok()?,
        });
    }
    if let Some(caps) = TOTAL.captures(line) {
        return Some(ProgressEvent::TotalDays {
            account: caps.get(1).map(|m| m.as_str().to_string()),
            total_days: caps[2].parse().ok()?,
        });
    }
    if let Some(caps) = STARTED.captures(line) {
        return Some(ProgressEvent::AccountStarted {
            account: caps[1].to_string(),
        });
    }
    if let Some(caps) = COMPLETED.captures(line) {
        return Some(ProgressEvent::AccountCompleted {
            account: caps[1].to_string(),
            orders: caps.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?,
        });
    }
    if let Some(caps) = FAILED.captures(line) {
        return Some(ProgressEvent::AccountFailed {
            account: caps[1].to_string(),
            error: caps[2].to_string(),
        });
    }
    None
}
