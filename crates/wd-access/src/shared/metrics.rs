//! Metrics for the access control core
//!
//! Recorded through the `metrics` facade; the hosting process decides
//! whether and where to export them.

use metrics::{counter, histogram};
use std::time::Duration;

/// A cache population job was accepted by the queue
pub fn record_cache_population_enqueued() {
    counter!("wd_role_cache_population_enqueued_total").increment(1);
}

/// A cache population job was dropped before running
pub fn record_cache_population_dropped(reason: &str) {
    counter!(
        "wd_role_cache_population_dropped_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn record_cache_population_completed(entries: usize, duration: Duration) {
    counter!("wd_role_cache_population_completed_total").increment(1);
    histogram!("wd_role_cache_population_duration_seconds").record(duration.as_secs_f64());
    histogram!("wd_role_cache_population_entries").record(entries as f64);
}

/// A cache population job ran but did not complete (`error` or `timeout`)
pub fn record_cache_population_failed(reason: &str) {
    counter!(
        "wd_role_cache_population_failed_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Outcome of one access check
pub fn record_access_decision(outcome: &str) {
    counter!(
        "wd_access_decisions_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}
