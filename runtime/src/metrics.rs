//! Metrics for harness runs.
//!
//! Recorded through the `metrics` facade. The harness installs no exporter;
//! whoever embeds it chooses one (or none, in which case recording is a no-op).
//!
//! - `harness_scenarios_total{outcome}`, outcome label or `aborted`
//! - `harness_interrupts_total`
//! - `harness_duplicate_pairs_total`
//! - `harness_retries_total{operation}`
//! - `harness_submission_duration_seconds`
//! - `harness_release_skew_seconds`

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::sync::Once;
use std::time::Duration;

static REGISTER: Once = Once::new();

/// Register all metric descriptions. Idempotent.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        describe_counter!(
            "harness_scenarios_total",
            "Total number of scenarios run, by outcome"
        );
        describe_counter!(
            "harness_interrupts_total",
            "Total number of interrupts injected into in-flight submissions"
        );
        describe_counter!(
            "harness_duplicate_pairs_total",
            "Total number of content-identical order pairs detected"
        );
        describe_counter!(
            "harness_retries_total",
            "Total number of local retries of transient capability failures"
        );
        describe_histogram!(
            "harness_submission_duration_seconds",
            "Time from submitting an order until the actor settled"
        );
        describe_histogram!(
            "harness_release_skew_seconds",
            "Spread between the first and last dispatch of a concurrent release"
        );
    });
}

/// Harness metrics recorder.
pub struct HarnessMetrics;

impl HarnessMetrics {
    /// Record a finished scenario.
    pub fn record_scenario(outcome: &'static str) {
        counter!("harness_scenarios_total", "outcome" => outcome).increment(1);
    }

    /// Record an injected interrupt.
    pub fn record_interrupt() {
        counter!("harness_interrupts_total").increment(1);
    }

    /// Record detected duplicate pairs.
    pub fn record_duplicates(pairs: usize) {
        if pairs > 0 {
            counter!("harness_duplicate_pairs_total").increment(u64::try_from(pairs).unwrap_or(u64::MAX));
        }
    }

    /// Record a local retry.
    pub fn record_retry(operation: &str) {
        counter!("harness_retries_total", "operation" => operation.to_string()).increment(1);
    }

    /// Record how long a submission took to settle.
    pub fn record_submission(duration: Duration) {
        histogram!("harness_submission_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record the dispatch spread of a concurrent release.
    pub fn record_release_skew(skew: Duration) {
        histogram!("harness_release_skew_seconds").record(skew.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_a_recorder_is_a_no_op() {
        register_metrics();
        register_metrics();
        HarnessMetrics::record_scenario("pass");
        HarnessMetrics::record_interrupt();
        HarnessMetrics::record_duplicates(0);
        HarnessMetrics::record_retry("list_orders");
        HarnessMetrics::record_submission(Duration::from_secs(3));
        HarnessMetrics::record_release_skew(Duration::from_millis(5));
    }
}
