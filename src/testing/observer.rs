//! Result sink notified as a run progresses
//!
//! Notifications are fire-and-forget: a sink cannot influence the run, and the
//! engine never waits on anything a sink does beyond the call itself.

use super::config::TestDefinition;
use super::outcome::{BatchSummary, LoadTestSummary, StepOutcome, TestOutcome};

/// Progress after one step of a test
#[derive(Debug, Clone)]
pub struct TestProgress<'a> {
    /// Steps finished so far, including this one
    pub completed: usize,
    pub total: usize,
    pub step: &'a StepOutcome,
}

pub trait ResultSink: Send + Sync {
    fn on_test_started(&self, _test: &TestDefinition, _flavor: &str) {}

    fn on_test_progress(&self, _test_id: &str, _flavor: &str, _progress: &TestProgress<'_>) {}

    /// Always the last notification for a test
    fn on_test_completed(&self, _outcome: &TestOutcome) {}

    /// Fired once per batch, after every test completed
    fn on_batch_completed(&self, _outcomes: &[TestOutcome], _summary: &BatchSummary) {}

    fn on_load_test_completed(&self, _test_id: &str, _summary: &LoadTestSummary) {}
}

/// Ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ResultSink for NoopSink {}

/// Reports through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ResultSink for LogSink {
    fn on_test_started(&self, test: &TestDefinition, flavor: &str) {
        tracing::info!(test = %test.id, flavor, "Test started");
    }

    fn on_test_progress(&self, test_id: &str, flavor: &str, progress: &TestProgress<'_>) {
        tracing::debug!(
            test = test_id,
            flavor,
            "Step {}/{} '{}' {:?}",
            progress.completed,
            progress.total,
            progress.step.name,
            progress.step.status
        );
    }

    fn on_test_completed(&self, outcome: &TestOutcome) {
        match &outcome.error {
            None => tracing::info!(
                test = %outcome.id,
                flavor = %outcome.flavor,
                "Test passed in {} ms",
                outcome.duration_ms()
            ),
            Some(error) => tracing::warn!(
                test = %outcome.id,
                flavor = %outcome.flavor,
                "Test failed: {}",
                error
            ),
        }
    }

    fn on_batch_completed(&self, _outcomes: &[TestOutcome], summary: &BatchSummary) {
        tracing::info!(
            "Batch finished: {} passed, {} failed, {} total in {} ms",
            summary.passed,
            summary.failed,
            summary.total,
            summary.duration_ms
        );
    }

    fn on_load_test_completed(&self, test_id: &str, summary: &LoadTestSummary) {
        tracing::info!(
            test = test_id,
            "Load test finished: {} requests, {:.1} req/s, avg {:.1} ms",
            summary.total_requests,
            summary.throughput_rps,
            summary.avg_latency_ms
        );
    }
}
