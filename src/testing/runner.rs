//! Test runner: one test on one context flavor
//!
//! Drives `pending -> running -> {passed, failed}`. The context is destroyed
//! on every exit path, including step panics and the whole-test timeout, and
//! `on_test_completed` is always the last notification.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;

use crate::common::Error;
use crate::driver::{ContextProvider, ExecutionContext, HTTP_FLAVOR};

use super::config::TestDefinition;
use super::interpreter::StepInterpreter;
use super::observer::{ResultSink, TestProgress};
use super::outcome::{Screenshot, ScreenshotKind, Status, StepOutcome, TestOutcome};
use super::registry::{RunRegistry, TestState};
use super::vars::VariableStore;

/// The step currently executing, kept outside the step future so a timeout
/// or panic can still record it
struct InFlight {
    name: String,
    action: &'static str,
    start_time: DateTime<Utc>,
}

impl InFlight {
    fn into_failed(self, error: String, end_time: DateTime<Utc>) -> StepOutcome {
        StepOutcome {
            name: self.name,
            action: self.action.to_string(),
            status: Status::Failed,
            end_time: end_time.max(self.start_time),
            start_time: self.start_time,
            error: Some(error),
            screenshot: None,
        }
    }
}

pub struct TestRunner {
    interpreter: Arc<StepInterpreter>,
    provider: Arc<dyn ContextProvider>,
    sink: Arc<dyn ResultSink>,
    registry: RunRegistry,
    /// Ceiling for tests that do not set `timeout_ms`
    test_timeout: Duration,
}

impl TestRunner {
    pub fn new(
        interpreter: Arc<StepInterpreter>,
        provider: Arc<dyn ContextProvider>,
        sink: Arc<dyn ResultSink>,
        registry: RunRegistry,
        test_timeout: Duration,
    ) -> Self {
        Self {
            interpreter,
            provider,
            sink,
            registry,
            test_timeout,
        }
    }

    /// Run `test` in a fresh context of `flavor`
    ///
    /// Never fails: every error, including context acquisition, ends up in
    /// the returned outcome.
    pub async fn run(&self, test: &TestDefinition, flavor: &str) -> TestOutcome {
        let clock = self.interpreter.clock().clone();
        self.registry.register(&test.id, flavor);

        let mut outcome = TestOutcome::start(&test.id, &test.name, flavor, clock.now());
        self.sink.on_test_started(test, flavor);
        self.registry.set_state(&test.id, flavor, TestState::Running);
        tracing::info!(test = %test.id, flavor, "Running test '{}'", test.name);

        match self.provider.create_context(flavor, &test.context).await {
            Ok(mut context) => {
                self.run_in_context(test, context.as_mut(), &mut outcome).await;
                if let Err(e) = context.destroy().await {
                    tracing::warn!(test = %test.id, flavor, "Failed to destroy context: {}", e);
                }
            }
            Err(e) => {
                tracing::warn!(test = %test.id, flavor, "{}", e);
                outcome.fail(e.to_string());
            }
        }

        outcome.finish(clock.now());
        self.registry.finish(&test.id, flavor, outcome.passed());
        self.sink.on_test_completed(&outcome);
        outcome
    }

    async fn run_in_context(
        &self,
        test: &TestDefinition,
        context: &mut dyn ExecutionContext,
        outcome: &mut TestOutcome,
    ) {
        let mut vars = VariableStore::new();
        let ceiling = test
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.test_timeout);

        let mut in_flight = None;
        let steps = AssertUnwindSafe(self.run_steps(
            test,
            &mut *context,
            &mut vars,
            &mut *outcome,
            &mut in_flight,
        ));
        let finished = tokio::time::timeout(ceiling, steps.catch_unwind()).await;
        let aborted = match finished {
            Ok(Ok(())) => None,
            Ok(Err(panic)) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "step panicked".to_string());
                Some(Error::Internal(message).to_string())
            }
            Err(_) => {
                let ms = ceiling.as_millis().min(u128::from(u64::MAX)) as u64;
                Some(Error::timeout(format!("test '{}'", test.id), ms).to_string())
            }
        };
        if let Some(error) = aborted {
            // The interrupted step closes the trail
            if let Some(step) = in_flight.take() {
                let now = self.interpreter.clock().now();
                outcome.steps.push(step.into_failed(error.clone(), now));
            }
            outcome.fail(error);
        }

        if !outcome.passed() && context.flavor() != HTTP_FLAVOR {
            self.capture_failure(context, outcome).await;
        }

        for step in &test.cleanup {
            let result = self
                .interpreter
                .execute(step, &mut *context, &mut vars, &test.context)
                .await;
            if let Some(error) = &result.error {
                tracing::warn!(test = %test.id, "Cleanup step '{}' failed: {}", result.outcome.name, error);
            }
            outcome.cleanup.push(result.outcome);
        }
    }

    async fn run_steps(
        &self,
        test: &TestDefinition,
        context: &mut dyn ExecutionContext,
        vars: &mut VariableStore,
        outcome: &mut TestOutcome,
        in_flight: &mut Option<InFlight>,
    ) {
        let total = test.steps.len();
        for step in &test.steps {
            if self.registry.is_stopped(&test.id) {
                tracing::info!(test = %test.id, "Stop requested; skipping remaining steps");
                outcome.fail(Error::Stopped(test.id.clone()).to_string());
                return;
            }

            *in_flight = Some(InFlight {
                name: step.display_name(),
                action: step.kind.action(),
                start_time: self.interpreter.clock().now(),
            });
            let result = self
                .interpreter
                .execute(step, &mut *context, vars, &test.context)
                .await;
            *in_flight = None;
            let blocking = result.is_blocking(step);

            if let Some(data) = &result.outcome.screenshot {
                outcome.screenshots.push(Screenshot {
                    kind: ScreenshotKind::Step,
                    data: data.clone(),
                    timestamp: result.outcome.end_time,
                });
            }
            outcome.steps.push(result.outcome);
            let progress = TestProgress {
                completed: outcome.steps.len(),
                total,
                step: &outcome.steps[outcome.steps.len() - 1],
            };
            self.sink.on_test_progress(&test.id, &outcome.flavor, &progress);

            if blocking {
                if let Some(error) = result.error {
                    outcome.fail(error.to_string());
                }
                return;
            }
        }
    }

    /// Best effort; a failed capture is only logged
    async fn capture_failure(&self, context: &mut dyn ExecutionContext, outcome: &mut TestOutcome) {
        let timeout = self.interpreter.settings().selector_timeout;
        match tokio::time::timeout(timeout, context.screenshot(false)).await {
            Ok(Ok(data)) => outcome.screenshots.push(Screenshot {
                kind: ScreenshotKind::Failure,
                data,
                timestamp: self.interpreter.clock().now(),
            }),
            Ok(Err(e)) => tracing::warn!(test = %outcome.id, "Failure screenshot failed: {}", e),
            Err(_) => tracing::warn!(test = %outcome.id, "Failure screenshot timed out"),
        }
    }
}
