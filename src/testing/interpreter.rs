//! Step interpreter: executes exactly one step against a context
//!
//! Errors never escape [`StepInterpreter::execute`]; they become the failed
//! [`StepOutcome`] and are handed back to the runner for the continue/stop
//! decision.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::driver::{resolve_url, ContextOptions, ExecutionContext, HttpClient, HttpRequest, WaitUntil};

use super::assertion::{evaluate, evaluate_page, Verdict};
use super::clock::Clock;
use super::config::{AssertionSpec, RequestSpec, StepKind, TestStep};
use super::handlers::HandlerRegistry;
use super::outcome::{Status, StepOutcome};
use super::retry::RetryPolicy;
use super::schema::SchemaValidator;
use super::vars::{VariableStore, LAST_RESPONSE};

/// Timeouts and defaults applied to every step
#[derive(Debug, Clone)]
pub struct InterpreterSettings {
    pub navigation_timeout: Duration,
    pub selector_timeout: Duration,
    pub request_timeout: Duration,
    pub wait_until: WaitUntil,
    pub retry: RetryPolicy,
}

impl From<&Config> for InterpreterSettings {
    fn from(config: &Config) -> Self {
        Self {
            navigation_timeout: config.navigation_timeout(),
            selector_timeout: config.selector_timeout(),
            request_timeout: config.request_timeout(),
            wait_until: config.defaults.wait_until,
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// A step's outcome plus the error that failed it
#[derive(Debug)]
pub struct StepResult {
    pub outcome: StepOutcome,
    pub error: Option<Error>,
}

impl StepResult {
    /// Whether the test must stop here
    ///
    /// Configuration errors stop the test even when the step asked to continue.
    pub fn is_blocking(&self, step: &TestStep) -> bool {
        match &self.error {
            None => false,
            Some(e) => !step.continue_on_failure || e.kind() == crate::ErrorKind::Configuration,
        }
    }
}

/// What a successful step produced
struct StepValue {
    /// Stored under `save_as`
    value: Value,
    screenshot: Option<Vec<u8>>,
    /// Stored under `last_response`
    response: Option<Value>,
}

impl StepValue {
    fn new(value: Value) -> Self {
        Self {
            value,
            screenshot: None,
            response: None,
        }
    }
}

pub struct StepInterpreter {
    settings: InterpreterSettings,
    http: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    handlers: Arc<HandlerRegistry>,
    schema: Arc<dyn SchemaValidator>,
}

impl StepInterpreter {
    pub fn new(
        settings: InterpreterSettings,
        http: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
        handlers: Arc<HandlerRegistry>,
        schema: Arc<dyn SchemaValidator>,
    ) -> Self {
        Self {
            settings,
            http,
            clock,
            handlers,
            schema,
        }
    }

    pub fn settings(&self) -> &InterpreterSettings {
        &self.settings
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Execute one step and record its outcome
    ///
    /// On success the step's value is stored under `save_as`; on failure
    /// nothing is stored.
    pub async fn execute(
        &self,
        step: &TestStep,
        context: &mut dyn ExecutionContext,
        vars: &mut VariableStore,
        options: &ContextOptions,
    ) -> StepResult {
        let name = step.display_name();
        let action = step.kind.action();
        tracing::debug!("Executing step '{}' ({})", name, action);

        let start_time = self.clock.now();
        let result = self.perform(&step.kind, context, vars, options).await;
        let end_time = self.clock.now().max(start_time);

        let mut outcome = StepOutcome {
            name,
            action: action.to_string(),
            status: Status::Passed,
            start_time,
            end_time,
            error: None,
            screenshot: None,
        };

        match result {
            Ok(produced) => {
                if let Some(response) = produced.response {
                    vars.insert(LAST_RESPONSE, response);
                }
                if let Some(key) = &step.save_as {
                    vars.insert(key.clone(), produced.value);
                }
                outcome.screenshot = produced.screenshot;
                StepResult {
                    outcome,
                    error: None,
                }
            }
            Err(e) => {
                tracing::debug!("Step '{}' failed: {}", outcome.name, e);
                outcome.status = Status::Failed;
                outcome.error = Some(e.to_string());
                StepResult {
                    outcome,
                    error: Some(e),
                }
            }
        }
    }

    async fn perform(
        &self,
        kind: &StepKind,
        context: &mut dyn ExecutionContext,
        vars: &VariableStore,
        options: &ContextOptions,
    ) -> Result<StepValue> {
        match kind {
            StepKind::Navigate {
                url,
                wait_until,
                timeout_ms,
            } => {
                let url = resolve_url(options.base_url.as_deref(), &vars.interpolate_str(url));
                let wait_until = wait_until.unwrap_or(self.settings.wait_until);
                let timeout = timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(self.settings.navigation_timeout);
                with_timeout(
                    format!("navigate to {}", url),
                    timeout,
                    context.navigate(&url, wait_until),
                )
                .await?;
                Ok(StepValue::new(Value::String(url)))
            }
            StepKind::Click { selector } => {
                let selector = vars.interpolate_str(selector);
                with_timeout(
                    format!("click {}", selector),
                    self.settings.selector_timeout,
                    context.click(&selector),
                )
                .await?;
                Ok(StepValue::new(Value::Bool(true)))
            }
            StepKind::Fill { selector, value } => {
                let selector = vars.interpolate_str(selector);
                let value = vars.interpolate_str(value);
                with_timeout(
                    format!("fill {}", selector),
                    self.settings.selector_timeout,
                    context.fill(&selector, &value),
                )
                .await?;
                Ok(StepValue::new(Value::String(value)))
            }
            StepKind::Type { selector, value } => {
                let selector = vars.interpolate_str(selector);
                let value = vars.interpolate_str(value);
                with_timeout(
                    format!("type into {}", selector),
                    self.settings.selector_timeout,
                    context.type_text(&selector, &value),
                )
                .await?;
                Ok(StepValue::new(Value::String(value)))
            }
            StepKind::Wait {
                selector,
                duration_ms,
                timeout_ms,
            } => {
                if let Some(selector) = selector {
                    let selector = vars.interpolate_str(selector);
                    let timeout = timeout_ms
                        .map(Duration::from_millis)
                        .unwrap_or(self.settings.selector_timeout);
                    with_timeout(
                        format!("wait for {}", selector),
                        timeout,
                        context.wait_for_selector(&selector, timeout),
                    )
                    .await?;
                } else if let Some(ms) = duration_ms {
                    self.clock.sleep(Duration::from_millis(*ms)).await;
                }
                Ok(StepValue::new(Value::Bool(true)))
            }
            StepKind::Screenshot { full_page } => {
                let bytes = context.screenshot(*full_page).await?;
                Ok(StepValue {
                    screenshot: Some(bytes),
                    ..StepValue::new(Value::Bool(true))
                })
            }
            StepKind::Assert { check } => {
                let (verdict, observed) = evaluate_page(check, context, vars).await?;
                match verdict {
                    Verdict::Pass => Ok(StepValue::new(observed)),
                    Verdict::Fail(message) => Err(Error::Assertion(message)),
                }
            }
            StepKind::Request(spec) => {
                let response = self.request(spec, vars, options).await?;
                Ok(StepValue {
                    response: Some(response.clone()),
                    ..StepValue::new(response)
                })
            }
            StepKind::Assertion { target, check } => {
                let reference = target.as_deref().unwrap_or(LAST_RESPONSE);
                let subject = vars.resolve(reference).ok_or_else(|| {
                    Error::Assertion(format!("no value stored under '{}'", reference))
                })?;
                let check = interpolate_check(check, vars);
                match evaluate(&check, subject, vars, &self.handlers, self.schema.as_ref())? {
                    Verdict::Pass => Ok(StepValue::new(Value::Bool(true))),
                    Verdict::Fail(message) => Err(Error::Assertion(message)),
                }
            }
            StepKind::Setup { handler, params }
            | StepKind::Cleanup { handler, params }
            | StepKind::Custom { handler, params } => {
                let implementation = self.handlers.handler(handler)?;
                let params = vars.interpolate(params);
                implementation
                    .run(context, &params, vars)
                    .await
                    .map(StepValue::new)
                    .map_err(|message| Error::StepFailed(format!("handler '{}': {}", handler, message)))
            }
        }
    }

    /// Send a request step through the retry controller
    ///
    /// A 5xx status counts as a retryable failure; any other received status
    /// is a normal response.
    async fn request(
        &self,
        spec: &RequestSpec,
        vars: &VariableStore,
        options: &ContextOptions,
    ) -> Result<Value> {
        let request = build_request(
            spec,
            vars,
            options.base_url.as_deref(),
            self.settings.request_timeout,
        );
        let policy = match spec.attempts {
            Some(attempts) => self.settings.retry.with_attempts(attempts),
            None => self.settings.retry,
        };
        let timeout = request.timeout.unwrap_or(self.settings.request_timeout);

        let response = policy
            .run(self.clock.as_ref(), |attempt| {
                let request = &request;
                async move {
                    tracing::debug!("{} {} (attempt {})", request.method, request.url, attempt);
                    let response = tokio::time::timeout(timeout, self.http.send(request))
                        .await
                        .map_err(|_| {
                            Error::Transport(format!(
                                "request to {} timed out after {} ms",
                                request.url,
                                timeout.as_millis()
                            ))
                        })??;
                    if response.is_server_error() {
                        return Err(Error::ServerError {
                            status: response.status,
                            url: request.url.clone(),
                        });
                    }
                    Ok(response)
                }
            })
            .await?;

        Ok(response.to_value())
    }
}

/// Interpolate a request template into a concrete request
pub fn build_request(
    spec: &RequestSpec,
    vars: &VariableStore,
    base_url: Option<&str>,
    default_timeout: Duration,
) -> HttpRequest {
    HttpRequest {
        method: vars.interpolate_str(&spec.method).to_uppercase(),
        url: resolve_url(base_url, &vars.interpolate_str(&spec.url)),
        headers: vars.interpolate_map(&spec.headers),
        body: spec.body.as_ref().map(|body| vars.interpolate(body)),
        params: vars.interpolate_map(&spec.params),
        timeout: Some(
            spec.timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(default_timeout),
        ),
    }
}

/// Substitute placeholders in the expected values of an assertion
fn interpolate_check(check: &AssertionSpec, vars: &VariableStore) -> AssertionSpec {
    match check {
        AssertionSpec::Header { name, expected } => AssertionSpec::Header {
            name: vars.interpolate_str(name),
            expected: vars.interpolate_str(expected),
        },
        AssertionSpec::Body { path, expected } => AssertionSpec::Body {
            path: vars.interpolate_str(path),
            expected: expected.as_ref().map(|value| vars.interpolate(value)),
        },
        other => other.clone(),
    }
}

async fn with_timeout<T>(
    operation: String,
    timeout: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| Error::timeout(operation, timeout.as_millis() as u64))?
}
