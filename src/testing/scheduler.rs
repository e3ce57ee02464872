//! Execution matrix scheduler
//!
//! UI batches run every (flavor, test) pairing concurrently; a pairing's
//! failure only shows up in its own outcome. Load tests run staggered workers
//! that repeat a test's first request until a deadline.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::common::config::{Config, LoadConfig};
use crate::common::{Error, Result};
use crate::driver::{
    ContextProvider, DefaultProvider, HttpClient, ReqwestClient, WebDriverProvider, HTTP_FLAVOR,
};

use super::clock::{elapsed_ms, Clock, SystemClock};
use super::config::TestDefinition;
use super::handlers::HandlerRegistry;
use super::interpreter::{build_request, InterpreterSettings, StepInterpreter};
use super::observer::{NoopSink, ResultSink};
use super::outcome::{BatchSummary, LoadTestSummary, RequestRecord, TestOutcome};
use super::registry::RunRegistry;
use super::runner::TestRunner;
use super::schema::{BasicSchemaValidator, SchemaValidator};
use super::vars::VariableStore;

/// Registry flavor under which load test workers are tracked
const LOAD_FLAVOR: &str = "load";

/// Shortest pause between two requests of one load test worker
const MIN_INTER_REQUEST_DELAY: Duration = Duration::from_millis(1);

/// Outcomes of a batch in (test, flavor) declaration order
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub outcomes: Vec<TestOutcome>,
    pub summary: BatchSummary,
}

impl BatchReport {
    pub fn all_passed(&self) -> bool {
        self.summary.failed == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTestOptions {
    pub concurrency: usize,
    pub duration: Duration,
    pub ramp_up: Duration,
    pub inter_request_delay: Duration,
}

impl From<&LoadConfig> for LoadTestOptions {
    fn from(config: &LoadConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            duration: Duration::from_secs(config.duration_secs),
            ramp_up: Duration::from_secs(config.ramp_up_secs),
            inter_request_delay: Duration::from_millis(config.inter_request_delay_ms),
        }
    }
}

/// Builder for [`Scheduler`]; unset collaborators get production defaults
pub struct SchedulerBuilder {
    config: Config,
    provider: Option<Arc<dyn ContextProvider>>,
    http: Option<Arc<dyn HttpClient>>,
    clock: Option<Arc<dyn Clock>>,
    sink: Option<Arc<dyn ResultSink>>,
    handlers: HandlerRegistry,
    schema: Option<Arc<dyn SchemaValidator>>,
    registry: Option<RunRegistry>,
}

impl SchedulerBuilder {
    pub fn provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn http(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn schema(mut self, schema: Arc<dyn SchemaValidator>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn registry(mut self, registry: RunRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<Scheduler> {
        let http: Arc<dyn HttpClient> = match self.http {
            Some(http) => http,
            None => Arc::new(ReqwestClient::new()?),
        };
        let provider: Arc<dyn ContextProvider> = match self.provider {
            Some(provider) => provider,
            None => Arc::new(DefaultProvider::new(Arc::new(WebDriverProvider::new(
                self.config.clone(),
            )?))),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let sink = self.sink.unwrap_or_else(|| Arc::new(NoopSink));
        let schema = self
            .schema
            .unwrap_or_else(|| Arc::new(BasicSchemaValidator));
        let registry = self.registry.unwrap_or_default();

        let interpreter = Arc::new(StepInterpreter::new(
            InterpreterSettings::from(&self.config),
            http.clone(),
            clock.clone(),
            Arc::new(self.handlers),
            schema,
        ));
        let runner = TestRunner::new(
            interpreter.clone(),
            provider.clone(),
            sink.clone(),
            registry.clone(),
            self.config.test_timeout(),
        );

        Ok(Scheduler {
            config: self.config,
            runner,
            interpreter,
            provider,
            http,
            clock,
            sink,
            registry,
        })
    }
}

pub struct Scheduler {
    config: Config,
    runner: TestRunner,
    interpreter: Arc<StepInterpreter>,
    provider: Arc<dyn ContextProvider>,
    http: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn ResultSink>,
    registry: RunRegistry,
}

impl Scheduler {
    pub fn builder(config: Config) -> SchedulerBuilder {
        SchedulerBuilder {
            config,
            provider: None,
            http: None,
            clock: None,
            sink: None,
            handlers: HandlerRegistry::with_builtins(),
            schema: None,
            registry: None,
        }
    }

    /// Handle for stopping tests from outside the run
    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Flavors `test` runs on, given the flavors requested for the batch
    ///
    /// Tests without page steps always run once on the `http` flavor.
    pub fn flavors_for(&self, test: &TestDefinition, requested: &[String]) -> Vec<String> {
        if !test.needs_browser() {
            return vec![HTTP_FLAVOR.to_string()];
        }
        let requested: &[String] = if requested.is_empty() {
            &self.config.defaults.browsers
        } else {
            requested
        };
        requested
            .iter()
            .filter(|flavor| test.browsers.is_empty() || test.browsers.contains(*flavor))
            .cloned()
            .collect()
    }

    /// Run every (flavor, test) pairing concurrently
    pub async fn run_batch(&self, tests: &[TestDefinition], flavors: &[String]) -> BatchReport {
        let pairings: Vec<(&TestDefinition, String)> = tests
            .iter()
            .flat_map(|test| {
                let selected = self.flavors_for(test, flavors);
                if selected.is_empty() {
                    tracing::warn!(test = %test.id, "No requested flavor matches the test's browsers");
                }
                selected.into_iter().map(move |flavor| (test, flavor))
            })
            .collect();

        tracing::info!(
            "Running {} pairing(s) from {} test(s)",
            pairings.len(),
            tests.len()
        );

        let limit = self
            .config
            .defaults
            .max_parallel
            .filter(|n| *n > 0)
            .map(|n| Arc::new(Semaphore::new(n)));

        let start = self.clock.now();
        let runs = pairings.iter().map(|(test, flavor)| {
            let limit = limit.clone();
            async move {
                let _permit = match &limit {
                    Some(semaphore) => semaphore.clone().acquire_owned().await.ok(),
                    None => None,
                };
                self.runner.run(test, flavor).await
            }
        });
        let outcomes = join_all(runs).await;
        let end = self.clock.now();

        let summary = BatchSummary::from_outcomes(&outcomes, start, end);
        self.sink.on_batch_completed(&outcomes, &summary);
        BatchReport { outcomes, summary }
    }

    /// Repeat the first request of `test` from `concurrency` ramped workers
    pub async fn run_load_test(
        &self,
        test: &TestDefinition,
        options: &LoadTestOptions,
    ) -> Result<LoadTestSummary> {
        let spec = test.first_request().ok_or_else(|| {
            Error::Config(format!("test '{}' has no request step to load test", test.id))
        })?;
        let settings = self.interpreter.settings();
        let request = build_request(
            spec,
            &VariableStore::new(),
            test.context.base_url.as_deref(),
            settings.request_timeout,
        );
        let timeout = request.timeout.unwrap_or(settings.request_timeout);
        let delay = options.inter_request_delay.max(MIN_INTER_REQUEST_DELAY);

        self.registry.register(&test.id, LOAD_FLAVOR);
        tracing::info!(
            test = %test.id,
            "Load testing {} {} with {} worker(s) for {} s",
            request.method,
            request.url,
            options.concurrency,
            options.duration.as_secs()
        );

        let start = self.clock.now();
        let deadline = start
            + chrono::Duration::from_std(options.duration).unwrap_or(chrono::Duration::zero());
        let log: Mutex<Vec<RequestRecord>> = Mutex::new(Vec::new());

        let workers = ramp_offsets(options.concurrency, options.ramp_up)
            .into_iter()
            .map(|offset| {
                let request = &request;
                let log = &log;
                async move {
                    self.clock.sleep(offset).await;
                    while self.clock.now() < deadline && !self.registry.is_stopped(&test.id) {
                        let sent = self.clock.now();
                        let result = tokio::time::timeout(timeout, self.http.send(request)).await;
                        let record = match result {
                            Ok(Ok(response)) => RequestRecord {
                                timestamp: sent,
                                status: Some(response.status),
                                latency_ms: response.duration_ms,
                                success: response.status < 400,
                            },
                            Ok(Err(_)) | Err(_) => RequestRecord {
                                timestamp: sent,
                                status: None,
                                latency_ms: elapsed_ms(sent, self.clock.now()),
                                success: false,
                            },
                        };
                        log.lock().push(record);
                        self.clock.sleep(delay).await;
                    }
                }
            });
        join_all(workers).await;

        let records = log.into_inner();
        let summary = LoadTestSummary::from_records(&records, options.duration);
        self.registry.finish(&test.id, LOAD_FLAVOR, summary.failed_requests == 0);
        self.sink.on_load_test_completed(&test.id, &summary);
        Ok(summary)
    }

    /// Release provider resources such as spawned drivers
    pub async fn shutdown(&self) {
        self.provider.shutdown().await;
    }
}

/// Start offset of each load test worker: `i * ramp_up / concurrency`
pub fn ramp_offsets(concurrency: usize, ramp_up: Duration) -> Vec<Duration> {
    if concurrency == 0 {
        return Vec::new();
    }
    let total = ramp_up.as_nanos();
    (0..concurrency)
        .map(|i| {
            let nanos = total * i as u128 / concurrency as u128;
            Duration::from_nanos(nanos.min(u128::from(u64::MAX)) as u64)
        })
        .collect()
}
