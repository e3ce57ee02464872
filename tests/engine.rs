//! Engine integration tests
//!
//! Run whole batches through the scheduler with a fake context provider, a
//! scripted HTTP client and a manual clock, so no browser, network or real
//! waiting is involved. Tests run on paused tokio time: concurrent sleeps
//! overlap and complete instantly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use parking_lot::Mutex;
use serde_json::{json, Value};

use runwright::common::config::Config;
use runwright::driver::{
    ContextOptions, ContextProvider, ExecutionContext, HttpClient, HttpRequest, HttpResponse,
    WaitUntil,
};
use runwright::testing::{
    BatchSummary, FnHandler, HandlerRegistry, LoadTestOptions, ManualClock, ResultSink,
    RunRegistry, Scheduler, ScreenshotKind, Status, StepHandler, TestDefinition, TestOutcome,
    TestProgress, TestSuite, VariableStore,
};
use runwright::{Error, Result};

/// Selector that matches nothing on the fake page
const MISSING: &str = "#missing";

/// Counters shared between the provider and every context it creates
#[derive(Default)]
struct PageLog {
    actions: Mutex<Vec<String>>,
    created: AtomicUsize,
    destroyed: AtomicUsize,
}

struct FakeContext {
    flavor: String,
    url: String,
    log: Arc<PageLog>,
    screenshots_fail: bool,
}

impl FakeContext {
    fn record(&self, action: String) {
        self.log.actions.lock().push(action);
    }

    fn find(&self, selector: &str) -> Result<()> {
        if selector == MISSING {
            Err(Error::ElementNotFound(selector.to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ExecutionContext for FakeContext {
    fn flavor(&self) -> &str {
        &self.flavor
    }

    async fn navigate(&mut self, url: &str, _wait_until: WaitUntil) -> Result<()> {
        self.record(format!("navigate {}", url));
        self.url = url.to_string();
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        self.find(selector)?;
        self.record(format!("click {}", selector));
        Ok(())
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<()> {
        self.find(selector)?;
        self.record(format!("fill {} {}", selector, value));
        Ok(())
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> Result<()> {
        self.find(selector)?;
        self.record(format!("type {} {}", selector, text));
        Ok(())
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        self.find(selector)
            .map_err(|_| Error::timeout(format!("wait for {}", selector), timeout.as_millis() as u64))
    }

    async fn screenshot(&mut self, _full_page: bool) -> Result<Vec<u8>> {
        if self.screenshots_fail {
            return Err(Error::webdriver("screenshot", "session lost"));
        }
        self.record("screenshot".to_string());
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn text_content(&mut self, selector: &str) -> Result<Option<String>> {
        Ok(match selector {
            MISSING => None,
            "h1" => Some("Welcome back".to_string()),
            _ => Some(String::new()),
        })
    }

    async fn is_visible(&mut self, selector: &str) -> Result<bool> {
        Ok(selector != MISSING)
    }

    async fn url(&mut self) -> Result<String> {
        Ok(self.url.clone())
    }

    async fn count(&mut self, selector: &str) -> Result<usize> {
        Ok(if selector == MISSING { 0 } else { 3 })
    }

    async fn destroy(&mut self) -> Result<()> {
        self.log.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeProvider {
    log: Arc<PageLog>,
    /// Flavors whose contexts cannot be created
    broken: Vec<String>,
    screenshots_fail: bool,
}

impl FakeProvider {
    fn new() -> Self {
        Self {
            log: Arc::new(PageLog::default()),
            broken: Vec::new(),
            screenshots_fail: false,
        }
    }

    fn without_screenshots() -> Self {
        Self {
            screenshots_fail: true,
            ..Self::new()
        }
    }

    fn broken(flavor: &str) -> Self {
        Self {
            broken: vec![flavor.to_string()],
            ..Self::new()
        }
    }
}

#[async_trait]
impl ContextProvider for FakeProvider {
    async fn create_context(
        &self,
        flavor: &str,
        _options: &ContextOptions,
    ) -> Result<Box<dyn ExecutionContext>> {
        if self.broken.iter().any(|f| f == flavor) {
            return Err(Error::context_acquisition(flavor, "driver crashed on startup"));
        }
        self.log.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeContext {
            flavor: flavor.to_string(),
            url: "about:blank".to_string(),
            log: self.log.clone(),
            screenshots_fail: self.screenshots_fail,
        }))
    }
}

/// Answers with scripted status codes (then 200) and records every URL
/// with the (virtual) instant it was sent
#[derive(Default)]
struct ScriptedHttp {
    statuses: Mutex<VecDeque<u16>>,
    urls: Mutex<Vec<String>>,
    sent_at: Mutex<Vec<Instant>>,
    calls: AtomicUsize,
}

impl ScriptedHttp {
    fn with_statuses(statuses: &[u16]) -> Self {
        Self {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(request.url.clone());
        self.sent_at.lock().push(Instant::now());
        let status = self.statuses.lock().pop_front().unwrap_or(200);
        Ok(HttpResponse {
            status,
            headers: [("content-type".to_string(), "application/json".to_string())]
                .into_iter()
                .collect(),
            body: json!({"user": {"id": 5, "name": "ada"}, "token": "t-1"}),
            duration_ms: 12,
        })
    }
}

/// Records notifications in the order they arrive
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl ResultSink for RecordingSink {
    fn on_test_started(&self, test: &TestDefinition, flavor: &str) {
        self.events.lock().push(format!("started {} {}", test.id, flavor));
    }

    fn on_test_progress(&self, test_id: &str, _flavor: &str, progress: &TestProgress<'_>) {
        self.events
            .lock()
            .push(format!("progress {} {}/{}", test_id, progress.completed, progress.total));
    }

    fn on_test_completed(&self, outcome: &TestOutcome) {
        self.events
            .lock()
            .push(format!("completed {} {}", outcome.id, outcome.flavor));
    }

    fn on_batch_completed(&self, outcomes: &[TestOutcome], summary: &BatchSummary) {
        self.events
            .lock()
            .push(format!("batch {} {}", outcomes.len(), summary.failed));
    }
}

struct Harness {
    scheduler: Scheduler,
    provider: Arc<FakeProvider>,
    http: Arc<ScriptedHttp>,
    clock: Arc<ManualClock>,
    sink: Arc<RecordingSink>,
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.retry.base_delay_ms = 10;
    config
}

fn harness_with(provider: FakeProvider, http: ScriptedHttp, handlers: HandlerRegistry, registry: RunRegistry) -> Harness {
    let provider = Arc::new(provider);
    let http = Arc::new(http);
    let clock = Arc::new(ManualClock::default());
    let sink = Arc::new(RecordingSink::default());
    let scheduler = Scheduler::builder(test_config())
        .provider(provider.clone())
        .http(http.clone())
        .clock(clock.clone())
        .sink(sink.clone())
        .handlers(handlers)
        .registry(registry)
        .build()
        .unwrap();
    Harness {
        scheduler,
        provider,
        http,
        clock,
        sink,
    }
}

fn harness() -> Harness {
    harness_with(
        FakeProvider::new(),
        ScriptedHttp::default(),
        HandlerRegistry::with_builtins(),
        RunRegistry::new(),
    )
}

fn tests(yaml: &str) -> Vec<TestDefinition> {
    TestSuite::from_yaml(yaml).unwrap().tests
}

fn chromium() -> Vec<String> {
    vec!["chromium".to_string()]
}

#[tokio::test(start_paused = true)]
async fn test_empty_test_passes() {
    let h = harness();
    let report = h
        .scheduler
        .run_batch(&tests("id: empty\nname: Nothing to do\n"), &chromium())
        .await;

    assert_eq!(report.outcomes.len(), 1);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, Status::Passed);
    assert!(outcome.steps.is_empty());
    assert!(outcome.end_time >= outcome.start_time);
    assert_eq!(
        h.sink.events(),
        vec!["started empty http", "completed empty http", "batch 1 0"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_blocking_failure_truncates_steps() {
    let h = harness();
    let report = h
        .scheduler
        .run_batch(
            &tests(
                r##"
id: login
name: Login
steps:
  - action: navigate
    url: http://shop.local/login
  - action: click
    selector: "#missing"
  - action: fill
    selector: "#user"
    value: alice
cleanup:
  - action: click
    selector: "#logout"
"##,
            ),
            &chromium(),
        )
        .await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, Status::Failed);
    assert_eq!(outcome.flavor, "chromium");
    assert_eq!(outcome.steps.len(), 2);
    assert_eq!(outcome.steps[0].status, Status::Passed);
    assert_eq!(
        outcome.error.as_deref(),
        Some("No element matches selector '#missing'")
    );
    assert_eq!(outcome.steps[1].error, outcome.error);

    // failure screenshot, then the cleanup sequence, then teardown
    assert_eq!(outcome.screenshots.len(), 1);
    assert_eq!(outcome.screenshots[0].kind, ScreenshotKind::Failure);
    assert_eq!(outcome.cleanup.len(), 1);
    assert_eq!(outcome.cleanup[0].status, Status::Passed);
    assert_eq!(
        *h.provider.log.actions.lock(),
        vec![
            "navigate http://shop.local/login".to_string(),
            "screenshot".to_string(),
            "click #logout".to_string(),
        ]
    );
    assert_eq!(h.provider.log.destroyed.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_continue_on_failure_keeps_going() {
    let h = harness();
    let report = h
        .scheduler
        .run_batch(
            &tests(
                r##"
id: banner
name: Optional banner
steps:
  - action: navigate
    url: http://shop.local
  - action: click
    selector: "#missing"
    continueOnFailure: true
    saveAs: dismissed
  - action: assert
    check: { type: text, selector: h1, contains: Welcome }
"##,
            ),
            &chromium(),
        )
        .await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, Status::Passed);
    assert_eq!(outcome.steps.len(), 3);
    assert_eq!(outcome.steps[1].status, Status::Failed);
    assert!(outcome.error.is_none());
    assert!(outcome.screenshots.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_navigate_then_failing_assert() {
    let h = harness();
    let report = h
        .scheduler
        .run_batch(
            &tests(
                r#"
id: title
name: Title check
steps:
  - action: navigate
    url: /home
  - action: assert
    check: { type: text, selector: h1, equals: Goodbye }
context:
  base_url: http://shop.local
"#,
            ),
            &chromium(),
        )
        .await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, Status::Failed);
    assert_eq!(outcome.steps.len(), 2);
    assert_eq!(outcome.steps[0].status, Status::Passed);
    assert_eq!(
        outcome.steps[1].error.as_deref(),
        Some("Assertion failed: expected text of 'h1' to be 'Goodbye', got 'Welcome back'")
    );
    assert_eq!(
        h.provider.log.actions.lock()[0],
        "navigate http://shop.local/home"
    );
}

#[tokio::test(start_paused = true)]
async fn test_request_retries_server_errors() {
    let h = harness_with(
        FakeProvider::new(),
        ScriptedHttp::with_statuses(&[500, 500, 200]),
        HandlerRegistry::new(),
        RunRegistry::new(),
    );
    let report = h
        .scheduler
        .run_batch(
            &tests(
                r#"
id: flaky
name: Flaky endpoint
steps:
  - action: request
    url: http://api.local/health
    retries: 3
  - action: assertion
    check: { type: status, expected: 200 }
"#,
            ),
            &[],
        )
        .await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.flavor, "http");
    assert_eq!(outcome.status, Status::Passed);
    assert_eq!(outcome.steps[0].status, Status::Passed);
    assert_eq!(h.http.calls(), 3);
    assert_eq!(
        h.clock.sleeps(),
        vec![Duration::from_millis(20), Duration::from_millis(40)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_request_exhausts_budget_on_server_errors() {
    let h = harness_with(
        FakeProvider::new(),
        ScriptedHttp::with_statuses(&[502, 503, 500]),
        HandlerRegistry::new(),
        RunRegistry::new(),
    );
    let report = h
        .scheduler
        .run_batch(
            &tests("id: down\nname: Down\nsteps:\n  - action: request\n    url: http://api.local/x\n    retries: 3\n"),
            &[],
        )
        .await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, Status::Failed);
    assert_eq!(h.http.calls(), 3);
    assert_eq!(
        outcome.error.as_deref(),
        Some("Server responded with status 500 for http://api.local/x")
    );
}

#[tokio::test(start_paused = true)]
async fn test_saved_values_flow_into_later_steps() {
    let h = harness();
    let report = h
        .scheduler
        .run_batch(
            &tests(
                r#"
id: chain
name: Chained requests
context:
  base_url: http://api.local
steps:
  - action: request
    method: post
    url: /login
    saveAs: login
  - action: assertion
    target: login
    check: { type: body, path: user.id, expected: 5 }
  - action: request
    url: /users/{{login.body.user.id}}
    headers: { Authorization: "Bearer {{login.body.token}}" }
  - action: assertion
    check: { type: header, name: Content-Type, expected: application/json }
  - action: assertion
    check: { type: performance, max_duration_ms: 50 }
"#,
            ),
            &[],
        )
        .await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, Status::Passed, "{:?}", outcome.error);
    assert_eq!(outcome.steps.len(), 5);
    assert_eq!(
        *h.http.urls.lock(),
        vec![
            "http://api.local/login".to_string(),
            "http://api.local/users/5".to_string()
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_step_saves_nothing() {
    let h = harness_with(
        FakeProvider::new(),
        ScriptedHttp::with_statuses(&[500]),
        HandlerRegistry::new(),
        RunRegistry::new(),
    );
    let report = h
        .scheduler
        .run_batch(
            &tests(
                r#"
id: partial
name: Partial
steps:
  - action: request
    url: http://api.local/a
    retries: 1
    saveAs: first
    continueOnFailure: true
  - action: assertion
    target: first
    check: { type: status, expected: 500 }
"#,
            ),
            &[],
        )
        .await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, Status::Failed);
    assert_eq!(
        outcome.error.as_deref(),
        Some("Assertion failed: no value stored under 'first'")
    );
}

#[tokio::test(start_paused = true)]
async fn test_context_acquisition_failure_is_isolated() {
    let h = harness_with(
        FakeProvider::broken("firefox"),
        ScriptedHttp::default(),
        HandlerRegistry::new(),
        RunRegistry::new(),
    );
    let flavors = vec!["chromium".to_string(), "firefox".to_string()];
    let report = h
        .scheduler
        .run_batch(
            &tests("id: ui\nname: UI\nsteps:\n  - action: navigate\n    url: http://shop.local\n"),
            &flavors,
        )
        .await;

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.outcomes[0].flavor, "chromium");
    assert_eq!(report.outcomes[0].status, Status::Passed);
    assert_eq!(report.outcomes[1].flavor, "firefox");
    assert_eq!(report.outcomes[1].status, Status::Failed);
    assert!(report.outcomes[1].steps.is_empty());
    assert_eq!(
        report.outcomes[1].error.as_deref(),
        Some("Failed to acquire firefox context: driver crashed on startup")
    );
    assert_eq!(report.summary.total, 2);
    assert_eq!(report.summary.passed, 1);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(h.provider.log.created.load(Ordering::SeqCst), 1);
    assert_eq!(h.provider.log.destroyed.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_browsers_field_restricts_matrix() {
    let h = harness();
    let flavors = vec!["chromium".to_string(), "firefox".to_string()];
    let report = h
        .scheduler
        .run_batch(
            &tests(
                r#"
id: ff-only
name: Firefox only
browsers: [firefox]
steps:
  - action: screenshot
    fullPage: true
"#,
            ),
            &flavors,
        )
        .await;

    assert_eq!(report.outcomes.len(), 1);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.flavor, "firefox");
    assert_eq!(outcome.screenshots.len(), 1);
    assert_eq!(outcome.screenshots[0].kind, ScreenshotKind::Step);
    assert!(outcome.steps[0].screenshot.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_checked_between_steps() {
    let registry = RunRegistry::new();
    let handle = registry.clone();
    let mut handlers = HandlerRegistry::new();
    handlers.register_handler(
        "stop-me",
        FnHandler(move |_params: &Value| -> std::result::Result<Value, String> {
            handle.stop("stoppable");
            Ok(Value::Null)
        }),
    );
    let h = harness_with(FakeProvider::new(), ScriptedHttp::default(), handlers, registry);

    let report = h
        .scheduler
        .run_batch(
            &tests(
                r##"
id: stoppable
name: Stoppable
steps:
  - action: custom
    handler: stop-me
  - action: navigate
    url: http://shop.local
  - action: click
    selector: "#go"
"##,
            ),
            &chromium(),
        )
        .await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.steps.len(), 1);
    assert_eq!(outcome.status, Status::Failed);
    assert_eq!(outcome.error.as_deref(), Some("Test 'stoppable' was stopped"));
    assert!(h.provider.log.actions.lock().iter().all(|a| !a.starts_with("navigate")));
    assert_eq!(h.provider.log.destroyed.load(Ordering::SeqCst), 1);
}

struct SlowHandler;

#[async_trait]
impl StepHandler for SlowHandler {
    async fn run(
        &self,
        _context: &mut dyn ExecutionContext,
        _params: &Value,
        _vars: &VariableStore,
    ) -> std::result::Result<Value, String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Value::Null)
    }
}

#[tokio::test(start_paused = true)]
async fn test_whole_test_timeout_still_tears_down() {
    let mut handlers = HandlerRegistry::new();
    handlers.register_handler("slow", SlowHandler);
    handlers.register_handler("noop", FnHandler(|_: &Value| -> std::result::Result<Value, String> { Ok(Value::Null) }));
    let h = harness_with(FakeProvider::new(), ScriptedHttp::default(), handlers, RunRegistry::new());

    let report = h
        .scheduler
        .run_batch(
            &tests(
                r#"
id: hangs
name: Hangs
timeout_ms: 50
steps:
  - action: navigate
    url: http://shop.local
  - action: setup
    handler: slow
cleanup:
  - action: cleanup
    handler: noop
"#,
            ),
            &chromium(),
        )
        .await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, Status::Failed);
    assert_eq!(outcome.error.as_deref(), Some("test 'hangs' timed out after 50 ms"));

    // the interrupted step closes the trail
    assert_eq!(outcome.steps.len(), 2);
    assert_eq!(outcome.steps[0].status, Status::Passed);
    let hung = &outcome.steps[1];
    assert_eq!(hung.name, "setup slow");
    assert_eq!(hung.action, "setup");
    assert_eq!(hung.status, Status::Failed);
    assert_eq!(hung.error, outcome.error);
    assert_eq!(hung.duration_ms(), 50);

    assert_eq!(outcome.cleanup.len(), 1);
    assert_eq!(h.provider.log.destroyed.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_step_fails_the_test() {
    let mut handlers = HandlerRegistry::new();
    handlers.register_handler(
        "explode",
        FnHandler(|_: &Value| -> std::result::Result<Value, String> { panic!("fixture exploded") }),
    );
    let h = harness_with(FakeProvider::new(), ScriptedHttp::default(), handlers, RunRegistry::new());

    let report = h
        .scheduler
        .run_batch(
            &tests(
                r##"
- id: boom
  name: Boom
  steps:
    - action: navigate
      url: http://shop.local
    - action: custom
      handler: explode
    - action: click
      selector: "#never"
- id: bystander
  name: Unaffected
  steps:
    - action: navigate
      url: http://shop.local/other
"##,
            ),
            &chromium(),
        )
        .await;

    let boom = &report.outcomes[0];
    assert_eq!(boom.status, Status::Failed);
    assert_eq!(boom.error.as_deref(), Some("Internal error: fixture exploded"));
    assert_eq!(boom.steps.len(), 2);
    assert_eq!(boom.steps[1].action, "custom");
    assert_eq!(boom.steps[1].status, Status::Failed);
    assert_eq!(boom.screenshots.len(), 1);

    assert_eq!(report.outcomes[1].status, Status::Passed);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(h.provider.log.created.load(Ordering::SeqCst), 2);
    assert_eq!(h.provider.log.destroyed.load(Ordering::SeqCst), 2);
    assert!(!h.provider.log.actions.lock().iter().any(|a| a == "click #never"));
}

#[tokio::test(start_paused = true)]
async fn test_failure_screenshot_error_is_not_fatal() {
    let h = harness_with(
        FakeProvider::without_screenshots(),
        ScriptedHttp::default(),
        HandlerRegistry::with_builtins(),
        RunRegistry::new(),
    );
    let report = h
        .scheduler
        .run_batch(
            &tests(
                r##"
id: blind
name: No screenshots
steps:
  - action: click
    selector: "#missing"
cleanup:
  - action: cleanup
    handler: log
    params: { message: after }
"##,
            ),
            &chromium(),
        )
        .await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, Status::Failed);
    assert_eq!(
        outcome.error.as_deref(),
        Some("No element matches selector '#missing'")
    );
    assert!(outcome.screenshots.is_empty());
    assert_eq!(outcome.cleanup.len(), 1);
    assert_eq!(outcome.cleanup[0].status, Status::Passed);
    assert_eq!(h.provider.log.destroyed.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_completion_is_last_notification() {
    let h = harness();
    h.scheduler
        .run_batch(
            &tests(
                r#"
- id: a
  name: A
  steps:
    - action: wait
      duration_ms: 10
    - action: wait
      duration_ms: 10
- id: b
  name: B
"#,
            ),
            &[],
        )
        .await;

    let events = h.sink.events();
    assert_eq!(events.last().map(String::as_str), Some("batch 2 0"));
    let a_events: Vec<&String> = events.iter().filter(|e| e.contains(" a ") || e.ends_with(" a")).collect();
    assert_eq!(a_events.first().map(|e| e.as_str()), Some("started a http"));
    assert_eq!(a_events.last().map(|e| e.as_str()), Some("completed a http"));
    assert!(events.contains(&"progress a 2/2".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_load_test_summary() {
    let h = harness();
    let definition = &tests(
        r#"
id: load
name: Load
steps:
  - action: request
    url: http://api.local/ping?who={{nobody}}
  - action: request
    url: http://api.local/never
"#,
    )[0];
    let options = LoadTestOptions {
        concurrency: 2,
        duration: Duration::from_secs(1),
        ramp_up: Duration::ZERO,
        inter_request_delay: Duration::from_millis(100),
    };

    let summary = h.scheduler.run_load_test(definition, &options).await.unwrap();

    // both workers send at 0, 100, ..., 900 ms
    assert_eq!(summary.total_requests, 20, "{:?}", summary);
    assert_eq!(summary.successful_requests, 20);
    assert_eq!(summary.failed_requests, 0);
    assert_eq!(summary.min_latency_ms, 12);
    assert_eq!(summary.max_latency_ms, 12);
    assert_eq!(summary.throughput_rps, 20.0);
    // only the first request step is issued, with placeholders left literal
    assert!(h
        .http
        .urls
        .lock()
        .iter()
        .all(|url| url == "http://api.local/ping?who={{nobody}}"));
}

#[tokio::test(start_paused = true)]
async fn test_load_test_ramps_workers_in() {
    let h = harness();
    let definition = &tests("id: ramp\nname: Ramp\nsteps:\n  - action: request\n    url: http://api.local/ping\n")[0];
    let options = LoadTestOptions {
        concurrency: 5,
        duration: Duration::from_secs(5),
        ramp_up: Duration::from_secs(5),
        inter_request_delay: Duration::from_millis(100),
    };

    let origin = Instant::now();
    let summary = h.scheduler.run_load_test(definition, &options).await.unwrap();

    // worker i starts at i s and sends every 100 ms until the 5 s deadline
    assert_eq!(summary.total_requests, 50 + 40 + 30 + 20 + 10, "{:?}", summary);
    assert_eq!(summary.throughput_rps, 30.0);
    assert_eq!(origin.elapsed(), Duration::from_secs(5));

    let mut per_second = [0usize; 5];
    for sent in h.http.sent_at.lock().iter() {
        let second = (*sent - origin).as_secs() as usize;
        per_second[second] += 1;
    }
    assert_eq!(per_second, [10, 20, 30, 40, 50]);

    // each worker's first request lands exactly on its ramp offset
    let sent: Vec<Duration> = h.http.sent_at.lock().iter().map(|t| *t - origin).collect();
    for i in 0..5u64 {
        let offset = Duration::from_secs(i);
        let at_offset = sent.iter().filter(|t| **t == offset).count();
        // worker i plus the i workers already running
        assert_eq!(at_offset, i as usize + 1, "at {:?}", offset);
    }
}

#[tokio::test(start_paused = true)]
async fn test_load_test_without_workers_reports_zero() {
    let h = harness();
    let definition = &tests("id: load\nname: Load\nsteps:\n  - action: request\n    url: http://api.local\n")[0];
    let options = LoadTestOptions {
        concurrency: 0,
        duration: Duration::from_secs(5),
        ramp_up: Duration::from_secs(1),
        inter_request_delay: Duration::from_millis(100),
    };
    let summary = h.scheduler.run_load_test(definition, &options).await.unwrap();
    assert_eq!(summary.total_requests, 0);
    assert_eq!(summary.throughput_rps, 0.0);
    assert_eq!(h.http.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_load_test_needs_request_step() {
    let h = harness();
    let definition = &tests("id: ui\nname: UI\nsteps:\n  - action: navigate\n    url: http://x\n")[0];
    let err = h
        .scheduler
        .run_load_test(definition, &LoadTestOptions::from(&Config::default().load))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no request step"));
}
