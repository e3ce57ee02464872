//! Test definition types
//!
//! Defines the data structures for deserializing YAML or JSON test suites.
//! Action and assertion kinds are closed enums; unknown kinds are rejected
//! while the file is parsed, before anything runs.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::common::{Error, Result};
use crate::driver::{ContextOptions, WaitUntil};

/// A named collection of tests loaded from one file
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TestSuite {
    /// Name of the suite (defaults to the file stem)
    #[serde(default)]
    pub name: Option<String>,
    /// Tests in declaration order
    #[serde(default)]
    pub tests: Vec<TestDefinition>,
}

/// One test case
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TestDefinition {
    /// Unique identifier within a batch
    pub id: String,
    /// Human readable name
    pub name: String,
    /// Optional description of what the test verifies
    #[serde(default)]
    pub description: Option<String>,
    /// The sequence of steps to execute
    #[serde(default)]
    pub steps: Vec<TestStep>,
    /// Steps that always run after the main sequence, pass or fail
    #[serde(default)]
    pub cleanup: Vec<TestStep>,
    /// Options for the execution context
    #[serde(default)]
    pub context: ContextOptions,
    /// Ceiling for this test, overriding the configured default
    #[serde(default, alias = "timeoutMs")]
    pub timeout_ms: Option<u64>,
    /// Restrict the browser flavors this test runs on
    #[serde(default)]
    pub browsers: Vec<String>,
}

/// A single step in the execution flow
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TestStep {
    /// Display name (derived from the action if absent)
    #[serde(default)]
    pub name: Option<String>,
    /// Keep going when this step fails
    #[serde(default, alias = "continueOnFailure")]
    pub continue_on_failure: bool,
    /// Variable store slot for the step's result
    #[serde(default, alias = "saveAs")]
    pub save_as: Option<String>,
    /// What the step does
    #[serde(flatten)]
    pub kind: StepKind,
}

/// Step action, tagged by the `action` field
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepKind {
    /// Load a URL into the page
    Navigate {
        url: String,
        #[serde(default, alias = "waitUntil")]
        wait_until: Option<WaitUntil>,
        #[serde(default, alias = "timeoutMs")]
        timeout_ms: Option<u64>,
    },
    /// Click the first element matching a selector
    Click { selector: String },
    /// Replace an input's value
    Fill { selector: String, value: String },
    /// Type into an element without clearing it
    Type { selector: String, value: String },
    /// Wait for a selector to appear, or sleep for a fixed duration
    Wait {
        #[serde(default)]
        selector: Option<String>,
        #[serde(default, alias = "durationMs")]
        duration_ms: Option<u64>,
        #[serde(default, alias = "timeoutMs")]
        timeout_ms: Option<u64>,
    },
    /// Capture the page
    Screenshot {
        #[serde(default, alias = "fullPage")]
        full_page: bool,
    },
    /// Check live page state
    Assert { check: PageAssertion },
    /// Perform an HTTP call
    Request(RequestSpec),
    /// Check a stored value (the last response by default)
    Assertion {
        #[serde(default)]
        target: Option<String>,
        check: AssertionSpec,
    },
    /// Prepare fixtures through a registered handler
    Setup {
        handler: String,
        #[serde(default)]
        params: Value,
    },
    /// Tear down fixtures through a registered handler
    Cleanup {
        handler: String,
        #[serde(default)]
        params: Value,
    },
    /// Opaque step implemented by a registered handler
    Custom {
        handler: String,
        #[serde(default)]
        params: Value,
    },
}

/// An HTTP request template; every string field may contain `{{placeholders}}`
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RequestSpec {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    /// Query parameters
    #[serde(default, alias = "query")]
    pub params: BTreeMap<String, String>,
    /// Total attempts for the network call (retry budget)
    #[serde(default, alias = "retries")]
    pub attempts: Option<u32>,
    /// Per-attempt timeout
    #[serde(default, alias = "timeoutMs")]
    pub timeout_ms: Option<u64>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Check against live page state
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageAssertion {
    /// Text of the first matching element
    Text {
        selector: String,
        #[serde(default)]
        equals: Option<String>,
        #[serde(default)]
        contains: Option<String>,
    },
    /// Whether the first matching element is displayed
    Visible {
        selector: String,
        #[serde(default = "default_true")]
        expected: bool,
    },
    /// Current page URL
    Url {
        #[serde(default)]
        equals: Option<String>,
        #[serde(default)]
        contains: Option<String>,
    },
    /// Number of matching elements
    Count { selector: String, equals: usize },
}

fn default_true() -> bool {
    true
}

/// Check against a captured response or stored value
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssertionSpec {
    /// HTTP status code equality
    Status { expected: u16 },
    /// Header value equality; the name matches case-insensitively
    Header { name: String, expected: String },
    /// Dotted-path lookup into the body; an absent `expected` means undefined
    Body {
        path: String,
        #[serde(default, deserialize_with = "present")]
        expected: Option<Value>,
    },
    /// Validate the body against a JSON schema
    Schema { schema: Value },
    /// Response time ceiling
    Performance {
        #[serde(alias = "maxDuration", alias = "max_duration")]
        max_duration_ms: u64,
    },
    /// Registered validator
    Custom {
        validator: String,
        #[serde(default)]
        params: Value,
    },
}

/// Distinguish `expected: null` (Some(Null)) from a missing key (None)
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl StepKind {
    /// Every accepted `action` value
    pub const ACTIONS: &'static [&'static str] = &[
        "navigate",
        "click",
        "fill",
        "type",
        "wait",
        "screenshot",
        "assert",
        "request",
        "assertion",
        "setup",
        "cleanup",
        "custom",
    ];

    pub fn action(&self) -> &'static str {
        match self {
            StepKind::Navigate { .. } => "navigate",
            StepKind::Click { .. } => "click",
            StepKind::Fill { .. } => "fill",
            StepKind::Type { .. } => "type",
            StepKind::Wait { .. } => "wait",
            StepKind::Screenshot { .. } => "screenshot",
            StepKind::Assert { .. } => "assert",
            StepKind::Request(_) => "request",
            StepKind::Assertion { .. } => "assertion",
            StepKind::Setup { .. } => "setup",
            StepKind::Cleanup { .. } => "cleanup",
            StepKind::Custom { .. } => "custom",
        }
    }

    /// Whether this step needs a page (as opposed to a bare HTTP context)
    pub fn needs_page(&self) -> bool {
        match self {
            StepKind::Navigate { .. }
            | StepKind::Click { .. }
            | StepKind::Fill { .. }
            | StepKind::Type { .. }
            | StepKind::Screenshot { .. }
            | StepKind::Assert { .. } => true,
            StepKind::Wait { selector, .. } => selector.is_some(),
            _ => false,
        }
    }
}

impl AssertionSpec {
    /// Every accepted assertion `type` value
    pub const KINDS: &'static [&'static str] =
        &["status", "header", "body", "schema", "performance", "custom"];
}

impl PageAssertion {
    /// Every accepted page assertion `type` value
    pub const KINDS: &'static [&'static str] = &["text", "visible", "url", "count"];
}

impl TestStep {
    /// Name shown in outcomes
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.kind {
            StepKind::Navigate { url, .. } => format!("navigate {}", url),
            StepKind::Click { selector } => format!("click {}", selector),
            StepKind::Fill { selector, .. } => format!("fill {}", selector),
            StepKind::Type { selector, .. } => format!("type {}", selector),
            StepKind::Wait {
                selector: Some(selector),
                ..
            } => format!("wait for {}", selector),
            StepKind::Wait {
                duration_ms: Some(ms),
                ..
            } => format!("wait {} ms", ms),
            StepKind::Wait { .. } => "wait".to_string(),
            StepKind::Screenshot { .. } => "screenshot".to_string(),
            StepKind::Assert { check } => format!("assert {}", check.describe()),
            StepKind::Request(spec) => format!("{} {}", spec.method.to_uppercase(), spec.url),
            StepKind::Assertion { check, .. } => format!("assertion {}", check.describe()),
            StepKind::Setup { handler, .. } => format!("setup {}", handler),
            StepKind::Cleanup { handler, .. } => format!("cleanup {}", handler),
            StepKind::Custom { handler, .. } => format!("custom {}", handler),
        }
    }

    /// Structural checks that serde cannot express
    pub fn validate(&self) -> Result<()> {
        let malformed =
            |msg: String| Err(Error::MalformedStep(format!("{}: {}", self.display_name(), msg)));

        match &self.kind {
            StepKind::Navigate { url, .. } if url.trim().is_empty() => {
                malformed("url is empty".to_string())
            }
            StepKind::Click { selector }
            | StepKind::Fill { selector, .. }
            | StepKind::Type { selector, .. }
                if selector.trim().is_empty() =>
            {
                malformed("selector is empty".to_string())
            }
            StepKind::Wait {
                selector,
                duration_ms,
                ..
            } => match (selector, duration_ms) {
                (Some(_), Some(_)) => {
                    malformed("'selector' and 'duration_ms' are mutually exclusive".to_string())
                }
                (None, None) => malformed("needs either 'selector' or 'duration_ms'".to_string()),
                (Some(selector), None) if selector.trim().is_empty() => {
                    malformed("selector is empty".to_string())
                }
                _ => Ok(()),
            },
            StepKind::Assert { check } => check.validate().or_else(|e| malformed(e)),
            StepKind::Request(spec) => {
                if spec.url.trim().is_empty() {
                    return malformed("url is empty".to_string());
                }
                if !is_known_method(&spec.method) {
                    return malformed(format!("unknown HTTP method '{}'", spec.method));
                }
                if spec.attempts == Some(0) {
                    return malformed("attempts must be at least 1".to_string());
                }
                Ok(())
            }
            StepKind::Assertion {
                check: AssertionSpec::Custom { validator, .. },
                ..
            } if validator.trim().is_empty() => malformed("validator name is empty".to_string()),
            StepKind::Setup { handler, .. }
            | StepKind::Cleanup { handler, .. }
            | StepKind::Custom { handler, .. }
                if handler.trim().is_empty() =>
            {
                malformed("handler name is empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

fn is_known_method(method: &str) -> bool {
    const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];
    method.contains("{{") || METHODS.contains(&method.to_uppercase().as_str())
}

impl PageAssertion {
    fn describe(&self) -> String {
        match self {
            PageAssertion::Text { selector, .. } => format!("text of {}", selector),
            PageAssertion::Visible { selector, .. } => format!("{} visible", selector),
            PageAssertion::Url { .. } => "url".to_string(),
            PageAssertion::Count { selector, .. } => format!("count of {}", selector),
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            PageAssertion::Text {
                equals, contains, ..
            }
            | PageAssertion::Url { equals, contains } => match (equals, contains) {
                (Some(_), Some(_)) => Err("'equals' and 'contains' are mutually exclusive".into()),
                (None, None) => Err("needs either 'equals' or 'contains'".into()),
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

impl AssertionSpec {
    fn describe(&self) -> String {
        match self {
            AssertionSpec::Status { expected } => format!("status {}", expected),
            AssertionSpec::Header { name, .. } => format!("header {}", name),
            AssertionSpec::Body { path, .. } => format!("body {}", path),
            AssertionSpec::Schema { .. } => "schema".to_string(),
            AssertionSpec::Performance { max_duration_ms } => {
                format!("duration <= {} ms", max_duration_ms)
            }
            AssertionSpec::Custom { validator, .. } => format!("custom {}", validator),
        }
    }
}

impl TestDefinition {
    /// Whether any step needs a browser page
    pub fn needs_browser(&self) -> bool {
        self.steps
            .iter()
            .chain(self.cleanup.iter())
            .any(|step| step.kind.needs_page())
    }

    /// The first request step, used as the load test template
    pub fn first_request(&self) -> Option<&RequestSpec> {
        self.steps.iter().find_map(|step| match &step.kind {
            StepKind::Request(spec) => Some(spec),
            _ => None,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Config(format!("test '{}' has an empty id", self.name)));
        }
        for step in self.steps.iter().chain(self.cleanup.iter()) {
            step.validate()
                .map_err(|e| Error::MalformedStep(format!("test '{}': {}", self.id, e)))?;
        }
        Ok(())
    }
}

impl TestSuite {
    /// Load a suite from a `.yaml`, `.yml` or `.json` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let mut suite = if is_json {
            Self::from_json(&content)?
        } else {
            Self::from_yaml(&content)?
        };

        if suite.name.is_none() {
            suite.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned());
        }
        Ok(suite)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let raw: Value = serde_yaml::from_str(content)?;
        Self::from_value(raw)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(content)?;
        Self::from_value(raw)
    }

    /// Accepts a suite object, a single test object, or a list of tests
    pub fn from_value(raw: Value) -> Result<Self> {
        let raw = match raw {
            Value::Array(tests) => serde_json::json!({ "tests": tests }),
            Value::Object(map) if !map.contains_key("tests") && map.contains_key("id") => {
                serde_json::json!({ "tests": [Value::Object(map)] })
            }
            other => other,
        };

        check_kinds(&raw)?;

        let suite: TestSuite = serde_json::from_value(raw)
            .map_err(|e| Error::Config(format!("Failed to parse test suite: {}", e)))?;
        suite.validate()?;
        Ok(suite)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for test in &self.tests {
            if !seen.insert(test.id.as_str()) {
                return Err(Error::Config(format!("duplicate test id '{}'", test.id)));
            }
            test.validate()?;
        }
        Ok(())
    }

    /// Keep only the tests whose id is listed (all tests if the list is empty)
    pub fn select(&mut self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        if let Some(missing) = ids
            .iter()
            .find(|id| !self.tests.iter().any(|test| &test.id == *id))
        {
            return Err(Error::Config(format!("no test with id '{}'", missing)));
        }
        self.tests.retain(|test| ids.contains(&test.id));
        Ok(())
    }
}

/// Reject unknown action and assertion kinds with a precise message
fn check_kinds(raw: &Value) -> Result<()> {
    let Some(tests) = raw.get("tests").and_then(Value::as_array) else {
        return Ok(());
    };

    for test in tests {
        let steps = ["steps", "cleanup"]
            .iter()
            .filter_map(|key| test.get(*key).and_then(Value::as_array))
            .flatten();

        for step in steps {
            let Some(action) = step.get("action").and_then(Value::as_str) else {
                return Err(Error::MalformedStep("step has no 'action'".to_string()));
            };
            if !StepKind::ACTIONS.contains(&action) {
                return Err(Error::UnknownAction(action.to_string()));
            }

            let kinds = match action {
                "assertion" => AssertionSpec::KINDS,
                "assert" => PageAssertion::KINDS,
                _ => continue,
            };
            let Some(check) = step.get("check") else {
                return Err(Error::MalformedStep(format!(
                    "'{}' step has no 'check'",
                    action
                )));
            };
            let kind = check.get("type").and_then(Value::as_str).unwrap_or("");
            if !kinds.contains(&kind) {
                return Err(Error::UnknownAssertion(kind.to_string()));
            }
        }
    }
    Ok(())
}
