//! Assertion evaluation
//!
//! Response assertions look at a captured value (normally the stored shape of
//! an [`crate::driver::HttpResponse`]: `status`, `headers`, `body`,
//! `duration_ms`). Page assertions query live state through the execution
//! context.

use serde_json::Value;

use crate::common::Result;
use crate::driver::ExecutionContext;

use super::config::{AssertionSpec, PageAssertion};
use super::handlers::HandlerRegistry;
use super::schema::SchemaValidator;
use super::vars::{lookup_path, VariableStore};

/// Result of one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail(String),
}

impl Verdict {
    pub fn fail(message: impl Into<String>) -> Self {
        Verdict::Fail(message.into())
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    fn check(ok: bool, message: impl FnOnce() -> String) -> Self {
        if ok {
            Verdict::Pass
        } else {
            Verdict::Fail(message())
        }
    }
}

/// Evaluate a response assertion against `subject`
///
/// Only an unregistered custom validator is an error; every mismatch is a
/// [`Verdict::Fail`].
pub fn evaluate(
    spec: &AssertionSpec,
    subject: &Value,
    vars: &VariableStore,
    handlers: &HandlerRegistry,
    schema: &dyn SchemaValidator,
) -> Result<Verdict> {
    let verdict = match spec {
        AssertionSpec::Status { expected } => {
            let actual = subject.get("status").and_then(Value::as_u64);
            Verdict::check(actual == Some(u64::from(*expected)), || {
                format!("expected status {}, got {}", expected, describe_opt(actual))
            })
        }
        AssertionSpec::Header { name, expected } => {
            let actual = subject
                .get("headers")
                .and_then(Value::as_object)
                .and_then(|headers| {
                    headers
                        .iter()
                        .find(|(key, _)| key.eq_ignore_ascii_case(name))
                        .map(|(_, value)| value)
                })
                .map(|value| value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string()));
            Verdict::check(actual.as_deref() == Some(expected.as_str()), || {
                format!(
                    "expected header '{}' to be '{}', got {}",
                    name,
                    expected,
                    actual
                        .as_deref()
                        .map(|v| format!("'{}'", v))
                        .unwrap_or_else(|| "undefined".to_string())
                )
            })
        }
        AssertionSpec::Body { path, expected } => {
            let actual = lookup_path(body_of(subject), path);
            let equal = match (actual, expected) {
                (None, None) => true,
                (Some(actual), Some(expected)) => values_equal(actual, expected),
                _ => false,
            };
            Verdict::check(equal, || {
                format!(
                    "expected body.{} to equal {}, got {}",
                    path,
                    describe(expected.as_ref()),
                    describe(actual)
                )
            })
        }
        AssertionSpec::Schema { schema: document } => {
            match schema.validate(body_of(subject), document) {
                Ok(()) => Verdict::Pass,
                Err(message) => Verdict::Fail(format!("schema validation failed: {}", message)),
            }
        }
        AssertionSpec::Performance { max_duration_ms } => {
            match subject.get("duration_ms").and_then(Value::as_u64) {
                Some(actual) => Verdict::check(actual <= *max_duration_ms, || {
                    format!(
                        "response took {} ms, exceeding the {} ms limit",
                        actual, max_duration_ms
                    )
                }),
                None => Verdict::fail("no duration was captured for the subject"),
            }
        }
        AssertionSpec::Custom { validator, params } => {
            let validator_fn = handlers.validator(validator)?;
            let params = vars.interpolate(params);
            match validator_fn.validate(subject, &params, vars) {
                Verdict::Pass => Verdict::Pass,
                Verdict::Fail(message) => {
                    Verdict::Fail(format!("validator '{}': {}", validator, message))
                }
            }
        }
    };
    Ok(verdict)
}

/// Evaluate a page assertion against the live context
///
/// Returns the observed value alongside the verdict; it becomes the step's
/// `save_as` value.
pub async fn evaluate_page(
    check: &PageAssertion,
    context: &mut dyn ExecutionContext,
    vars: &VariableStore,
) -> Result<(Verdict, Value)> {
    match check {
        PageAssertion::Text {
            selector,
            equals,
            contains,
        } => {
            let selector = vars.interpolate_str(selector);
            let Some(text) = context.text_content(&selector).await? else {
                return Ok((
                    Verdict::fail(format!("no element matches selector '{}'", selector)),
                    Value::Null,
                ));
            };
            let verdict = match (equals, contains) {
                (Some(expected), _) => {
                    let expected = vars.interpolate_str(expected);
                    Verdict::check(text.trim() == expected, || {
                        format!("expected text of '{}' to be '{}', got '{}'", selector, expected, text)
                    })
                }
                (None, Some(needle)) => {
                    let needle = vars.interpolate_str(needle);
                    Verdict::check(text.contains(&needle), || {
                        format!("expected text of '{}' to contain '{}', got '{}'", selector, needle, text)
                    })
                }
                (None, None) => Verdict::Pass,
            };
            Ok((verdict, Value::String(text)))
        }
        PageAssertion::Visible { selector, expected } => {
            let selector = vars.interpolate_str(selector);
            let visible = context.is_visible(&selector).await?;
            let verdict = Verdict::check(visible == *expected, || {
                if *expected {
                    format!("expected '{}' to be visible", selector)
                } else {
                    format!("expected '{}' to be hidden", selector)
                }
            });
            Ok((verdict, Value::Bool(visible)))
        }
        PageAssertion::Url { equals, contains } => {
            let url = context.url().await?;
            let verdict = match (equals, contains) {
                (Some(expected), _) => {
                    let expected = vars.interpolate_str(expected);
                    Verdict::check(url == expected, || {
                        format!("expected url '{}', got '{}'", expected, url)
                    })
                }
                (None, Some(needle)) => {
                    let needle = vars.interpolate_str(needle);
                    Verdict::check(url.contains(&needle), || {
                        format!("expected url to contain '{}', got '{}'", needle, url)
                    })
                }
                (None, None) => Verdict::Pass,
            };
            Ok((verdict, Value::String(url)))
        }
        PageAssertion::Count { selector, equals } => {
            let selector = vars.interpolate_str(selector);
            let count = context.count(&selector).await?;
            let verdict = Verdict::check(count == *equals, || {
                format!("expected {} elements matching '{}', found {}", equals, selector, count)
            });
            Ok((verdict, Value::from(count)))
        }
    }
}

/// The body of a stored response, or the value itself for non-response subjects
fn body_of(subject: &Value) -> &Value {
    match subject {
        Value::Object(map) if map.contains_key("status") && map.contains_key("body") => &map["body"],
        other => other,
    }
}

/// JSON equality where `1` and `1.0` are the same number
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).map(|y| values_equal(x, y)).unwrap_or(false))
        }
        _ => a == b,
    }
}

fn describe(value: Option<&Value>) -> String {
    value
        .map(Value::to_string)
        .unwrap_or_else(|| "undefined".to_string())
}

fn describe_opt(value: Option<u64>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "undefined".to_string())
}
