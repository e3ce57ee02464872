//! Registered handlers behind `setup`, `cleanup`, `custom` steps and
//! `custom` assertions
//!
//! The engine treats handlers as opaque: it only observes success or failure
//! (and stores a successful handler's returned value under `save_as`).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::common::{Error, Result};
use crate::driver::ExecutionContext;

use super::assertion::Verdict;
use super::vars::VariableStore;

/// Implementation of a `setup`, `cleanup` or `custom` step
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// `params` have already been interpolated
    async fn run(
        &self,
        context: &mut dyn ExecutionContext,
        params: &Value,
        vars: &VariableStore,
    ) -> std::result::Result<Value, String>;
}

/// Predicate behind a `custom` assertion
///
/// `subject` is the checked value (the last response unless the step names
/// a `target`) and `params` the step's interpolated parameters. The test's
/// context reaches the predicate as the variable store, which holds every
/// saved value and response. Validators are synchronous and never see the
/// live page; checks against page state belong in `assert` steps or a
/// [`StepHandler`], which does receive the [`ExecutionContext`].
pub trait Validator: Send + Sync {
    fn validate(&self, subject: &Value, params: &Value, vars: &VariableStore) -> Verdict;
}

impl<F> Validator for F
where
    F: Fn(&Value, &Value, &VariableStore) -> Verdict + Send + Sync,
{
    fn validate(&self, subject: &Value, params: &Value, vars: &VariableStore) -> Verdict {
        self(subject, params, vars)
    }
}

/// Adapts a plain function that needs neither the context nor the store
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> StepHandler for FnHandler<F>
where
    F: Fn(&Value) -> std::result::Result<Value, String> + Send + Sync,
{
    async fn run(
        &self,
        _context: &mut dyn ExecutionContext,
        params: &Value,
        _vars: &VariableStore,
    ) -> std::result::Result<Value, String> {
        (self.0)(params)
    }
}

/// Named handlers and validators available to a run
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
    validators: HashMap<String, Arc<dyn Validator>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the `shell` and `log` handlers
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_handler("shell", ShellHandler);
        registry.register_handler("log", LogHandler);
        registry
    }

    pub fn register_handler(&mut self, name: impl Into<String>, handler: impl StepHandler + 'static) {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn register_validator(&mut self, name: impl Into<String>, validator: impl Validator + 'static) {
        self.validators.insert(name.into(), Arc::new(validator));
    }

    pub fn handler(&self, name: &str) -> Result<Arc<dyn StepHandler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::missing_handler("handler", name))
    }

    pub fn validator(&self, name: &str) -> Result<Arc<dyn Validator>> {
        self.validators
            .get(name)
            .cloned()
            .ok_or_else(|| Error::missing_handler("validator", name))
    }
}

/// Runs `params.command` through `sh -c`; fails on a non-zero exit code
pub struct ShellHandler;

#[async_trait]
impl StepHandler for ShellHandler {
    async fn run(
        &self,
        _context: &mut dyn ExecutionContext,
        params: &Value,
        _vars: &VariableStore,
    ) -> std::result::Result<Value, String> {
        let command = params
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| "shell handler needs a 'command' parameter".to_string())?;

        tracing::debug!("$ {}", command);
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| format!("failed to execute '{}': {}", command, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "'{}' failed with exit code {:?}: {}",
                command,
                output.status.code(),
                stderr.trim()
            ));
        }

        Ok(json!({ "exit_code": output.status.code(), "stdout": stdout }))
    }
}

/// Logs `params.message` at info level
pub struct LogHandler;

#[async_trait]
impl StepHandler for LogHandler {
    async fn run(
        &self,
        _context: &mut dyn ExecutionContext,
        params: &Value,
        _vars: &VariableStore,
    ) -> std::result::Result<Value, String> {
        let message = params
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        tracing::info!("{}", message);
        Ok(params.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::HttpContext;

    #[tokio::test]
    async fn test_missing_handler_is_configuration_error() {
        let registry = HandlerRegistry::new();
        let err = registry.handler("seed-db").err().unwrap();
        assert_eq!(err.to_string(), "No handler registered under 'seed-db'");
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_fn_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register_handler(
            "double",
            FnHandler(|params: &Value| {
                params["n"]
                    .as_i64()
                    .map(|n| json!(n * 2))
                    .ok_or_else(|| "n missing".to_string())
            }),
        );
        let handler = registry.handler("double").unwrap();
        let mut ctx = HttpContext::new();
        let vars = VariableStore::new();
        assert_eq!(
            handler.run(&mut ctx, &json!({"n": 21}), &vars).await,
            Ok(json!(42))
        );
        assert!(handler.run(&mut ctx, &json!({}), &vars).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_handler() {
        let mut ctx = HttpContext::new();
        let vars = VariableStore::new();
        let ok = ShellHandler
            .run(&mut ctx, &json!({"command": "echo ready"}), &vars)
            .await
            .unwrap();
        assert_eq!(ok["stdout"], "ready");

        let err = ShellHandler
            .run(&mut ctx, &json!({"command": "exit 3"}), &vars)
            .await
            .unwrap_err();
        assert!(err.contains("exit code Some(3)"));
    }

    #[test]
    fn test_closure_validator() {
        let mut registry = HandlerRegistry::new();
        registry.register_validator(
            "non-empty",
            |subject: &Value, _params: &Value, _vars: &VariableStore| {
                if subject["body"].as_array().map(|a| a.is_empty()).unwrap_or(true) {
                    Verdict::fail("body is empty")
                } else {
                    Verdict::Pass
                }
            },
        );
        let validator = registry.validator("non-empty").unwrap();
        let vars = VariableStore::new();
        assert!(validator
            .validate(&json!({"body": [1]}), &Value::Null, &vars)
            .is_pass());
        assert!(!validator
            .validate(&json!({"body": []}), &Value::Null, &vars)
            .is_pass());
    }
}
