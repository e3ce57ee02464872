//! Registry of active test executions
//!
//! Shared by handle between the scheduler, its runners and whoever may ask a
//! test to stop (e.g. the ctrl-c handler). Stopping is cooperative: runners
//! check the flag before each step.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Lifecycle of one test execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestState {
    Pending,
    Running,
    Passed,
    Failed,
}

impl TestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TestState::Passed | TestState::Failed)
    }
}

#[derive(Debug, Default)]
struct Entry {
    stopped: bool,
    /// Keyed by flavor
    states: HashMap<String, TestState>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Set by `stop_all`; also covers tests registered afterwards
    all_stopped: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a (test, flavor) pairing as pending
    ///
    /// A stop requested before registration stays in effect.
    pub fn register(&self, test_id: &str, flavor: &str) {
        self.set_state(test_id, flavor, TestState::Pending);
    }

    pub fn set_state(&self, test_id: &str, flavor: &str, state: TestState) {
        let mut inner = self.inner.lock();
        inner
            .entries
            .entry(test_id.to_string())
            .or_default()
            .states
            .insert(flavor.to_string(), state);
    }

    /// Ask every execution of `test_id` to stop at its next step boundary
    pub fn stop(&self, test_id: &str) {
        self.inner
            .lock()
            .entries
            .entry(test_id.to_string())
            .or_default()
            .stopped = true;
    }

    pub fn stop_all(&self) {
        let mut inner = self.inner.lock();
        inner.all_stopped = true;
        for entry in inner.entries.values_mut() {
            entry.stopped = true;
        }
    }

    pub fn is_stopped(&self, test_id: &str) -> bool {
        let inner = self.inner.lock();
        inner.all_stopped
            || inner
                .entries
                .get(test_id)
                .map(|entry| entry.stopped)
                .unwrap_or(false)
    }

    pub fn finish(&self, test_id: &str, flavor: &str, passed: bool) {
        let state = if passed {
            TestState::Passed
        } else {
            TestState::Failed
        };
        self.set_state(test_id, flavor, state);
    }

    pub fn state(&self, test_id: &str, flavor: &str) -> Option<TestState> {
        self.inner
            .lock()
            .entries
            .get(test_id)
            .and_then(|entry| entry.states.get(flavor).copied())
    }

    /// Ids with at least one execution not yet finished, sorted
    pub fn active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| entry.states.values().any(|state| !state.is_terminal()))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
