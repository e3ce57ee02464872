//! Result records produced by a run
//!
//! Serialized with camelCase keys for JSON reports; screenshot bytes are
//! base64-encoded.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use super::clock::elapsed_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Passed,
    Failed,
}

/// Result of one step; never modified once produced
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub name: String,
    pub action: String,
    pub status: Status,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_base64"
    )]
    pub screenshot: Option<Vec<u8>>,
}

impl StepOutcome {
    pub fn passed(&self) -> bool {
        self.status == Status::Passed
    }

    pub fn duration_ms(&self) -> u64 {
        elapsed_ms(self.start_time, self.end_time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotKind {
    /// Taken by a `screenshot` step
    Step,
    /// Best-effort capture after a blocking failure
    Failure,
}

#[derive(Debug, Clone, Serialize)]
pub struct Screenshot {
    #[serde(rename = "type")]
    pub kind: ScreenshotKind,
    #[serde(serialize_with = "serialize_base64")]
    pub data: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// Result of one (flavor, test) pairing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestOutcome {
    pub id: String,
    pub name: String,
    pub flavor: String,
    pub status: Status,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub steps: Vec<StepOutcome>,
    /// Outcomes of the declared cleanup sequence; never affect `status`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cleanup: Vec<StepOutcome>,
    /// First blocking error, verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub screenshots: Vec<Screenshot>,
}

impl TestOutcome {
    /// Outcome in the `running` state; the runner fills in the rest
    pub fn start(id: &str, name: &str, flavor: &str, start_time: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            flavor: flavor.to_string(),
            status: Status::Passed,
            start_time,
            end_time: start_time,
            steps: Vec::new(),
            cleanup: Vec::new(),
            error: None,
            screenshots: Vec::new(),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == Status::Passed
    }

    /// Mark failed, keeping the first blocking error
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = Status::Failed;
        if self.error.is_none() {
            self.error = Some(error.into());
        }
    }

    /// Set `end_time`, never earlier than `start_time`
    pub fn finish(&mut self, end_time: DateTime<Utc>) {
        self.end_time = end_time.max(self.start_time);
    }

    pub fn duration_ms(&self) -> u64 {
        elapsed_ms(self.start_time, self.end_time)
    }

    /// The step that caused the failure, if a step did
    pub fn failed_step(&self) -> Option<&StepOutcome> {
        self.steps.iter().rev().find(|step| !step.passed())
    }
}

/// One load test request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub timestamp: DateTime<Utc>,
    /// `None` when no response was received
    pub status: Option<u16>,
    pub latency_ms: u64,
    pub success: bool,
}

/// Aggregate over a load test request log
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadTestSummary {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub avg_latency_ms: f64,
    /// Requests per second over the run window
    pub throughput_rps: f64,
    pub duration_ms: u64,
}

impl LoadTestSummary {
    /// Summarize `records` collected over `window`
    ///
    /// An empty log or a zero window yields zero throughput.
    pub fn from_records(records: &[RequestRecord], window: Duration) -> Self {
        let duration_ms = window.as_millis().min(u128::from(u64::MAX)) as u64;
        if records.is_empty() {
            return Self {
                duration_ms,
                ..Self::default()
            };
        }

        let total = records.len() as u64;
        let successful = records.iter().filter(|r| r.success).count() as u64;
        let latencies = records.iter().map(|r| r.latency_ms);
        let min = latencies.clone().min().unwrap_or(0);
        let max = latencies.clone().max().unwrap_or(0);
        let sum: u64 = latencies.sum();

        let seconds = window.as_secs_f64();
        let throughput = if seconds > 0.0 {
            total as f64 / seconds
        } else {
            0.0
        };

        Self {
            total_requests: total,
            successful_requests: successful,
            failed_requests: total - successful,
            min_latency_ms: min,
            max_latency_ms: max,
            avg_latency_ms: sum as f64 / total as f64,
            throughput_rps: throughput,
            duration_ms,
        }
    }
}

/// Totals for a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[TestOutcome], start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let passed = outcomes.iter().filter(|o| o.passed()).count();
        Self {
            total: outcomes.len(),
            passed,
            failed: outcomes.len() - passed,
            duration_ms: elapsed_ms(start, end),
        }
    }
}

fn serialize_base64<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    use base64::Engine;
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
}

fn serialize_opt_base64<S: Serializer>(
    data: &Option<Vec<u8>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match data {
        Some(data) => serialize_base64(data, serializer),
        None => serializer.serialize_none(),
    }
}
