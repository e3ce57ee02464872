//! Test execution engine
//!
//! Reads declarative test definitions (YAML or JSON) and runs them against
//! execution contexts supplied by a [`crate::driver::ContextProvider`].
//! Each (flavor, test) pairing gets a fresh context and its own variable
//! store; results flow to a [`ResultSink`] as the run progresses.

pub mod assertion;
pub mod clock;
mod config;
pub mod handlers;
pub mod interpreter;
pub mod observer;
pub mod outcome;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod schema;
pub mod vars;

pub use assertion::Verdict;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::*;
pub use handlers::{FnHandler, HandlerRegistry, StepHandler, Validator};
pub use interpreter::{InterpreterSettings, StepInterpreter, StepResult};
pub use observer::{LogSink, NoopSink, ResultSink, TestProgress};
pub use outcome::{
    BatchSummary, LoadTestSummary, RequestRecord, Screenshot, ScreenshotKind, Status, StepOutcome,
    TestOutcome,
};
pub use registry::{RunRegistry, TestState};
pub use retry::RetryPolicy;
pub use runner::TestRunner;
pub use scheduler::{ramp_offsets, BatchReport, LoadTestOptions, Scheduler, SchedulerBuilder};
pub use schema::{BasicSchemaValidator, SchemaValidator};
pub use vars::VariableStore;
