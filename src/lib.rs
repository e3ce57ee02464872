//! runwright - declarative browser and API test runner
//!
//! This library runs step-based test definitions against WebDriver browser
//! sessions or bare HTTP contexts, with bounded retries, concurrent browser
//! matrices and ramped load tests.

pub mod cli;
pub mod commands;
pub mod common;
pub mod driver;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, ErrorKind, Result};
