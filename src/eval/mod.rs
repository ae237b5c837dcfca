//! Fixture-driven evaluation: load fixtures, run named tests, report.

pub mod assertions;
pub mod fixture;
pub mod report;
pub mod runner;

pub use assertions::{check_inquiry, ensure, ensure_eq, AssertionFailure, CaseError};
pub use fixture::{FixtureError, FixtureSet, TestFixture};
pub use report::{ExitPolicy, RunSummary, TestResult};
pub use runner::{inquiry_suite, EvalRunner, NamedTest};
