use std::fmt::Debug;

use crate::{
    error::{CompletionError, TracingError},
    eval::fixture::{FixtureError, TestFixture},
    pipeline::{InquiryResult, PipelineError},
};

/// A checked property that did not hold. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct AssertionFailure {
    pub reason: String,
}

impl AssertionFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Anything that can end a test early. The runner turns every variant into a
/// failed result.
#[derive(Debug, thiserror::Error)]
pub enum CaseError {
    #[error(transparent)]
    Assertion(#[from] AssertionFailure),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error(transparent)]
    Tracing(#[from] TracingError),
    #[error(transparent)]
    Fixture(#[from] FixtureError),
}

pub fn ensure(condition: bool, reason: impl FnOnce() -> String) -> Result<(), AssertionFailure> {
    if condition {
        Ok(())
    } else {
        Err(AssertionFailure::new(reason()))
    }
}

pub fn ensure_eq<T: PartialEq + Debug>(
    what: &str,
    actual: &T,
    expected: &T,
) -> Result<(), AssertionFailure> {
    ensure(actual == expected, || {
        format!("{what}: expected {expected:?}, got {actual:?}")
    })
}

/// Category must match exactly; the response must be longer than the
/// fixture's minimum, counted in characters.
pub fn check_inquiry(result: &InquiryResult, fixture: &TestFixture) -> Result<(), AssertionFailure> {
    ensure_eq("category", &result.category, &fixture.expected_category)?;

    let length = result.response.chars().count();
    ensure(length > fixture.expected_min_response_length, || {
        format!(
            "response length {length} is not greater than {}",
            fixture.expected_min_response_length
        )
    })
}
