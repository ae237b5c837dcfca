use std::panic::AssertUnwindSafe;

use futures_util::future::{FutureExt, LocalBoxFuture};

use crate::{
    eval::{
        assertions::{check_inquiry, CaseError},
        fixture::FixtureSet,
        report::{RunSummary, TestResult},
    },
    pipeline::process_customer_message,
    structured::StructuredClient,
    trace::SpanScope,
};

type TestBody<'a> = Box<dyn FnOnce() -> LocalBoxFuture<'a, Result<(), CaseError>> + 'a>;

/// A named, zero-argument test. Success is `Ok(())`.
pub struct NamedTest<'a> {
    name: String,
    execute: TestBody<'a>,
}

impl<'a> NamedTest<'a> {
    pub fn new<F, Fut>(name: impl Into<String>, execute: F) -> Self
    where
        F: FnOnce() -> Fut + 'a,
        Fut: std::future::Future<Output = Result<(), CaseError>> + 'a,
    {
        Self {
            name: name.into(),
            execute: Box::new(move || execute().boxed_local()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for NamedTest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedTest").field("name", &self.name).finish()
    }
}

#[derive(Debug, Default)]
pub struct EvalRunner;

impl EvalRunner {
    pub fn new() -> Self {
        Self
    }

    /// Runs every test in order. A failing or panicking test is recorded and
    /// the suite moves on.
    pub async fn run_suite(&self, tests: Vec<NamedTest<'_>>) -> RunSummary {
        let mut summary = RunSummary::default();

        for test in tests {
            let NamedTest { name, execute } = test;
            tracing::debug!(test = %name, "running test");

            let outcome = AssertUnwindSafe(execute()).catch_unwind().await;
            let result = match outcome {
                Ok(Ok(())) => TestResult::pass(&name),
                Ok(Err(error)) => TestResult::fail(&name, error.to_string()),
                Err(panic) => TestResult::fail(&name, panic_message(panic.as_ref())),
            };

            if result.passed {
                tracing::info!(test = %name, "test passed");
            } else {
                tracing::info!(
                    test = %name,
                    reason = result.failure_reason.as_deref().unwrap_or_default(),
                    "test failed"
                );
            }
            summary.record(result);
        }

        summary
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

/// One test per fixture: classify the fixture message and check category and
/// response length. Finished traces are flushed after each classification.
pub fn inquiry_suite<'a>(
    client: &'a StructuredClient,
    scope: &'a SpanScope,
    fixtures: &'a FixtureSet,
) -> Vec<NamedTest<'a>> {
    fixtures
        .iter()
        .map(|(name, fixture)| {
            NamedTest::new(name, move || async move {
                let result = process_customer_message(client, scope, &fixture.message).await;
                scope.recorder().flush().await;
                check_inquiry(&result?, fixture)?;
                Ok::<(), CaseError>(())
            })
        })
        .collect()
}
