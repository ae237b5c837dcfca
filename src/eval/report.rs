use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl TestResult {
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            failure_reason: None,
        }
    }

    pub fn fail(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            failure_reason: Some(reason.into()),
        }
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed {
            write!(f, "✅ {}", self.name)
        } else {
            write!(f, "❌ {}", self.name)?;
            if let Some(reason) = &self.failure_reason {
                write!(f, "\n   {reason}")?;
            }
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub passed_count: usize,
    pub total_count: usize,
    pub results: Vec<TestResult>,
}

impl RunSummary {
    pub fn record(&mut self, result: TestResult) {
        if result.passed {
            self.passed_count += 1;
        }
        self.total_count += 1;
        self.results.push(result);
    }

    pub fn failed(&self) -> impl Iterator<Item = &TestResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    pub fn all_passed(&self) -> bool {
        self.passed_count == self.total_count
    }

    pub fn summary_line(&self) -> String {
        format!("Results: {}/{} tests passed", self.passed_count, self.total_count)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            writeln!(f, "{result}")?;
        }
        write!(f, "\n{}", self.summary_line())
    }
}

/// Whether failed tests change the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitPolicy {
    /// Report only; always exit 0.
    #[default]
    AlwaysSucceed,
    FailOnAnyFailure,
}

impl ExitPolicy {
    pub fn exit_code(&self, summary: &RunSummary) -> i32 {
        match self {
            ExitPolicy::AlwaysSucceed => 0,
            ExitPolicy::FailOnAnyFailure if summary.all_passed() => 0,
            ExitPolicy::FailOnAnyFailure => 1,
        }
    }
}
