//! Test result models
//!
//! Defines result states, the result tree and run summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::test_node::{TestId, TestKind, TestNode};

/// Primary outcome of a test or suite
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Inconclusive,
    Skipped,
    Passed,
    Failed,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Inconclusive => "?",
            TestStatus::Skipped => "○",
            TestStatus::Passed => "✓",
            TestStatus::Failed => "✗",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Passed)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Inconclusive => write!(f, "Inconclusive"),
            TestStatus::Skipped => write!(f, "Skipped"),
            TestStatus::Passed => write!(f, "Passed"),
            TestStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Refinement of a status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultLabel {
    Ignored,
    Explicit,
    Error,
    Cancelled,
    Invalid,
}

impl fmt::Display for ResultLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultLabel::Ignored => write!(f, "Ignored"),
            ResultLabel::Explicit => write!(f, "Explicit"),
            ResultLabel::Error => write!(f, "Error"),
            ResultLabel::Cancelled => write!(f, "Cancelled"),
            ResultLabel::Invalid => write!(f, "Invalid"),
        }
    }
}

/// Where a failure originated
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureSite {
    Test,
    SetUp,
    TearDown,
    Parent,
    Child,
}

/// Status, label and site of a result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultState {
    pub status: TestStatus,
    pub label: Option<ResultLabel>,
    pub site: FailureSite,
}

impl ResultState {
    pub const INCONCLUSIVE: Self = Self::new(TestStatus::Inconclusive, None);
    pub const SKIPPED: Self = Self::new(TestStatus::Skipped, None);
    pub const IGNORED: Self = Self::new(TestStatus::Skipped, Some(ResultLabel::Ignored));
    pub const EXPLICIT: Self = Self::new(TestStatus::Skipped, Some(ResultLabel::Explicit));
    pub const SUCCESS: Self = Self::new(TestStatus::Passed, None);
    pub const FAILURE: Self = Self::new(TestStatus::Failed, None);
    pub const ERROR: Self = Self::new(TestStatus::Failed, Some(ResultLabel::Error));
    pub const CANCELLED: Self = Self::new(TestStatus::Failed, Some(ResultLabel::Cancelled));
    pub const NOT_RUNNABLE: Self = Self::new(TestStatus::Failed, Some(ResultLabel::Invalid));
    pub const CHILD_FAILURE: Self = Self::FAILURE.with_site(FailureSite::Child);

    pub const fn new(status: TestStatus, label: Option<ResultLabel>) -> Self {
        Self {
            status,
            label,
            site: FailureSite::Test,
        }
    }

    pub const fn with_site(self, site: FailureSite) -> Self {
        Self {
            status: self.status,
            label: self.label,
            site,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.label == Some(ResultLabel::Cancelled)
    }
}

impl fmt::Display for ResultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label {
            Some(label) => write!(f, "{}:{}", self.status, label),
            None => write!(f, "{}", self.status),
        }
    }
}

/// Result of one test or suite, including the results of its children
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestResult {
    pub id: TestId,
    pub name: String,
    pub full_name: String,
    pub kind: TestKind,
    pub state: ResultState,
    pub message: Option<String>,
    pub stack_trace: Option<String>,
    pub output: Option<String>,
    pub assert_count: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub children: Vec<TestResult>,
}

impl TestResult {
    /// Fresh, inconclusive result for a node
    pub fn new(test: &TestNode) -> Self {
        Self {
            id: test.id(),
            name: test.name().to_string(),
            full_name: test.full_name().to_string(),
            kind: test.kind(),
            state: ResultState::INCONCLUSIVE,
            message: None,
            stack_trace: None,
            output: None,
            assert_count: 0,
            start_time: None,
            end_time: None,
            duration_ms: 0,
            children: Vec::new(),
        }
    }

    pub fn with_state(mut self, state: ResultState, message: Option<String>) -> Self {
        self.state = state;
        self.message = message;
        self
    }

    pub fn status(&self) -> TestStatus {
        self.state.status
    }

    pub fn is_leaf(&self) -> bool {
        !self.kind.is_suite()
    }

    /// Number of results in this tree, including this one
    pub fn result_count(&self) -> usize {
        1 + self.children.iter().map(|c| c.result_count()).sum::<usize>()
    }

    /// Depth-first iteration over this result and all descendants
    pub fn walk(&self) -> Vec<&TestResult> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }

    pub fn find(&self, full_name: &str) -> Option<&TestResult> {
        if self.full_name == full_name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(full_name))
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.state.status.symbol(),
            self.full_name,
            self.duration_ms
        )?;
        if let Some(msg) = &self.message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

/// Leaf-level counts for a finished run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub inconclusive: usize,
    pub skipped: usize,
    pub ignored: usize,
    pub explicit: usize,
    pub cancelled: usize,
    pub total_duration_ms: u64,
}

impl RunSummary {
    pub fn from_result(root: &TestResult) -> Self {
        let mut summary = Self {
            total_duration_ms: root.duration_ms,
            ..Self::default()
        };

        for result in root.walk().into_iter().filter(|r| r.is_leaf()) {
            summary.total += 1;
            match (result.state.status, result.state.label) {
                (TestStatus::Passed, _) => summary.passed += 1,
                (TestStatus::Failed, Some(ResultLabel::Cancelled)) => summary.cancelled += 1,
                (TestStatus::Failed, Some(ResultLabel::Error)) => summary.errors += 1,
                (TestStatus::Failed, _) => summary.failed += 1,
                (TestStatus::Inconclusive, _) => summary.inconclusive += 1,
                (TestStatus::Skipped, Some(ResultLabel::Ignored)) => summary.ignored += 1,
                (TestStatus::Skipped, Some(ResultLabel::Explicit)) => summary.explicit += 1,
                (TestStatus::Skipped, _) => summary.skipped += 1,
            }
        }

        summary
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    pub fn is_all_passed(&self) -> bool {
        self.total > 0 && self.passed == self.total
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Error: {} | Inconclusive: {} | Skip: {} | Ignored: {} | Explicit: {} | Cancelled: {}",
            self.total,
            self.passed,
            self.failed,
            self.errors,
            self.inconclusive,
            self.skipped,
            self.ignored,
            self.explicit,
            self.cancelled
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.total_duration_ms
        )
    }
}
