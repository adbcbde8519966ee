//! Result aggregation for composite work items

use crate::models::{FailureSite, ResultLabel, ResultState, TestKind, TestResult, TestStatus};

/// How a composite derives its state from its children
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rollup {
    /// Failed if any child failed, else Passed if any passed, else
    /// Inconclusive if all were inconclusive, else Skipped
    Standard,
    /// Standard, except that a group whose every case was inconclusive
    /// (or that has no cases at all) fails
    Grouped,
}

impl Rollup {
    pub fn for_kind(kind: TestKind) -> Self {
        if kind.is_grouped() {
            Rollup::Grouped
        } else {
            Rollup::Standard
        }
    }

    pub fn aggregate(self, children: &[TestResult]) -> (ResultState, Option<String>) {
        if self == Rollup::Grouped {
            if children.is_empty() {
                return (
                    ResultState::NOT_RUNNABLE,
                    Some("No test cases were provided".to_string()),
                );
            }
            if children
                .iter()
                .all(|c| c.status() == TestStatus::Inconclusive)
            {
                return (
                    ResultState::FAILURE.with_site(FailureSite::Child),
                    Some("All test cases were inconclusive".to_string()),
                );
            }
        }
        standard(children)
    }
}

fn standard(children: &[TestResult]) -> (ResultState, Option<String>) {
    let failed: Vec<&TestResult> = children
        .iter()
        .filter(|c| c.status() == TestStatus::Failed)
        .collect();

    if !failed.is_empty() {
        if failed.iter().all(|c| c.state.is_cancelled()) {
            return (
                ResultState::CANCELLED.with_site(FailureSite::Child),
                Some("Test run was cancelled".to_string()),
            );
        }
        return (
            ResultState::CHILD_FAILURE,
            Some("One or more child tests had errors".to_string()),
        );
    }

    if children.iter().any(|c| c.status() == TestStatus::Passed) {
        return (ResultState::SUCCESS, None);
    }

    if children
        .iter()
        .all(|c| c.status() == TestStatus::Inconclusive)
    {
        return (ResultState::INCONCLUSIVE, None);
    }

    if children
        .iter()
        .any(|c| c.state.label == Some(ResultLabel::Ignored))
    {
        return (
            ResultState::IGNORED.with_site(FailureSite::Child),
            Some("One or more child tests were ignored".to_string()),
        );
    }

    (ResultState::SKIPPED, None)
}
