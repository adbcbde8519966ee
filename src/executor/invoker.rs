//! Test body invocation
//!
//! The scheduler never knows how a test body is located or called. It hands
//! each node to a [`TestInvoker`] and turns whatever comes back, panics
//! included, into a result.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, info};

use super::context::ExecutionContext;
use crate::models::{ResultState, TestNode, TestResult};

/// What a test body reported when it returned normally
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestOutcome {
    pub state: ResultState,
    pub message: Option<String>,
    pub assert_count: u32,
    pub output: Option<String>,
}

impl TestOutcome {
    pub fn new(state: ResultState) -> Self {
        Self {
            state,
            message: None,
            assert_count: 0,
            output: None,
        }
    }

    pub fn passed() -> Self {
        Self::new(ResultState::SUCCESS)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ResultState::FAILURE).with_message(message)
    }

    pub fn inconclusive() -> Self {
        Self::new(ResultState::INCONCLUSIVE)
    }

    pub fn ignored(reason: impl Into<String>) -> Self {
        Self::new(ResultState::IGNORED).with_message(reason)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_asserts(mut self, count: u32) -> Self {
        self.assert_count = count;
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }
}

/// Recognized failure signals raised by test code, setup or teardown
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TestFailure {
    #[error("{message}")]
    Assertion {
        message: String,
        stack_trace: Option<String>,
    },

    #[error("{message}")]
    Error {
        message: String,
        stack_trace: Option<String>,
    },

    #[error("{0}")]
    Inconclusive(String),

    #[error("{0}")]
    Ignore(String),
}

impl TestFailure {
    pub fn assertion(message: impl Into<String>) -> Self {
        TestFailure::Assertion {
            message: message.into(),
            stack_trace: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        TestFailure::Error {
            message: message.into(),
            stack_trace: None,
        }
    }

    pub fn result_state(&self) -> ResultState {
        match self {
            TestFailure::Assertion { .. } => ResultState::FAILURE,
            TestFailure::Error { .. } => ResultState::ERROR,
            TestFailure::Inconclusive(_) => ResultState::INCONCLUSIVE,
            TestFailure::Ignore(_) => ResultState::IGNORED,
        }
    }

    pub fn stack_trace(&self) -> Option<&str> {
        match self {
            TestFailure::Assertion { stack_trace, .. } | TestFailure::Error { stack_trace, .. } => {
                stack_trace.as_deref()
            }
            _ => None,
        }
    }

    /// Convert a caught panic payload into an error failure
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "unknown panic payload".to_string()
        };
        TestFailure::error(format!("panicked: {message}"))
    }
}

/// Runs test bodies and one-time fixture hooks on behalf of the scheduler
pub trait TestInvoker: Send + Sync {
    fn run_test(
        &self,
        test: &TestNode,
        context: &mut ExecutionContext,
    ) -> Result<TestOutcome, TestFailure>;

    /// Called once before any child of `suite` runs. May install a fixture.
    fn one_time_setup(
        &self,
        _suite: &TestNode,
        _context: &mut ExecutionContext,
    ) -> Result<(), TestFailure> {
        Ok(())
    }

    /// Called once after every child of `suite` completed, if setup was attempted
    fn one_time_teardown(
        &self,
        _suite: &TestNode,
        _context: &mut ExecutionContext,
    ) -> Result<(), TestFailure> {
        Ok(())
    }
}

impl<F> TestInvoker for F
where
    F: Fn(&TestNode, &mut ExecutionContext) -> Result<TestOutcome, TestFailure> + Send + Sync,
{
    fn run_test(
        &self,
        test: &TestNode,
        context: &mut ExecutionContext,
    ) -> Result<TestOutcome, TestFailure> {
        self(test, context)
    }
}

/// Run `f`, turning a panic into [`TestFailure::Error`]
pub fn guarded<T>(f: impl FnOnce() -> Result<T, TestFailure>) -> Result<T, TestFailure> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(TestFailure::from_panic(payload)),
    }
}

/// Build the result of a leaf from what its body produced
pub fn leaf_result(test: &TestNode, outcome: Result<TestOutcome, TestFailure>) -> TestResult {
    let mut result = TestResult::new(test);
    match outcome {
        Ok(outcome) => {
            result.state = outcome.state;
            result.message = outcome.message;
            result.assert_count = outcome.assert_count;
            result.output = outcome.output;
        }
        Err(failure) => {
            result.state = failure.result_state();
            result.stack_trace = failure.stack_trace().map(str::to_string);
            result.message = Some(failure.to_string());
        }
    }
    result
}

/// Progress notifications raised by the scheduler
pub trait ExecutionListener: Send + Sync {
    fn test_started(&self, test: &TestNode);

    fn test_finished(&self, result: &TestResult);
}

/// Listener that ignores every notification
#[derive(Clone, Copy, Debug, Default)]
pub struct NullListener;

impl ExecutionListener for NullListener {
    fn test_started(&self, _test: &TestNode) {}

    fn test_finished(&self, _result: &TestResult) {}
}

/// Listener that reports progress through tracing
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingListener;

impl ExecutionListener for LoggingListener {
    fn test_started(&self, test: &TestNode) {
        debug!("Starting {}", test.full_name());
    }

    fn test_finished(&self, result: &TestResult) {
        if result.is_leaf() {
            info!("  {}", result);
        } else {
            debug!("Finished {} ({})", result.full_name, result.state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IdGenerator, NodeBuilder, ResultLabel, TestStatus};

    #[test]
    fn test_failure_states() {
        assert_eq!(TestFailure::assertion("x").result_state(), ResultState::FAILURE);
        assert_eq!(
            TestFailure::error("x").result_state().label,
            Some(ResultLabel::Error)
        );
        assert_eq!(
            TestFailure::Inconclusive("no data".into()).result_state(),
            ResultState::INCONCLUSIVE
        );
        assert_eq!(
            TestFailure::Ignore("later".into()).result_state(),
            ResultState::IGNORED
        );
    }

    #[test]
    fn test_guarded_catches_panics() {
        let outcome: Result<(), TestFailure> = guarded(|| panic!("boom"));
        assert_eq!(outcome, Err(TestFailure::error("panicked: boom")));

        let formatted: Result<(), TestFailure> = guarded(|| panic!("code {}", 7));
        assert_eq!(formatted, Err(TestFailure::error("panicked: code 7")));

        assert_eq!(guarded(|| Ok(5)), Ok(5));
    }

    #[test]
    fn test_closure_invoker_and_leaf_result() {
        let node = NodeBuilder::test("T").build(&mut IdGenerator::new(0));
        let invoker = |_: &TestNode, _: &mut ExecutionContext| -> Result<TestOutcome, TestFailure> {
            Ok(TestOutcome::passed().with_asserts(3).with_output("hello"))
        };
        let mut ctx = ExecutionContext::new(0);

        let result = leaf_result(&node, invoker.run_test(&node, &mut ctx));
        assert_eq!(result.status(), TestStatus::Passed);
        assert_eq!(result.assert_count, 3);
        assert_eq!(result.output.as_deref(), Some("hello"));
        assert!(invoker.one_time_setup(&node, &mut ctx).is_ok());
    }

    #[test]
    fn test_leaf_result_from_failure() {
        let node = NodeBuilder::test("T").build(&mut IdGenerator::new(0));
        let failure = TestFailure::Assertion {
            message: "expected 1, got 2".into(),
            stack_trace: Some("at T".into()),
        };
        let result = leaf_result(&node, Err(failure));
        assert_eq!(result.state, ResultState::FAILURE);
        assert_eq!(result.message.as_deref(), Some("expected 1, got 2"));
        assert_eq!(result.stack_trace.as_deref(), Some("at T"));
    }
}
