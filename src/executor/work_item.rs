//! Work items
//!
//! Schedulable wrapper around one test node. Owns the work items of the
//! children the filter lets through and a result that is written once.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::invoker::ExecutionListener;
use crate::filter::TestFilter;
use crate::models::{ResultState, RunState, TestNode, TestResult};

/// Lifecycle of a work item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkItemState {
    Ready,
    Running,
    WaitingForChildren,
    Complete,
}

impl WorkItemState {
    pub fn can_transition_to(self, next: WorkItemState) -> bool {
        use WorkItemState::*;
        matches!(
            (self, next),
            (Ready, Running)
                | (Ready, Complete)
                | (Running, WaitingForChildren)
                | (Running, Complete)
                | (WaitingForChildren, Complete)
        )
    }
}

impl fmt::Display for WorkItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkItemState::Ready => write!(f, "Ready"),
            WorkItemState::Running => write!(f, "Running"),
            WorkItemState::WaitingForChildren => write!(f, "WaitingForChildren"),
            WorkItemState::Complete => write!(f, "Complete"),
        }
    }
}

/// Scheduler contract violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("result of '{0}' was read before its work item completed")]
    ResultNotReady(String),

    #[error("result of '{0}' was already set")]
    ResultAlreadySet(String),

    #[error("work item '{test}' cannot move from {from} to {to}")]
    IllegalTransition {
        test: String,
        from: WorkItemState,
        to: WorkItemState,
    },
}

#[derive(Debug)]
pub struct WorkItem {
    test: Arc<TestNode>,
    filter: Arc<TestFilter>,
    state: WorkItemState,
    children: Vec<WorkItem>,
    result: Option<TestResult>,
}

impl WorkItem {
    /// Create the work item tree for `test`. Children are kept only when
    /// they pass the filter; `test` itself is always included.
    pub fn create(test: Arc<TestNode>, filter: Arc<TestFilter>) -> Self {
        let children = test
            .children()
            .iter()
            .filter(|child| filter.pass(child))
            .map(|child| WorkItem::create(child.clone(), filter.clone()))
            .collect();

        Self {
            test,
            filter,
            state: WorkItemState::Ready,
            children,
            result: None,
        }
    }

    pub fn test(&self) -> &Arc<TestNode> {
        &self.test
    }

    pub fn filter(&self) -> &TestFilter {
        &self.filter
    }

    pub fn state(&self) -> WorkItemState {
        self.state
    }

    pub fn children(&self) -> &[WorkItem] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [WorkItem] {
        &mut self.children
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Number of work items in this tree, including this one
    pub fn work_item_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(WorkItem::work_item_count)
            .sum::<usize>()
    }

    pub fn result(&self) -> Result<&TestResult, ExecutionError> {
        match (&self.result, self.state) {
            (Some(result), WorkItemState::Complete) => Ok(result),
            _ => Err(ExecutionError::ResultNotReady(self.test.full_name().to_string())),
        }
    }

    pub fn into_result(self) -> Result<TestResult, ExecutionError> {
        match (self.result, self.state) {
            (Some(result), WorkItemState::Complete) => Ok(result),
            _ => Err(ExecutionError::ResultNotReady(self.test.full_name().to_string())),
        }
    }

    /// Skipped state and reason when the node's run state forbids running it
    pub fn skip_state(&self) -> Option<(ResultState, Option<String>)> {
        let reason = self.test.skip_reason().map(str::to_string);
        match self.test.run_state() {
            RunState::Runnable => None,
            RunState::Explicit if self.filter.is_explicit_match(&self.test) => None,
            RunState::Explicit => Some((ResultState::EXPLICIT, reason)),
            RunState::Skipped => Some((ResultState::SKIPPED, reason)),
            RunState::Ignored => Some((ResultState::IGNORED, reason)),
            RunState::NotRunnable => Some((ResultState::NOT_RUNNABLE, reason)),
        }
    }

    pub(crate) fn advance(&mut self, next: WorkItemState) -> Result<(), ExecutionError> {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal work item transition {} -> {}",
            self.state,
            next
        );
        if !self.state.can_transition_to(next) {
            return Err(ExecutionError::IllegalTransition {
                test: self.test.full_name().to_string(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Move every child's result out of its work item, releasing the children
    pub(crate) fn take_child_results(&mut self) -> Result<Vec<TestResult>, ExecutionError> {
        self.children.drain(..).map(WorkItem::into_result).collect()
    }

    /// Store the final result and move to `Complete`
    pub(crate) fn complete(&mut self, result: TestResult) -> Result<(), ExecutionError> {
        if self.result.is_some() {
            return Err(ExecutionError::ResultAlreadySet(
                self.test.full_name().to_string(),
            ));
        }
        self.advance(WorkItemState::Complete)?;
        self.result = Some(result);
        Ok(())
    }

    /// Complete this item and its whole subtree without running anything
    pub(crate) fn finish_unstarted(
        &mut self,
        state: ResultState,
        message: Option<String>,
        listener: &dyn ExecutionListener,
    ) -> Result<(), ExecutionError> {
        self.finish_children_unstarted(state, message.clone(), listener)?;
        let children = self.take_child_results()?;

        let mut result = TestResult::new(&self.test).with_state(state, message);
        result.children = children;
        listener.test_finished(&result);
        self.complete(result)
    }

    pub(crate) fn finish_children_unstarted(
        &mut self,
        state: ResultState,
        message: Option<String>,
        listener: &dyn ExecutionListener,
    ) -> Result<(), ExecutionError> {
        for child in &mut self.children {
            child.finish_unstarted(state, message.clone(), listener)?;
        }
        Ok(())
    }
}
