//! Work item dispatch
//!
//! Walks a work item tree, running composites on their own future and leaf
//! bodies either inline or on the blocking pool under a bounded semaphore.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::context::{ExecutionContext, StopToken};
use super::invoker::{guarded, leaf_result, ExecutionListener, TestFailure, TestInvoker};
use super::rollup::Rollup;
use super::work_item::{ExecutionError, WorkItem, WorkItemState};
use crate::models::{FailureSite, ResultState, TestNode, TestResult, TestStatus};
use crate::utils::timer::Timer;

const CANCELLED_MESSAGE: &str = "Test run was cancelled";

pub struct Dispatcher {
    invoker: Arc<dyn TestInvoker>,
    listener: Arc<dyn ExecutionListener>,
    permits: Option<Arc<Semaphore>>,
    deadline: Option<Instant>,
}

impl Dispatcher {
    /// `workers <= 1` runs every item inline, in declaration order
    pub fn new(
        invoker: Arc<dyn TestInvoker>,
        listener: Arc<dyn ExecutionListener>,
        workers: usize,
    ) -> Self {
        let permits = (workers > 1).then(|| Arc::new(Semaphore::new(workers)));
        Self {
            invoker,
            listener,
            permits,
            deadline: None,
        }
    }

    /// Items that would start after `deadline` are cancelled instead
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn is_parallel(&self) -> bool {
        self.permits.is_some()
    }

    /// Run `item` and its subtree to completion
    pub fn execute<'a>(
        &'a self,
        item: &'a mut WorkItem,
        context: ExecutionContext,
    ) -> BoxFuture<'a, Result<(), ExecutionError>> {
        async move {
            if self.should_stop(&context) {
                return self.cancel(item);
            }
            if let Some((state, message)) = item.skip_state() {
                debug!("Skipping {} ({})", item.test().full_name(), state);
                return item.finish_unstarted(state, message, self.listener.as_ref());
            }
            if item.test().is_suite() {
                self.run_composite(item, context).await
            } else {
                self.run_leaf(item, context).await
            }
        }
        .boxed()
    }

    /// Trips the stop token once the deadline has passed
    fn should_stop(&self, context: &ExecutionContext) -> bool {
        let token = context.stop_token();
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline && token.stop() {
                warn!("Run timed out; remaining tests are cancelled");
            }
        }
        token.is_stopped()
    }

    fn cancel(&self, item: &mut WorkItem) -> Result<(), ExecutionError> {
        item.finish_unstarted(
            ResultState::CANCELLED,
            Some(CANCELLED_MESSAGE.to_string()),
            self.listener.as_ref(),
        )
    }

    async fn run_leaf(
        &self,
        item: &mut WorkItem,
        context: ExecutionContext,
    ) -> Result<(), ExecutionError> {
        let test = item.test().clone();

        let permit = match &self.permits {
            Some(permits) => match permits.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => return self.cancel(item),
            },
            None => None,
        };
        // The run may have been stopped while this item waited for a worker
        if self.should_stop(&context) {
            return self.cancel(item);
        }

        item.advance(WorkItemState::Running)?;
        self.listener.test_started(&test);

        let stop_token = context.stop_token().clone();
        let stop_on_error = context.stop_on_error();
        let timer = Timer::start(test.full_name());

        let outcome = if permit.is_some() {
            let invoker = self.invoker.clone();
            let node = test.clone();
            let mut context = context;
            tokio::task::spawn_blocking(move || guarded(|| invoker.run_test(&node, &mut context)))
                .await
                .unwrap_or_else(|e| Err(TestFailure::error(format!("test task failed: {e}"))))
        } else {
            let mut context = context;
            guarded(|| self.invoker.run_test(&test, &mut context))
        };
        drop(permit);

        let mut result = leaf_result(&test, outcome);
        timer.finish(&mut result);

        stop_after_failure(stop_on_error, &stop_token, &result);

        self.listener.test_finished(&result);
        item.complete(result)
    }

    async fn run_composite(
        &self,
        item: &mut WorkItem,
        mut context: ExecutionContext,
    ) -> Result<(), ExecutionError> {
        let test = item.test().clone();
        item.advance(WorkItemState::Running)?;
        self.listener.test_started(&test);

        let timer = Timer::start(test.full_name());

        let setup = self.one_time_setup(&test, &mut context);
        match &setup {
            Ok(()) => {
                context.push_setup(test.id());
                if item.has_children() {
                    item.advance(WorkItemState::WaitingForChildren)?;
                    self.run_children(item, &context).await?;
                }
            }
            Err(failure) => {
                warn!("OneTimeSetUp of {} failed: {}", test.full_name(), failure);
                let state = failure.result_state();
                item.finish_children_unstarted(
                    ResultState::new(state.status, state.label).with_site(FailureSite::Parent),
                    Some(format!("OneTimeSetUp: {failure}")),
                    self.listener.as_ref(),
                )?;
            }
        }

        let teardown = guarded(|| self.invoker.one_time_teardown(&test, &mut context));
        if setup.is_ok() {
            context.pop_setup();
        }

        let children = item.take_child_results()?;
        let mut result = TestResult::new(&test);
        match setup {
            Ok(()) => {
                let (state, message) = Rollup::for_kind(test.kind()).aggregate(&children);
                result.state = state;
                result.message = message;
            }
            Err(failure) => {
                result.state = failure.result_state().with_site(FailureSite::SetUp);
                result.stack_trace = failure.stack_trace().map(str::to_string);
                result.message = Some(failure.to_string());
            }
        }
        if let Err(failure) = teardown {
            warn!("OneTimeTearDown of {} failed: {}", test.full_name(), failure);
            apply_teardown_failure(&mut result, &failure);
        }

        result.children = children;
        result.assert_count = result.children.iter().map(|c| c.assert_count).sum();
        timer.finish(&mut result);
        stop_after_failure(context.stop_on_error(), context.stop_token(), &result);

        self.listener.test_finished(&result);
        item.complete(result)
    }

    /// Apply context settings, then run the invoker's own setup
    fn one_time_setup(
        &self,
        test: &TestNode,
        context: &mut ExecutionContext,
    ) -> Result<(), TestFailure> {
        for setting in test.settings() {
            context.apply_setting(setting);
        }
        guarded(|| self.invoker.one_time_setup(test, context))
    }

    async fn run_children(
        &self,
        item: &mut WorkItem,
        context: &ExecutionContext,
    ) -> Result<(), ExecutionError> {
        if self.is_parallel() {
            let runs = item.children_mut().iter_mut().map(|child| {
                let child_context = context.for_child(child.test());
                self.execute(child, child_context)
            });
            join_all(runs)
                .await
                .into_iter()
                .collect::<Result<Vec<()>, _>>()?;
        } else {
            for child in item.children_mut() {
                let child_context = context.for_child(child.test());
                self.execute(child, child_context).await?;
            }
        }
        Ok(())
    }
}

/// Under stop-on-error, the first failed test or suite stops the run
fn stop_after_failure(stop_on_error: bool, token: &StopToken, result: &TestResult) {
    if stop_on_error
        && result.status() == TestStatus::Failed
        && !result.state.is_cancelled()
        && token.stop()
    {
        warn!("Stopping run after failure of {}", result.full_name);
    }
}

fn apply_teardown_failure(result: &mut TestResult, failure: &TestFailure) {
    let note = format!("OneTimeTearDown: {failure}");
    if result.status() == TestStatus::Failed {
        result.message = Some(match result.message.take() {
            Some(message) => format!("{message}\n{note}"),
            None => note,
        });
    } else {
        let state = match failure.result_state() {
            state if state.status == TestStatus::Failed => state,
            _ => ResultState::ERROR,
        };
        result.state = state.with_site(FailureSite::TearDown);
        result.message = Some(note);
    }
    if result.stack_trace.is_none() {
        result.stack_trace = failure.stack_trace().map(str::to_string);
    }
}
