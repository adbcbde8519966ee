//! Test execution runner
//!
//! Builds the work item tree for a filtered test tree and drives it to a
//! complete result tree.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use super::context::{ExecutionContext, StopToken};
use super::dispatcher::Dispatcher;
use super::invoker::{ExecutionListener, LoggingListener, TestInvoker};
use super::work_item::{ExecutionError, WorkItem};
use crate::filter::TestFilter;
use crate::models::{RunSummary, TestNode, TestResult};

/// Everything a finished run produced
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub result: TestResult,
    pub summary: RunSummary,
    pub work_items: usize,
    pub cancelled: bool,
}

/// Test runner for a discovered test tree
pub struct TestRunner {
    invoker: Arc<dyn TestInvoker>,
    listener: Arc<dyn ExecutionListener>,
    workers: usize,
    stop_on_error: bool,
    timeout: Option<Duration>,
    culture: Option<String>,
    stop_token: Option<StopToken>,
}

impl TestRunner {
    pub fn new(invoker: Arc<dyn TestInvoker>) -> Self {
        Self {
            invoker,
            listener: Arc::new(LoggingListener),
            workers: 0,
            stop_on_error: false,
            timeout: None,
            culture: None,
            stop_token: None,
        }
    }

    /// Size of the worker pool. 0 or 1 runs sequentially.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_stop_on_error(mut self, enabled: bool) -> Self {
        self.stop_on_error = enabled;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Stop starting new work items once `timeout` has elapsed
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_culture(mut self, culture: impl Into<String>) -> Self {
        self.culture = Some(culture.into());
        self
    }

    /// Share a stop token so the run can be cancelled from outside
    pub fn with_stop_token(mut self, token: StopToken) -> Self {
        self.stop_token = Some(token);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run every test under `root` that passes `filter`
    pub async fn run(
        &self,
        root: &Arc<TestNode>,
        filter: TestFilter,
    ) -> Result<RunReport, ExecutionError> {
        let mut item = WorkItem::create(root.clone(), Arc::new(filter));
        let work_items = item.work_item_count();

        info!(
            "Starting run of {} ({} work items, {} workers)",
            root.full_name(),
            work_items,
            self.workers.max(1)
        );

        let stop_token = self.stop_token.clone().unwrap_or_default();
        let mut context = ExecutionContext::new(root.seed())
            .with_stop_token(stop_token.clone())
            .with_stop_on_error(self.stop_on_error)
            .with_workers(self.workers);
        if let Some(culture) = &self.culture {
            context = context.with_culture(culture.clone());
        }

        let mut dispatcher =
            Dispatcher::new(self.invoker.clone(), self.listener.clone(), self.workers);
        if let Some(limit) = self.timeout {
            dispatcher = dispatcher.with_deadline(Instant::now() + limit);
        }
        dispatcher
            .execute(&mut item, context.for_child(root))
            .await?;

        let result = item.into_result()?;
        let summary = RunSummary::from_result(&result);

        info!(
            "Run completed in {}ms - {} - Pass: {}/{} ({:.1}%)",
            result.duration_ms,
            result.state,
            summary.passed,
            summary.total,
            summary.pass_rate()
        );

        Ok(RunReport {
            result,
            summary,
            work_items,
            cancelled: stop_token.is_stopped(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{TestFailure, TestOutcome};
    use crate::filter::compile;
    use crate::models::{
        ContextSetting, FailureSite, IdGenerator, NodeBuilder, ResultLabel, ResultState,
        TestStatus,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Invoker that records what it was asked to do
    #[derive(Default)]
    struct TrackingInvoker {
        failing_setups: Vec<&'static str>,
        asserting_setups: Vec<&'static str>,
        failing_teardowns: Vec<&'static str>,
        failing_tests: Vec<&'static str>,
        panicking_tests: Vec<&'static str>,
        inconclusive: bool,
        delay_ms: u64,
        calls: Mutex<Vec<String>>,
        cultures: Mutex<Vec<(String, String)>>,
        teardowns: Mutex<Vec<String>>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl TrackingInvoker {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TestInvoker for TrackingInvoker {
        fn run_test(
            &self,
            test: &TestNode,
            context: &mut ExecutionContext,
        ) -> Result<TestOutcome, TestFailure> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(test.name().to_string());
            self.cultures
                .lock()
                .unwrap()
                .push((test.name().to_string(), context.culture().to_string()));
            if self.delay_ms > 0 {
                std::thread::sleep(Duration::from_millis(self.delay_ms));
            }
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.panicking_tests.contains(&test.name()) {
                panic!("exploded in {}", test.name());
            }
            if self.failing_tests.contains(&test.name()) {
                return Err(TestFailure::assertion("expected true"));
            }
            if self.inconclusive {
                return Ok(TestOutcome::inconclusive());
            }
            Ok(TestOutcome::passed().with_asserts(1))
        }

        fn one_time_setup(
            &self,
            suite: &TestNode,
            _context: &mut ExecutionContext,
        ) -> Result<(), TestFailure> {
            if self.failing_setups.contains(&suite.name()) {
                panic!("setup exploded");
            }
            if self.asserting_setups.contains(&suite.name()) {
                return Err(TestFailure::assertion("fixture data missing"));
            }
            Ok(())
        }

        fn one_time_teardown(
            &self,
            suite: &TestNode,
            _context: &mut ExecutionContext,
        ) -> Result<(), TestFailure> {
            self.teardowns
                .lock()
                .unwrap()
                .push(suite.full_name().to_string());
            if self.failing_teardowns.contains(&suite.name()) {
                return Err(TestFailure::error("connection already closed"));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        started: Mutex<Vec<String>>,
        finished: Mutex<Vec<String>>,
    }

    impl ExecutionListener for Recorder {
        fn test_started(&self, test: &TestNode) {
            self.started.lock().unwrap().push(test.name().to_string());
        }

        fn test_finished(&self, result: &TestResult) {
            self.finished.lock().unwrap().push(result.name.clone());
        }
    }

    fn flat_suite(names: &[&str]) -> Arc<TestNode> {
        NodeBuilder::suite("Root")
            .children(names.iter().map(|n| NodeBuilder::test(*n)))
            .build(&mut IdGenerator::new(11))
    }

    #[tokio::test]
    async fn test_sequential_run_in_declaration_order() {
        let tree = flat_suite(&["A", "B", "C"]);
        let invoker = Arc::new(TrackingInvoker::default());
        let runner = TestRunner::new(invoker.clone());

        let report = runner.run(&tree, TestFilter::Empty).await.unwrap();
        assert_eq!(invoker.calls(), vec!["A", "B", "C"]);
        assert_eq!(report.result.state, ResultState::SUCCESS);
        assert_eq!(report.result.result_count(), report.work_items);
        assert_eq!(report.result.assert_count, 3);
        assert!(report.summary.is_all_passed());
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_setup_failure_never_starts_children() {
        let tree = NodeBuilder::suite("Root")
            .child(
                NodeBuilder::suite("Fixture")
                    .child(NodeBuilder::test("A"))
                    .child(NodeBuilder::test("B")),
            )
            .build(&mut IdGenerator::new(1));
        let invoker = Arc::new(TrackingInvoker {
            failing_setups: vec!["Fixture"],
            ..TrackingInvoker::default()
        });
        let recorder = Arc::new(Recorder::default());
        let runner = TestRunner::new(invoker.clone()).with_listener(recorder.clone());

        let report = runner.run(&tree, TestFilter::Empty).await.unwrap();

        let fixture = report.result.find("Root.Fixture").unwrap();
        assert_eq!(fixture.status(), TestStatus::Failed);
        assert_eq!(fixture.state.site, FailureSite::SetUp);
        assert_eq!(fixture.state.label, Some(ResultLabel::Error));
        for child in &fixture.children {
            assert_eq!(child.status(), TestStatus::Failed);
            assert_eq!(child.state.site, FailureSite::Parent);
            assert!(child.message.as_deref().unwrap().starts_with("OneTimeSetUp:"));
        }

        let started = recorder.started.lock().unwrap().clone();
        assert!(!started.contains(&"A".to_string()));
        assert!(!started.contains(&"B".to_string()));
        assert!(invoker.calls().is_empty());
        assert_eq!(
            invoker.teardowns.lock().unwrap().as_slice(),
            ["Root.Fixture".to_string(), "Root".to_string()]
        );
        assert_eq!(report.result.status(), TestStatus::Failed);
        assert_eq!(report.result.result_count(), report.work_items);
        assert_eq!(recorder.finished.lock().unwrap().len(), report.work_items);
    }

    #[tokio::test]
    async fn test_all_inconclusive_parameterized_suite_fails() {
        let tree = NodeBuilder::suite("Root")
            .child(
                NodeBuilder::parameterized("Adds")
                    .child(NodeBuilder::test("Adds(1,2)"))
                    .child(NodeBuilder::test("Adds(3,4)")),
            )
            .build(&mut IdGenerator::new(1));
        let invoker = Arc::new(TrackingInvoker {
            inconclusive: true,
            ..TrackingInvoker::default()
        });

        let report = TestRunner::new(invoker)
            .run(&tree, TestFilter::Empty)
            .await
            .unwrap();

        let group = report.result.find("Root.Adds").unwrap();
        assert_eq!(group.status(), TestStatus::Failed);
        assert_eq!(report.result.status(), TestStatus::Failed);
        assert_eq!(report.summary.inconclusive, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_parallel_run_keeps_result_order() {
        let names = ["A", "B", "C", "D", "E", "F", "G", "H"];
        let tree = flat_suite(&names);
        let invoker = Arc::new(TrackingInvoker {
            delay_ms: 30,
            ..TrackingInvoker::default()
        });

        let report = TestRunner::new(invoker.clone())
            .with_workers(3)
            .run(&tree, TestFilter::Empty)
            .await
            .unwrap();

        let order: Vec<&str> = report
            .result
            .children
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(order, names);
        assert_eq!(invoker.calls().len(), names.len());
        let peak = invoker.peak.load(Ordering::SeqCst);
        assert!(peak > 1 && peak <= 3, "peak concurrency was {peak}");
        assert_eq!(report.summary.passed, names.len());
    }

    #[tokio::test]
    async fn test_stop_on_error_cancels_remaining_items() {
        let tree = flat_suite(&["A", "B", "C"]);
        let invoker = Arc::new(TrackingInvoker {
            failing_tests: vec!["A"],
            ..TrackingInvoker::default()
        });

        let report = TestRunner::new(invoker.clone())
            .with_stop_on_error(true)
            .run(&tree, TestFilter::Empty)
            .await
            .unwrap();

        assert_eq!(invoker.calls(), vec!["A"]);
        assert!(report.cancelled);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.cancelled, 2);
        assert!(report.result.find("Root.B").unwrap().state.is_cancelled());
        assert_eq!(report.result.state, ResultState::CHILD_FAILURE);
    }

    #[tokio::test]
    async fn test_failures_do_not_cancel_siblings_by_default() {
        let tree = flat_suite(&["A", "B", "C"]);
        let invoker = Arc::new(TrackingInvoker {
            failing_tests: vec!["A"],
            panicking_tests: vec!["B"],
            ..TrackingInvoker::default()
        });

        let report = TestRunner::new(invoker.clone())
            .run(&tree, TestFilter::Empty)
            .await
            .unwrap();

        assert_eq!(invoker.calls(), vec!["A", "B", "C"]);
        let b = report.result.find("Root.B").unwrap();
        assert_eq!(b.state, ResultState::ERROR);
        assert_eq!(b.message.as_deref(), Some("panicked: exploded in B"));
        assert_eq!(report.summary.passed, 1);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_explicit_tests_run_only_when_named() {
        let tree = NodeBuilder::suite("Root")
            .child(NodeBuilder::test("Normal"))
            .child(NodeBuilder::test("Manual").explicit())
            .build(&mut IdGenerator::new(1));

        let invoker = Arc::new(TrackingInvoker::default());
        let report = TestRunner::new(invoker.clone())
            .run(&tree, TestFilter::Empty)
            .await
            .unwrap();
        assert_eq!(invoker.calls(), vec!["Normal"]);
        assert_eq!(
            report.result.find("Root.Manual").unwrap().state,
            ResultState::EXPLICIT
        );

        let invoker = Arc::new(TrackingInvoker::default());
        let report = TestRunner::new(invoker.clone())
            .run(&tree, compile("name == Manual").unwrap())
            .await
            .unwrap();
        assert_eq!(invoker.calls(), vec!["Manual"]);
        assert_eq!(report.work_items, 2);
    }

    #[tokio::test]
    async fn test_filter_limits_work_items() {
        let tree = NodeBuilder::suite("Root")
            .child(NodeBuilder::test("Quick").category("Fast"))
            .child(NodeBuilder::test("Heavy").category("Slow"))
            .child(NodeBuilder::test("Other"))
            .build(&mut IdGenerator::new(1));
        let invoker = Arc::new(TrackingInvoker::default());

        let report = TestRunner::new(invoker.clone())
            .run(&tree, compile("cat != Slow").unwrap())
            .await
            .unwrap();

        assert_eq!(invoker.calls(), vec!["Quick", "Other"]);
        assert_eq!(report.work_items, 3);
        assert_eq!(report.result.result_count(), report.work_items);
    }

    #[tokio::test]
    async fn test_context_settings_stay_in_their_subtree() {
        let tree = NodeBuilder::suite("Root")
            .child(
                NodeBuilder::suite("French")
                    .setting(ContextSetting::Culture("fr-FR".into()))
                    .child(NodeBuilder::test("A")),
            )
            .child(NodeBuilder::suite("Plain").child(NodeBuilder::test("B")))
            .build(&mut IdGenerator::new(1));
        let invoker = Arc::new(TrackingInvoker::default());

        TestRunner::new(invoker.clone())
            .with_culture("en-US")
            .run(&tree, TestFilter::Empty)
            .await
            .unwrap();

        let cultures = invoker.cultures.lock().unwrap().clone();
        assert_eq!(
            cultures,
            vec![
                ("A".to_string(), "fr-FR".to_string()),
                ("B".to_string(), "en-US".to_string()),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_stops_new_items() {
        let tree = flat_suite(&["A", "B", "C", "D", "E", "F"]);
        let invoker = Arc::new(TrackingInvoker {
            delay_ms: 50,
            ..TrackingInvoker::default()
        });

        let report = TestRunner::new(invoker.clone())
            .with_workers(2)
            .with_timeout(Duration::from_millis(70))
            .run(&tree, TestFilter::Empty)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert!(report.summary.cancelled >= 1);
        assert_eq!(
            report.summary.passed + report.summary.cancelled,
            report.summary.total
        );
        assert_eq!(report.result.result_count(), report.work_items);
    }

    #[tokio::test]
    async fn test_external_stop_token() {
        let tree = flat_suite(&["A"]);
        let token = StopToken::new();
        token.stop();
        let invoker = Arc::new(TrackingInvoker::default());

        let report = TestRunner::new(invoker.clone())
            .with_stop_token(token)
            .run(&tree, TestFilter::Empty)
            .await
            .unwrap();

        assert!(invoker.calls().is_empty());
        assert!(report.result.state.is_cancelled());
        assert_eq!(report.result.result_count(), 2);
    }

    fn fixture_tree() -> Arc<TestNode> {
        NodeBuilder::suite("Root")
            .child(
                NodeBuilder::suite("Fixture")
                    .child(NodeBuilder::test("A"))
                    .child(NodeBuilder::test("B")),
            )
            .child(NodeBuilder::test("Later"))
            .build(&mut IdGenerator::new(3))
    }

    #[tokio::test]
    async fn test_assertion_in_setup_fails_children_without_error_label() {
        let invoker = Arc::new(TrackingInvoker {
            asserting_setups: vec!["Fixture"],
            ..TrackingInvoker::default()
        });

        let report = TestRunner::new(invoker.clone())
            .run(&fixture_tree(), TestFilter::Empty)
            .await
            .unwrap();

        let fixture = report.result.find("Root.Fixture").unwrap();
        assert_eq!(fixture.state, ResultState::FAILURE.with_site(FailureSite::SetUp));
        assert_eq!(fixture.message.as_deref(), Some("fixture data missing"));
        for child in &fixture.children {
            assert_eq!(child.state, ResultState::FAILURE.with_site(FailureSite::Parent));
            assert_eq!(
                child.message.as_deref(),
                Some("OneTimeSetUp: fixture data missing")
            );
        }
        assert_eq!(report.summary.failed, 2);
        assert_eq!(report.summary.errors, 0);
        assert_eq!(invoker.calls(), vec!["Later"]);
        assert!(invoker
            .teardowns
            .lock()
            .unwrap()
            .contains(&"Root.Fixture".to_string()));
    }

    #[tokio::test]
    async fn test_failed_setup_stops_run_under_stop_on_error() {
        let invoker = Arc::new(TrackingInvoker {
            failing_setups: vec!["Fixture"],
            ..TrackingInvoker::default()
        });

        let report = TestRunner::new(invoker.clone())
            .with_stop_on_error(true)
            .run(&fixture_tree(), TestFilter::Empty)
            .await
            .unwrap();

        assert!(invoker.calls().is_empty());
        assert!(report.cancelled);
        assert!(report.result.find("Root.Later").unwrap().state.is_cancelled());
        assert_eq!(
            report.result.find("Root.Fixture").unwrap().state.site,
            FailureSite::SetUp
        );
        assert_eq!(report.result.result_count(), report.work_items);
    }

    #[tokio::test]
    async fn test_teardown_failure_overrides_passing_suite() {
        let invoker = Arc::new(TrackingInvoker {
            failing_teardowns: vec!["Fixture"],
            ..TrackingInvoker::default()
        });

        let report = TestRunner::new(invoker.clone())
            .run(&fixture_tree(), TestFilter::Empty)
            .await
            .unwrap();

        let fixture = report.result.find("Root.Fixture").unwrap();
        assert_eq!(fixture.state, ResultState::ERROR.with_site(FailureSite::TearDown));
        assert_eq!(
            fixture.message.as_deref(),
            Some("OneTimeTearDown: connection already closed")
        );
        assert!(fixture.children.iter().all(|c| c.status() == TestStatus::Passed));
        assert_eq!(report.result.state, ResultState::CHILD_FAILURE);
        assert_eq!(invoker.calls(), vec!["A", "B", "Later"]);
    }

    #[tokio::test]
    async fn test_teardown_failure_appends_to_failed_suite() {
        let invoker = Arc::new(TrackingInvoker {
            failing_tests: vec!["A"],
            failing_teardowns: vec!["Fixture"],
            ..TrackingInvoker::default()
        });

        let report = TestRunner::new(invoker.clone())
            .run(&fixture_tree(), TestFilter::Empty)
            .await
            .unwrap();

        let fixture = report.result.find("Root.Fixture").unwrap();
        assert_eq!(fixture.state, ResultState::CHILD_FAILURE);
        assert_eq!(
            fixture.message.as_deref(),
            Some("One or more child tests had errors\nOneTimeTearDown: connection already closed")
        );
    }

    #[tokio::test]
    async fn test_timeout_on_current_thread_runtime() {
        let tree = flat_suite(&["A", "B", "C", "D"]);
        let invoker = Arc::new(TrackingInvoker {
            delay_ms: 100,
            ..TrackingInvoker::default()
        });

        let report = TestRunner::new(invoker.clone())
            .with_timeout(Duration::from_millis(50))
            .run(&tree, TestFilter::Empty)
            .await
            .unwrap();

        assert_eq!(invoker.calls(), vec!["A"]);
        assert!(report.cancelled);
        assert_eq!(report.summary.passed, 1);
        assert_eq!(report.summary.cancelled, 3);
    }
}
