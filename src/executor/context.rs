//! Execution context
//!
//! Ambient state threaded through a work item subtree. Every child gets its
//! own scoped copy; only the stop token is shared across the run.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::models::{ContextSetting, TestId, TestNode};

/// Culture used when nothing else is configured
pub const INVARIANT_CULTURE: &str = "invariant";

/// Shared cancellation flag for a run
#[derive(Clone, Debug, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that no further work items start.
    /// Returns true only for the call that actually tripped the flag.
    pub fn stop(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State visible to setup, teardown and test bodies
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    current_test: Option<Arc<TestNode>>,
    fixture: Option<Arc<dyn Any + Send + Sync>>,
    culture: String,
    ui_culture: String,
    random_seed: u64,
    randomizer: StdRng,
    stop_token: StopToken,
    stop_on_error: bool,
    active_setups: Vec<TestId>,
    properties: BTreeMap<String, String>,
    workers: usize,
}

impl ExecutionContext {
    pub fn new(random_seed: u64) -> Self {
        Self {
            current_test: None,
            fixture: None,
            culture: INVARIANT_CULTURE.to_string(),
            ui_culture: INVARIANT_CULTURE.to_string(),
            random_seed,
            randomizer: StdRng::seed_from_u64(random_seed),
            stop_token: StopToken::new(),
            stop_on_error: false,
            active_setups: Vec::new(),
            properties: BTreeMap::new(),
            workers: 0,
        }
    }

    pub fn with_stop_token(mut self, token: StopToken) -> Self {
        self.stop_token = token;
        self
    }

    pub fn with_stop_on_error(mut self, enabled: bool) -> Self {
        self.stop_on_error = enabled;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_culture(mut self, culture: impl Into<String>) -> Self {
        let culture = culture.into();
        self.ui_culture = culture.clone();
        self.culture = culture;
        self
    }

    /// Scoped copy for running `test`. The randomizer is reseeded from the
    /// node so a test sees the same random sequence regardless of sibling order.
    pub fn for_child(&self, test: &Arc<TestNode>) -> Self {
        let mut child = self.clone();
        child.current_test = Some(test.clone());
        child.reseed(test.seed());
        child
    }

    pub fn apply_setting(&mut self, setting: &ContextSetting) {
        match setting {
            ContextSetting::Culture(culture) => self.culture = culture.clone(),
            ContextSetting::UiCulture(culture) => self.ui_culture = culture.clone(),
            ContextSetting::RandomSeed(seed) => self.reseed(*seed),
            ContextSetting::Property(key, value) => {
                self.properties.insert(key.clone(), value.clone());
            }
        }
    }

    fn reseed(&mut self, seed: u64) {
        self.random_seed = seed;
        self.randomizer = StdRng::seed_from_u64(seed);
    }

    pub fn current_test(&self) -> Option<&Arc<TestNode>> {
        self.current_test.as_ref()
    }

    pub fn fixture(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.fixture.as_ref()
    }

    /// Fixture instance downcast to its concrete type
    pub fn fixture_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.fixture.as_deref().and_then(|f| f.downcast_ref::<T>())
    }

    pub fn set_fixture(&mut self, fixture: Arc<dyn Any + Send + Sync>) {
        self.fixture = Some(fixture);
    }

    pub fn culture(&self) -> &str {
        &self.culture
    }

    pub fn ui_culture(&self) -> &str {
        &self.ui_culture
    }

    pub fn random_seed(&self) -> u64 {
        self.random_seed
    }

    pub fn randomizer(&mut self) -> &mut StdRng {
        &mut self.randomizer
    }

    pub fn stop_token(&self) -> &StopToken {
        &self.stop_token
    }

    pub fn stop_on_error(&self) -> bool {
        self.stop_on_error
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn is_parallel(&self) -> bool {
        self.workers > 1
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Record a suite whose one-time setup succeeded and still owes a teardown
    pub fn push_setup(&mut self, suite: TestId) {
        self.active_setups.push(suite);
    }

    pub fn pop_setup(&mut self) -> Option<TestId> {
        self.active_setups.pop()
    }

    pub fn active_setups(&self) -> &[TestId] {
        &self.active_setups
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(rand::random())
    }
}
