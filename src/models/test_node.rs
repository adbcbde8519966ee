//! Test tree models
//!
//! Defines test nodes, run states, property bags and the builder that
//! discovery uses to assemble an immutable test tree.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};

/// Property key holding category names
pub const CATEGORY_KEY: &str = "Category";

/// Property key holding the reason a test is not runnable, ignored or explicit
pub const SKIP_REASON_KEY: &str = "_SKIPREASON";

/// Property key holding a free-form description
pub const DESCRIPTION_KEY: &str = "Description";

/// Identifier of a test node, unique within one run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TestId(u64);

impl TestId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Run-scoped sequence generator for node ids and node seeds.
///
/// Passed explicitly into tree construction so two runs never share a
/// counter and id assignment is reproducible for a given seed.
#[derive(Debug)]
pub struct IdGenerator {
    next: u64,
    rng: StdRng,
}

impl IdGenerator {
    /// First id handed out by a fresh generator
    pub const FIRST_ID: u64 = 1000;

    pub fn new(seed: u64) -> Self {
        Self {
            next: Self::FIRST_ID,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn next_id(&mut self) -> TestId {
        let id = TestId(self.next);
        self.next += 1;
        id
    }

    pub fn next_seed(&mut self) -> u64 {
        self.rng.random()
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(rand::random())
    }
}

/// Whether and how a test may be run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Runnable,
    Explicit,
    Skipped,
    Ignored,
    NotRunnable,
}

impl RunState {
    fn rank(self) -> u8 {
        match self {
            RunState::Runnable => 0,
            RunState::Explicit => 1,
            RunState::Skipped => 2,
            RunState::Ignored => 3,
            RunState::NotRunnable => 4,
        }
    }

    pub fn is_runnable(self) -> bool {
        matches!(self, RunState::Runnable | RunState::Explicit)
    }

    /// Returns the more restrictive of the two states
    pub fn tighten(self, requested: RunState) -> RunState {
        if requested.rank() >= self.rank() {
            requested
        } else {
            self
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Runnable => write!(f, "Runnable"),
            RunState::Explicit => write!(f, "Explicit"),
            RunState::Skipped => write!(f, "Skipped"),
            RunState::Ignored => write!(f, "Ignored"),
            RunState::NotRunnable => write!(f, "NotRunnable"),
        }
    }
}

/// Ordered multi-map of string keys to lists of values
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyBag {
    entries: Vec<(String, Vec<String>)>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `key`, keeping earlier values
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key, vec![value])),
        }
    }

    /// Replace every value under `key` with a single value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => *values = vec![value],
            None => self.entries.push((key, vec![value])),
        }
    }

    /// First value stored under `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().map(String::as_str)
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(k, values)| (k.as_str(), values.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Kind of node in the test tree
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    Leaf,
    Suite,
    ParameterizedSuite,
    TheorySuite,
}

impl TestKind {
    pub fn is_suite(self) -> bool {
        !matches!(self, TestKind::Leaf)
    }

    /// Suites whose children are generated cases of a single method
    pub fn is_grouped(self) -> bool {
        matches!(self, TestKind::ParameterizedSuite | TestKind::TheorySuite)
    }

    pub fn type_name(self) -> &'static str {
        match self {
            TestKind::Leaf => "TestCase",
            TestKind::Suite => "TestSuite",
            TestKind::ParameterizedSuite => "ParameterizedMethod",
            TestKind::TheorySuite => "Theory",
        }
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Ambient setting a suite applies to the execution context during its
/// one-time setup
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSetting {
    Culture(String),
    UiCulture(String),
    RandomSeed(u64),
    Property(String, String),
}

impl ContextSetting {
    /// Lower values are applied first
    pub fn priority(&self) -> u8 {
        match self {
            ContextSetting::Culture(_) => 0,
            ContextSetting::UiCulture(_) => 1,
            ContextSetting::RandomSeed(_) => 2,
            ContextSetting::Property(_, _) => 3,
        }
    }
}

/// One test case or suite in the discovered hierarchy
#[derive(Debug)]
pub struct TestNode {
    id: TestId,
    name: String,
    full_name: String,
    kind: TestKind,
    run_state: RunState,
    properties: PropertyBag,
    class_name: Option<String>,
    method_name: Option<String>,
    seed: u64,
    settings: Vec<ContextSetting>,
    parent: Weak<TestNode>,
    children: Vec<Arc<TestNode>>,
}

impl TestNode {
    pub fn id(&self) -> TestId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn kind(&self) -> TestKind {
        self.kind
    }

    pub fn is_suite(&self) -> bool {
        self.kind.is_suite()
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    pub fn categories(&self) -> &[String] {
        self.properties.get_all(CATEGORY_KEY)
    }

    pub fn skip_reason(&self) -> Option<&str> {
        self.properties.get(SKIP_REASON_KEY)
    }

    pub fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    pub fn method_name(&self) -> Option<&str> {
        self.method_name.as_deref()
    }

    /// Namespace of the declaring class, if it has one
    pub fn namespace(&self) -> Option<&str> {
        self.class_name
            .as_deref()
            .and_then(|class| class.rsplit_once('.').map(|(ns, _)| ns))
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn settings(&self) -> &[ContextSetting] {
        &self.settings
    }

    pub fn parent(&self) -> Option<Arc<TestNode>> {
        self.parent.upgrade()
    }

    /// Parent, grandparent and so on up to the root
    pub fn ancestors(&self) -> impl Iterator<Item = Arc<TestNode>> {
        std::iter::successors(self.parent(), |node| node.parent())
    }

    pub fn children(&self) -> &[Arc<TestNode>] {
        &self.children
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Number of leaf test cases in this subtree
    pub fn test_case_count(&self) -> usize {
        if self.is_suite() {
            self.children.iter().map(|c| c.test_case_count()).sum()
        } else {
            1
        }
    }

    /// Depth-first search by full name, including this node
    pub fn find(self: &Arc<Self>, full_name: &str) -> Option<Arc<TestNode>> {
        if self.full_name == full_name {
            return Some(self.clone());
        }
        self.children.iter().find_map(|child| child.find(full_name))
    }

    /// Tighten the run state and record the reason. Never loosens.
    pub fn restrict(&mut self, state: RunState, reason: Option<&str>) {
        let tightened = self.run_state.tighten(state);
        if tightened != self.run_state {
            self.run_state = tightened;
            if let Some(reason) = reason {
                self.properties.set(SKIP_REASON_KEY, reason);
            }
        }
    }

    pub fn properties_mut(&mut self) -> &mut PropertyBag {
        &mut self.properties
    }
}

impl fmt::Display for TestNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.full_name, self.id)
    }
}

/// Strategy applied to a node while it is being constructed
pub trait ApplyToTest: Send + Sync {
    fn apply_to_test(&self, test: &mut TestNode);
}

/// Attributes understood out of the box
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestAttribute {
    Ignore(String),
    Explicit(Option<String>),
    NotRunnable(String),
    Skip(String),
    Category(String),
    Property(String, String),
    Description(String),
}

impl ApplyToTest for TestAttribute {
    fn apply_to_test(&self, test: &mut TestNode) {
        match self {
            TestAttribute::Ignore(reason) => test.restrict(RunState::Ignored, Some(reason)),
            TestAttribute::Explicit(reason) => test.restrict(RunState::Explicit, reason.as_deref()),
            TestAttribute::NotRunnable(reason) => {
                test.restrict(RunState::NotRunnable, Some(reason))
            }
            TestAttribute::Skip(reason) => test.restrict(RunState::Skipped, Some(reason)),
            TestAttribute::Category(name) => test.properties.add(CATEGORY_KEY, name.as_str()),
            TestAttribute::Property(key, value) => {
                test.properties.add(key.as_str(), value.as_str())
            }
            TestAttribute::Description(text) => {
                test.properties.set(DESCRIPTION_KEY, text.as_str())
            }
        }
    }
}

/// Mutable description of a node, turned into a shared tree by `build`
pub struct NodeBuilder {
    name: String,
    kind: TestKind,
    class_name: Option<String>,
    method_name: Option<String>,
    attributes: Vec<Box<dyn ApplyToTest>>,
    settings: Vec<ContextSetting>,
    children: Vec<NodeBuilder>,
}

impl NodeBuilder {
    pub fn new(name: impl Into<String>, kind: TestKind) -> Self {
        Self {
            name: name.into(),
            kind,
            class_name: None,
            method_name: None,
            attributes: Vec::new(),
            settings: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn suite(name: impl Into<String>) -> Self {
        Self::new(name, TestKind::Suite)
    }

    pub fn test(name: impl Into<String>) -> Self {
        Self::new(name, TestKind::Leaf)
    }

    pub fn parameterized(name: impl Into<String>) -> Self {
        Self::new(name, TestKind::ParameterizedSuite)
    }

    pub fn theory(name: impl Into<String>) -> Self {
        Self::new(name, TestKind::TheorySuite)
    }

    pub fn class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    pub fn method(mut self, method_name: impl Into<String>) -> Self {
        self.method_name = Some(method_name.into());
        self
    }

    pub fn attribute(mut self, attribute: impl ApplyToTest + 'static) -> Self {
        self.attributes.push(Box::new(attribute));
        self
    }

    pub fn category(self, name: impl Into<String>) -> Self {
        self.attribute(TestAttribute::Category(name.into()))
    }

    pub fn property(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attribute(TestAttribute::Property(key.into(), value.into()))
    }

    pub fn ignore(self, reason: impl Into<String>) -> Self {
        self.attribute(TestAttribute::Ignore(reason.into()))
    }

    pub fn explicit(self) -> Self {
        self.attribute(TestAttribute::Explicit(None))
    }

    pub fn not_runnable(self, reason: impl Into<String>) -> Self {
        self.attribute(TestAttribute::NotRunnable(reason.into()))
    }

    pub fn setting(mut self, setting: ContextSetting) -> Self {
        self.settings.push(setting);
        self
    }

    pub fn child(mut self, child: NodeBuilder) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = NodeBuilder>) -> Self {
        self.children.extend(children);
        self
    }

    /// Build the tree rooted at this node. Ids are assigned in pre-order.
    pub fn build(self, ids: &mut IdGenerator) -> Arc<TestNode> {
        self.build_node(ids, None, Weak::new())
    }

    fn build_node(
        self,
        ids: &mut IdGenerator,
        parent_full_name: Option<&str>,
        parent: Weak<TestNode>,
    ) -> Arc<TestNode> {
        let NodeBuilder {
            name,
            kind,
            class_name,
            method_name,
            attributes,
            mut settings,
            children,
        } = self;

        let id = ids.next_id();
        let seed = ids.next_seed();
        let full_name = match parent_full_name {
            Some(parent_name) => format!("{parent_name}.{name}"),
            None => name.clone(),
        };
        settings.sort_by_key(ContextSetting::priority);

        Arc::new_cyclic(|me| {
            let children = children
                .into_iter()
                .map(|child| child.build_node(ids, Some(&full_name), me.clone()))
                .collect();

            let mut node = TestNode {
                id,
                name,
                full_name,
                kind,
                run_state: RunState::Runnable,
                properties: PropertyBag::new(),
                class_name,
                method_name,
                seed,
                settings,
                parent,
                children,
            };

            for attribute in &attributes {
                attribute.apply_to_test(&mut node);
            }

            node
        })
    }
}
