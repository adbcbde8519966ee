//! Test selection
//!
//! A filter is a small boolean expression tree evaluated against test nodes.
//! Three verdicts are exposed per node:
//!
//! - [`TestFilter::matches`] looks at the node alone
//! - [`TestFilter::pass`] also accepts a node when an ancestor or a
//!   descendant matches, so suites leading to selected tests are kept
//! - [`TestFilter::is_explicit_match`] tells the scheduler that an explicit
//!   node was named directly and may run
//!
//! Filters are built programmatically, compiled from query text
//! ([`compile`]) or read from their XML form ([`from_xml`]).

mod parser;
mod xml;

pub use parser::{compile, QuerySyntaxError};
pub use xml::{from_xml, to_xml, FilterXmlError};

use regex::Regex;
use std::fmt;
use std::sync::Arc;

use crate::models::{RunState, TestNode};

/// Literal or regular-expression comparison against one string
#[derive(Clone, Debug)]
pub struct ValueMatcher {
    value: String,
    regex: Option<Regex>,
}

impl ValueMatcher {
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            regex: None,
        }
    }

    pub fn regex(pattern: impl Into<String>) -> Result<Self, regex::Error> {
        let value = pattern.into();
        let regex = Regex::new(&value)?;
        Ok(Self {
            value,
            regex: Some(regex),
        })
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_regex(&self) -> bool {
        self.regex.is_some()
    }

    pub fn is_match(&self, text: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(text),
            None => self.value == text,
        }
    }
}

impl PartialEq for ValueMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.is_regex() == other.is_regex()
    }
}

impl Eq for ValueMatcher {}

/// Compiled boolean predicate over test nodes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestFilter {
    Empty,
    Id(ValueMatcher),
    FullName(ValueMatcher),
    Name(ValueMatcher),
    Class(ValueMatcher),
    Method(ValueMatcher),
    Namespace(ValueMatcher),
    Category(ValueMatcher),
    Property { name: String, matcher: ValueMatcher },
    And(Vec<TestFilter>),
    Or(Vec<TestFilter>),
    Not { inner: Box<TestFilter>, top_level: bool },
}

impl Default for TestFilter {
    fn default() -> Self {
        TestFilter::Empty
    }
}

impl TestFilter {
    pub fn category(name: impl Into<String>) -> Self {
        TestFilter::Category(ValueMatcher::literal(name))
    }

    pub fn full_name(name: impl Into<String>) -> Self {
        TestFilter::FullName(ValueMatcher::literal(name))
    }

    pub fn name(name: impl Into<String>) -> Self {
        TestFilter::Name(ValueMatcher::literal(name))
    }

    pub fn class(name: impl Into<String>) -> Self {
        TestFilter::Class(ValueMatcher::literal(name))
    }

    pub fn method(name: impl Into<String>) -> Self {
        TestFilter::Method(ValueMatcher::literal(name))
    }

    pub fn namespace(name: impl Into<String>) -> Self {
        TestFilter::Namespace(ValueMatcher::literal(name))
    }

    pub fn id(id: impl Into<String>) -> Self {
        TestFilter::Id(ValueMatcher::literal(id))
    }

    pub fn property(name: impl Into<String>, value: impl Into<String>) -> Self {
        TestFilter::Property {
            name: name.into(),
            matcher: ValueMatcher::literal(value),
        }
    }

    pub fn and(filters: Vec<TestFilter>) -> Self {
        TestFilter::And(filters)
    }

    pub fn or(filters: Vec<TestFilter>) -> Self {
        TestFilter::Or(filters)
    }

    pub fn not(filter: TestFilter) -> Self {
        TestFilter::Not {
            inner: Box::new(filter),
            top_level: false,
        }
    }

    /// Marks an outermost `Not` as the top level of a whole-run filter.
    /// Any other filter is returned unchanged.
    pub fn into_top_level(self) -> Self {
        match self {
            TestFilter::Not { inner, .. } => TestFilter::Not {
                inner,
                top_level: true,
            },
            other => other,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, TestFilter::Empty)
    }

    /// Verdict for this node alone
    pub fn matches(&self, test: &TestNode) -> bool {
        match self {
            TestFilter::Empty => true,
            TestFilter::Id(m) => m.is_match(&test.id().to_string()),
            TestFilter::FullName(m) => m.is_match(test.full_name()),
            TestFilter::Name(m) => m.is_match(test.name()),
            TestFilter::Class(m) => test.class_name().is_some_and(|c| m.is_match(c)),
            TestFilter::Method(m) => test.method_name().is_some_and(|c| m.is_match(c)),
            TestFilter::Namespace(m) => test.namespace().is_some_and(|ns| m.is_match(ns)),
            TestFilter::Category(m) => test.categories().iter().any(|c| m.is_match(c)),
            TestFilter::Property { name, matcher } => test
                .properties()
                .get_all(name)
                .iter()
                .any(|v| matcher.is_match(v)),
            TestFilter::And(filters) => filters.iter().all(|f| f.matches(test)),
            TestFilter::Or(filters) => filters.iter().any(|f| f.matches(test)),
            TestFilter::Not { inner, top_level } => {
                if *top_level && test.run_state() == RunState::Explicit {
                    return false;
                }
                !inner.pass(test)
            }
        }
    }

    /// Whether the node stays in the executed view
    pub fn pass(&self, test: &TestNode) -> bool {
        match self {
            TestFilter::Empty => true,
            TestFilter::And(filters) => filters.iter().all(|f| f.pass(test)),
            TestFilter::Or(filters) => filters.iter().any(|f| f.pass(test)),
            _ => self.matches(test) || self.match_ancestor(test) || self.match_descendant(test),
        }
    }

    /// Whether an explicit node was selected by name rather than by
    /// inclusion through an ancestor or descendant
    pub fn is_explicit_match(&self, test: &TestNode) -> bool {
        !self.is_empty() && test.run_state() == RunState::Explicit && self.matches(test)
    }

    fn match_ancestor(&self, test: &TestNode) -> bool {
        test.ancestors().any(|ancestor| self.matches(&ancestor))
    }

    fn match_descendant(&self, test: &TestNode) -> bool {
        test.children()
            .iter()
            .any(|child| self.matches(child) || self.match_descendant(child))
    }

    /// Leaf test cases under `root` that pass the filter
    pub fn selected_test_cases(&self, root: &Arc<TestNode>) -> Vec<Arc<TestNode>> {
        let mut selected = Vec::new();
        self.collect_selected(root, &mut selected);
        selected
    }

    fn collect_selected(&self, node: &Arc<TestNode>, out: &mut Vec<Arc<TestNode>>) {
        if !self.pass(node) {
            return;
        }
        if node.is_suite() {
            for child in node.children() {
                self.collect_selected(child, out);
            }
        } else {
            out.push(node.clone());
        }
    }
}

impl fmt::Display for TestFilter {
    /// Renders the filter back into query syntax
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestFilter::Empty => Ok(()),
            TestFilter::Id(m) => write_predicate(f, "id", m),
            TestFilter::FullName(m) => write_predicate(f, "test", m),
            TestFilter::Name(m) => write_predicate(f, "name", m),
            TestFilter::Class(m) => write_predicate(f, "class", m),
            TestFilter::Method(m) => write_predicate(f, "method", m),
            TestFilter::Namespace(m) => write_predicate(f, "namespace", m),
            TestFilter::Category(m) => write_predicate(f, "cat", m),
            TestFilter::Property { name, matcher } => write_predicate(f, name, matcher),
            TestFilter::And(filters) => write_group(f, filters, " && "),
            TestFilter::Or(filters) => write_group(f, filters, " || "),
            TestFilter::Not { inner, .. } => write!(f, "!({inner})"),
        }
    }
}

fn write_predicate(f: &mut fmt::Formatter<'_>, field: &str, matcher: &ValueMatcher) -> fmt::Result {
    let op = if matcher.is_regex() { "=~" } else { "==" };
    let escaped = matcher.value().replace('\\', "\\\\").replace('\'', "\\'");
    write!(f, "{field} {op} '{escaped}'")
}

fn write_group(f: &mut fmt::Formatter<'_>, filters: &[TestFilter], separator: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 {
            f.write_str(separator)?;
        }
        write!(f, "{filter}")?;
    }
    write!(f, ")")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IdGenerator, NodeBuilder};

    /// Assembly
    ///   My.Fixture            [Dummy]
    ///     My.Fixture.Plain
    ///     My.Fixture.Hidden   (explicit)
    ///   My.Other
    ///     My.Other.Urgent     [Urgent]
    ///     My.Other.Slow       [Slow] Priority=Low
    fn tree() -> Arc<TestNode> {
        NodeBuilder::suite("Assembly")
            .child(
                NodeBuilder::suite("My.Fixture")
                    .class("My.Fixture")
                    .category("Dummy")
                    .child(NodeBuilder::test("Plain").method("Plain"))
                    .child(NodeBuilder::test("Hidden").method("Hidden").explicit()),
            )
            .child(
                NodeBuilder::suite("My.Other")
                    .class("My.Other")
                    .child(NodeBuilder::test("Urgent").method("Urgent").category("Urgent"))
                    .child(
                        NodeBuilder::test("Slow")
                            .method("Slow")
                            .category("Slow")
                            .property("Priority", "Low"),
                    ),
            )
            .build(&mut IdGenerator::new(11))
    }

    fn node(root: &Arc<TestNode>, name: &str) -> Arc<TestNode> {
        root.find(name)
            .unwrap_or_else(|| panic!("missing node {name}"))
    }

    #[test]
    fn test_empty_matches_everything_but_never_explicitly() {
        let root = tree();
        let hidden = node(&root, "Assembly.My.Fixture.Hidden");
        assert!(TestFilter::Empty.matches(&hidden));
        assert!(TestFilter::Empty.pass(&hidden));
        assert!(!TestFilter::Empty.is_explicit_match(&hidden));
    }

    #[test]
    fn test_category_on_suite_propagates_to_children() {
        let root = tree();
        let suite = node(&root, "Assembly.My.Fixture");
        let child = node(&root, "Assembly.My.Fixture.Plain");
        let filter = TestFilter::category("Dummy");

        assert!(filter.matches(&suite));
        assert!(!filter.matches(&child));
        assert!(filter.pass(&suite));
        assert!(filter.pass(&child));
        assert!(!filter.is_explicit_match(&suite));
    }

    #[test]
    fn test_explicit_match_requires_explicit_suite() {
        let root = NodeBuilder::suite("Root")
            .child(
                NodeBuilder::suite("Fixture")
                    .category("Dummy")
                    .explicit()
                    .child(NodeBuilder::test("Child")),
            )
            .build(&mut IdGenerator::new(3));
        let filter = TestFilter::category("Dummy");
        assert!(filter.is_explicit_match(&node(&root, "Root.Fixture")));
        assert!(!filter.is_explicit_match(&node(&root, "Root.Fixture.Child")));
    }

    #[test]
    fn test_pass_is_monotonic_upward() {
        let root = tree();
        let filters = vec![
            TestFilter::category("Urgent"),
            TestFilter::property("Priority", "Low"),
            TestFilter::name("Plain"),
            TestFilter::not(TestFilter::category("Slow")),
        ];

        for filter in &filters {
            for leaf in filter.selected_test_cases(&root) {
                if filter.matches(&leaf) {
                    assert!(leaf.ancestors().all(|a| filter.pass(&a)), "{filter}");
                }
            }
        }
    }

    #[test]
    fn test_not_excludes_whole_matching_subtree() {
        let root = tree();
        let filter = TestFilter::not(TestFilter::category("Dummy"));

        assert!(!filter.pass(&node(&root, "Assembly.My.Fixture")));
        assert!(!filter.pass(&node(&root, "Assembly.My.Fixture.Plain")));
        assert!(filter.pass(&node(&root, "Assembly.My.Other.Slow")));
        assert!(filter.pass(&root));
    }

    #[test]
    fn test_top_level_not_skips_explicit_nodes() {
        let root = tree();
        let hidden = node(&root, "Assembly.My.Fixture.Hidden");
        let nested = TestFilter::not(TestFilter::category("Urgent"));
        let top = nested.clone().into_top_level();

        assert!(nested.matches(&hidden));
        assert!(!top.matches(&hidden));
        assert!(!top.is_explicit_match(&hidden));
    }

    #[test]
    fn test_double_negation_passes_same_set() {
        let root = tree();
        let all: Vec<Arc<TestNode>> = [
            "Assembly",
            "Assembly.My.Fixture",
            "Assembly.My.Fixture.Plain",
            "Assembly.My.Other",
            "Assembly.My.Other.Urgent",
            "Assembly.My.Other.Slow",
        ]
        .iter()
        .map(|n| node(&root, n))
        .collect();

        for base in [TestFilter::category("Urgent"), TestFilter::category("Dummy")] {
            let doubled = TestFilter::not(TestFilter::not(base.clone())).into_top_level();
            for n in &all {
                assert_eq!(base.pass(n), doubled.pass(n), "{} with {base}", n.full_name());
            }
        }
    }

    #[test]
    fn test_and_or_combinators() {
        let root = tree();
        let urgent = node(&root, "Assembly.My.Other.Urgent");
        let slow = node(&root, "Assembly.My.Other.Slow");

        let both = TestFilter::and(vec![
            TestFilter::class("My.Other"),
            TestFilter::category("Urgent"),
        ]);
        assert!(!both.matches(&urgent));
        assert!(both.pass(&urgent));
        assert!(!both.pass(&slow));

        let either = TestFilter::or(vec![
            TestFilter::category("Urgent"),
            TestFilter::property("Priority", "Low"),
        ]);
        assert!(either.matches(&urgent));
        assert!(either.matches(&slow));
        assert!(!either.pass(&node(&root, "Assembly.My.Fixture")));
    }

    #[test]
    fn test_regex_and_namespace_filters() {
        let root = tree();
        let filter = TestFilter::Name(ValueMatcher::regex("^Sl").unwrap());
        let names: Vec<String> = filter
            .selected_test_cases(&root)
            .iter()
            .map(|n| n.name().to_string())
            .collect();
        assert_eq!(names, vec!["Slow"]);

        // Leaves carry no class here, so they pass through their fixtures
        let ns = TestFilter::namespace("My");
        assert_eq!(ns.selected_test_cases(&root).len(), 4);
        assert!(!ns.matches(&node(&root, "Assembly.My.Other.Slow")));
    }

    #[test]
    fn test_id_filter() {
        let root = tree();
        let slow = node(&root, "Assembly.My.Other.Slow");
        let filter = TestFilter::id(slow.id().to_string());
        assert!(filter.matches(&slow));
        assert_eq!(filter.selected_test_cases(&root).len(), 1);
    }

    #[test]
    fn test_display_renders_query() {
        let filter = TestFilter::and(vec![
            TestFilter::category("Urgent"),
            TestFilter::not(TestFilter::full_name("It's")),
        ]);
        assert_eq!(filter.to_string(), "(cat == 'Urgent' && !(test == 'It\\'s'))");
    }
}
