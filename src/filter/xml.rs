//! Canonical XML form of filters
//!
//! Each predicate or combinator maps to one element: `cat`, `test`, `name`,
//! `class`, `method`, `namespace`, `id`, `prop` (with a `name` attribute),
//! `and`, `or` and `not`. Regex predicates carry `re="1"`. The empty filter
//! is `<filter/>`; a `<filter>` wrapper around other elements is accepted on
//! input and treated as an implicit `and`.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use super::{TestFilter, ValueMatcher};

/// Filter XML that could not be read
#[derive(Error, Debug)]
pub enum FilterXmlError {
    #[error("malformed filter XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed attribute in filter XML: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("unknown filter element <{0}>")]
    UnknownElement(String),

    #[error("<{element}> is missing required attribute '{attribute}'")]
    MissingAttribute {
        element: String,
        attribute: &'static str,
    },

    #[error("<{element}> expects {expected} child filter(s), found {found}")]
    ChildCount {
        element: String,
        expected: &'static str,
        found: usize,
    },

    #[error("<{0}> cannot contain child elements")]
    UnexpectedChild(String),

    #[error("filter XML has {0} root elements, expected one")]
    RootCount(usize),

    #[error("unclosed element <{0}>")]
    Unclosed(String),

    #[error("invalid regular expression in <{element}>: {source}")]
    Regex {
        element: String,
        #[source]
        source: regex::Error,
    },
}

/// Serialize a filter to its canonical XML text
pub fn to_xml(filter: &TestFilter) -> String {
    let mut out = String::new();
    write_filter(filter, &mut out);
    out
}

fn write_filter(filter: &TestFilter, out: &mut String) {
    match filter {
        TestFilter::Empty => out.push_str("<filter/>"),
        TestFilter::Id(m) => write_value("id", None, m, out),
        TestFilter::FullName(m) => write_value("test", None, m, out),
        TestFilter::Name(m) => write_value("name", None, m, out),
        TestFilter::Class(m) => write_value("class", None, m, out),
        TestFilter::Method(m) => write_value("method", None, m, out),
        TestFilter::Namespace(m) => write_value("namespace", None, m, out),
        TestFilter::Category(m) => write_value("cat", None, m, out),
        TestFilter::Property { name, matcher } => write_value("prop", Some(name), matcher, out),
        TestFilter::And(filters) => write_group("and", filters, out),
        TestFilter::Or(filters) => write_group("or", filters, out),
        TestFilter::Not { inner, .. } => {
            out.push_str("<not>");
            write_filter(inner, out);
            out.push_str("</not>");
        }
    }
}

fn write_value(element: &str, name: Option<&str>, matcher: &ValueMatcher, out: &mut String) {
    out.push('<');
    out.push_str(element);
    if let Some(name) = name {
        out.push_str(&format!(" name=\"{}\"", escape(name)));
    }
    if matcher.is_regex() {
        out.push_str(" re=\"1\"");
    }
    out.push('>');
    out.push_str(&escape(matcher.value()));
    out.push_str(&format!("</{element}>"));
}

fn write_group(element: &str, filters: &[TestFilter], out: &mut String) {
    out.push_str(&format!("<{element}>"));
    for filter in filters {
        write_filter(filter, out);
    }
    out.push_str(&format!("</{element}>"));
}

/// Element being read, with what has been collected inside it so far
struct Frame {
    element: String,
    name_attr: Option<String>,
    is_regex: bool,
    children: Vec<TestFilter>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> Result<Self, FilterXmlError> {
        let element = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut name_attr = None;
        let mut is_regex = false;

        for attr in start.attributes() {
            let attr = attr?;
            let value = attr.unescape_value()?;
            match attr.key.as_ref() {
                b"name" => name_attr = Some(value.into_owned()),
                b"re" => is_regex = value == "1" || value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        Ok(Self {
            element,
            name_attr,
            is_regex,
            children: Vec::new(),
            text: String::new(),
        })
    }

    fn is_group(&self) -> bool {
        matches!(self.element.as_str(), "filter" | "and" | "or" | "not")
    }

    fn matcher(&self) -> Result<ValueMatcher, FilterXmlError> {
        if !self.children.is_empty() {
            return Err(FilterXmlError::UnexpectedChild(self.element.clone()));
        }
        if self.is_regex {
            ValueMatcher::regex(self.text.clone()).map_err(|source| FilterXmlError::Regex {
                element: self.element.clone(),
                source,
            })
        } else {
            Ok(ValueMatcher::literal(self.text.clone()))
        }
    }

    fn close(mut self) -> Result<TestFilter, FilterXmlError> {
        let filter = match self.element.as_str() {
            "filter" => match self.children.len() {
                0 => TestFilter::Empty,
                1 => self.children.remove(0),
                _ => TestFilter::And(self.children),
            },
            "and" | "or" => {
                if self.children.is_empty() {
                    return Err(FilterXmlError::ChildCount {
                        element: self.element,
                        expected: "at least one",
                        found: 0,
                    });
                }
                if self.element == "and" {
                    TestFilter::And(self.children)
                } else {
                    TestFilter::Or(self.children)
                }
            }
            "not" => {
                if self.children.len() != 1 {
                    return Err(FilterXmlError::ChildCount {
                        element: self.element,
                        expected: "exactly one",
                        found: self.children.len(),
                    });
                }
                TestFilter::not(self.children.remove(0))
            }
            "id" => TestFilter::Id(self.matcher()?),
            "test" => TestFilter::FullName(self.matcher()?),
            "name" => TestFilter::Name(self.matcher()?),
            "class" => TestFilter::Class(self.matcher()?),
            "method" => TestFilter::Method(self.matcher()?),
            "namespace" => TestFilter::Namespace(self.matcher()?),
            "cat" => TestFilter::Category(self.matcher()?),
            "prop" => {
                let matcher = self.matcher()?;
                let name = self.name_attr.ok_or(FilterXmlError::MissingAttribute {
                    element: self.element,
                    attribute: "name",
                })?;
                TestFilter::Property { name, matcher }
            }
            _ => return Err(FilterXmlError::UnknownElement(self.element)),
        };
        Ok(filter)
    }
}

/// Read a filter from XML. An outermost `<not>` is marked top-level.
pub fn from_xml(text: &str) -> Result<TestFilter, FilterXmlError> {
    if text.trim().is_empty() {
        return Ok(TestFilter::Empty);
    }

    let mut reader = Reader::from_str(text);

    let mut stack: Vec<Frame> = Vec::new();
    let mut roots: Vec<TestFilter> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(Frame::open(&start)?),
            Event::Empty(start) => {
                let filter = Frame::open(&start)?.close()?;
                attach(&mut stack, &mut roots, filter);
            }
            Event::Text(text) => {
                // Value text is kept verbatim; text between combinator children is layout
                if let Some(frame) = stack.last_mut().filter(|frame| !frame.is_group()) {
                    frame.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(_) => {
                if let Some(frame) = stack.pop() {
                    let filter = frame.close()?;
                    attach(&mut stack, &mut roots, filter);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(frame) = stack.pop() {
        return Err(FilterXmlError::Unclosed(frame.element));
    }
    if roots.len() != 1 {
        return Err(FilterXmlError::RootCount(roots.len()));
    }

    Ok(roots.remove(0).into_top_level())
}

fn attach(stack: &mut [Frame], roots: &mut Vec<TestFilter>, filter: TestFilter) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(filter),
        None => roots.push(filter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::compile;
    use crate::models::{IdGenerator, NodeBuilder, TestNode};
    use std::sync::Arc;

    fn tree() -> Arc<TestNode> {
        NodeBuilder::suite("Root")
            .child(
                NodeBuilder::suite("My.Tests")
                    .class("My.Tests")
                    .category("Urgent")
                    .child(NodeBuilder::test("Adds").method("Adds").property("Priority", "High"))
                    .child(NodeBuilder::test("Subtracts").method("Subtracts").explicit()),
            )
            .child(
                NodeBuilder::suite("Other")
                    .class("Other")
                    .child(NodeBuilder::test("Slow").method("Slow").category("Slow"))
                    .child(NodeBuilder::test("Fast").method("Fast")),
            )
            .build(&mut IdGenerator::new(5))
    }

    fn all_nodes(root: &Arc<TestNode>) -> Vec<Arc<TestNode>> {
        let mut out = vec![root.clone()];
        for child in root.children() {
            out.extend(all_nodes(child));
        }
        out
    }

    #[test]
    fn test_concrete_serializations() {
        assert_eq!(to_xml(&compile("cat=Urgent").unwrap()), "<cat>Urgent</cat>");
        assert_eq!(
            to_xml(&compile("cat!=Urgent").unwrap()),
            "<not><cat>Urgent</cat></not>"
        );
        assert_eq!(
            to_xml(&compile("cat==Urgent && test=='My.Tests'").unwrap()),
            "<and><cat>Urgent</cat><test>My.Tests</test></and>"
        );
    }

    #[test]
    fn test_property_regex_and_escaping() {
        let filter = compile("Priority =~ '<H&'").unwrap();
        assert_eq!(
            to_xml(&filter),
            "<prop name=\"Priority\" re=\"1\">&lt;H&amp;</prop>"
        );
        assert_eq!(from_xml(&to_xml(&filter)).unwrap(), filter);
    }

    #[test]
    fn test_empty_filter_round_trip() {
        assert_eq!(to_xml(&TestFilter::Empty), "<filter/>");
        assert_eq!(from_xml("<filter/>").unwrap(), TestFilter::Empty);
        assert_eq!(from_xml("<filter></filter>").unwrap(), TestFilter::Empty);
    }

    #[test]
    fn test_filter_wrapper_is_implicit_and() {
        let filter = from_xml("<filter><cat>A</cat><name>B</name></filter>").unwrap();
        assert_eq!(
            filter,
            TestFilter::and(vec![TestFilter::category("A"), TestFilter::name("B")])
        );

        let single = from_xml("<filter><not><cat>A</cat></not></filter>").unwrap();
        assert!(matches!(single, TestFilter::Not { top_level: true, .. }));
    }

    #[test]
    fn test_round_trip_matches_same_nodes() {
        let root = tree();
        let nodes = all_nodes(&root);
        let queries = [
            "cat==Urgent",
            "cat!=Urgent",
            "cat = Urgent || cat = Slow",
            "!(class==Other) && Priority==High",
            "name =~ '^S' and !cat==Slow",
            "test == 'Root.My.Tests.Subtracts'",
            "namespace != My",
            "method !~ 'ast$'",
        ];

        for query in queries {
            let original = compile(query).unwrap();
            let restored = from_xml(&to_xml(&original)).unwrap();
            for node in &nodes {
                assert_eq!(
                    original.matches(node),
                    restored.matches(node),
                    "match of {} under '{query}'",
                    node.full_name()
                );
                assert_eq!(
                    original.pass(node),
                    restored.pass(node),
                    "pass of {} under '{query}'",
                    node.full_name()
                );
            }
        }
    }

    #[test]
    fn test_value_whitespace_survives_round_trip() {
        let root = tree();
        let adds = root.find("Root.My.Tests.Adds").unwrap();

        let original = compile("name =~ 'Add '").unwrap();
        let xml = to_xml(&original);
        assert_eq!(xml, "<name re=\"1\">Add </name>");

        let restored = from_xml(&xml).unwrap();
        assert_eq!(restored, original);
        assert!(!original.matches(&adds));
        assert!(!restored.matches(&adds));

        let padded = TestFilter::category("  Urgent");
        assert_eq!(from_xml(&to_xml(&padded)).unwrap(), padded);
    }

    #[test]
    fn test_indented_document() {
        let xml = r#"
<filter>
  <and>
    <cat>Urgent</cat>
    <not>
      <name>Adds</name>
    </not>
  </and>
</filter>
"#;
        let filter = from_xml(xml).unwrap();
        assert_eq!(
            filter,
            TestFilter::and(vec![
                TestFilter::category("Urgent"),
                TestFilter::not(TestFilter::name("Adds")),
            ])
        );
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            from_xml("<bogus>x</bogus>"),
            Err(FilterXmlError::UnknownElement(e)) if e == "bogus"
        ));
        assert!(matches!(
            from_xml("<prop>x</prop>"),
            Err(FilterXmlError::MissingAttribute { .. })
        ));
        assert!(matches!(
            from_xml("<not><cat>a</cat><cat>b</cat></not>"),
            Err(FilterXmlError::ChildCount { .. })
        ));
        assert!(matches!(
            from_xml("<cat>a</cat><cat>b</cat>"),
            Err(FilterXmlError::RootCount(2))
        ));
        assert!(matches!(
            from_xml("<cat re=\"1\">(</cat>"),
            Err(FilterXmlError::Regex { .. })
        ));
        assert!(from_xml("<and><cat>a</cat>").is_err());
    }
}
