//! Manifest-described test trees
//!
//! A manifest is a YAML or JSON document describing a suite hierarchy and a
//! scripted outcome for every test and fixture. It stands in for compiled
//! test assemblies when driving the runner from the command line.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::TestTreeFactory;
use crate::executor::{ExecutionContext, TestFailure, TestInvoker, TestOutcome};
use crate::models::{
    ContextSetting, IdGenerator, NodeBuilder, TestAttribute, TestKind, TestNode,
};

/// Manifest that could not be loaded
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to parse JSON manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid manifest: {0}")]
    Invalid(String),
}

/// What a scripted test body, setup or teardown does
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptedOutcome {
    #[default]
    Pass,
    Fail,
    Error,
    Inconclusive,
    Ignore,
    Panic,
}

impl ScriptedOutcome {
    fn into_failure(self, message: &str) -> Option<TestFailure> {
        match self {
            ScriptedOutcome::Pass => None,
            ScriptedOutcome::Fail => Some(TestFailure::assertion(message)),
            ScriptedOutcome::Error => Some(TestFailure::error(message)),
            ScriptedOutcome::Inconclusive => Some(TestFailure::Inconclusive(message.to_string())),
            ScriptedOutcome::Ignore => Some(TestFailure::Ignore(message.to_string())),
            ScriptedOutcome::Panic => panic!("{message}"),
        }
    }
}

/// One node of a manifest
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestNode {
    pub name: String,

    /// Defaults to `suite` when the node has children, `leaf` otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TestKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub explicit: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_runnable: Option<String>,

    /// Written as single-key maps, e.g. `- culture: fr-FR`
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        with = "serde_yaml::with::singleton_map_recursive"
    )]
    pub settings: Vec<ContextSetting>,

    /// Outcome of a leaf body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ScriptedOutcome>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub asserts: u32,

    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub delay_ms: u64,

    /// Outcome of a suite's one-time setup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<ScriptedOutcome>,

    /// Outcome of a suite's one-time teardown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teardown: Option<ScriptedOutcome>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ManifestNode>,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

fn is_zero_u64(value: &u64) -> bool {
    *value == 0
}

impl ManifestNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn kind(&self) -> TestKind {
        match self.kind {
            Some(kind) => kind,
            None if self.children.is_empty() => TestKind::Leaf,
            None => TestKind::Suite,
        }
    }

    fn validate(&self, path: &str) -> Result<(), ManifestError> {
        if self.name.trim().is_empty() {
            return Err(ManifestError::Invalid(format!(
                "node under '{path}' has an empty name"
            )));
        }
        let full_name = join_name(path, &self.name);
        if self.kind() == TestKind::Leaf && !self.children.is_empty() {
            return Err(ManifestError::Invalid(format!(
                "leaf '{full_name}' cannot have children"
            )));
        }

        let mut seen = HashSet::new();
        for child in &self.children {
            if !seen.insert(child.name.as_str()) {
                return Err(ManifestError::Invalid(format!(
                    "duplicate child '{}' under '{full_name}'",
                    child.name
                )));
            }
            child.validate(&full_name)?;
        }
        Ok(())
    }

    fn to_builder(&self) -> NodeBuilder {
        let mut builder = NodeBuilder::new(self.name.clone(), self.kind());
        if let Some(class) = &self.class {
            builder = builder.class(class.clone());
        }
        if let Some(method) = &self.method {
            builder = builder.method(method.clone());
        }
        for category in &self.categories {
            builder = builder.category(category.clone());
        }
        for (key, value) in &self.properties {
            builder = builder.property(key.clone(), value.clone());
        }
        if let Some(text) = &self.description {
            builder = builder.attribute(TestAttribute::Description(text.clone()));
        }
        if let Some(reason) = &self.not_runnable {
            builder = builder.not_runnable(reason.clone());
        }
        if let Some(reason) = &self.ignore {
            builder = builder.ignore(reason.clone());
        }
        if let Some(reason) = &self.skip {
            builder = builder.attribute(TestAttribute::Skip(reason.clone()));
        }
        if self.explicit {
            builder = builder.explicit();
        }
        for setting in &self.settings {
            builder = builder.setting(setting.clone());
        }
        builder.children(self.children.iter().map(ManifestNode::to_builder))
    }

    fn collect_scripts(&self, path: &str, scripts: &mut HashMap<String, Script>) {
        let full_name = join_name(path, &self.name);
        for child in &self.children {
            child.collect_scripts(&full_name, scripts);
        }
        scripts.insert(
            full_name,
            Script {
                outcome: self.outcome.unwrap_or_default(),
                setup: self.setup.unwrap_or_default(),
                teardown: self.teardown.unwrap_or_default(),
                message: self.message.clone(),
                asserts: self.asserts,
                delay: Duration::from_millis(self.delay_ms),
            },
        );
    }
}

fn join_name(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

/// YAML or JSON description of a test tree
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_version")]
    pub version: String,

    /// Seed for node ids and per-test random seeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    pub root: ManifestNode,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Manifest {
    pub fn new(root: ManifestNode) -> Self {
        Self {
            version: default_version(),
            seed: None,
            root,
        }
    }

    /// Load a manifest, choosing YAML or JSON by file extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let manifest = if is_json_file(path) {
            Self::from_json_str(&content)?
        } else {
            Self::from_yaml_str(&content)?
        };
        debug!(
            "Loaded manifest {} with root '{}'",
            path.display(),
            manifest.root.name
        );
        Ok(manifest)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ManifestError> {
        let manifest: Self = serde_yaml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ManifestError> {
        let manifest: Self = serde_json::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.version != "1.0" {
            return Err(ManifestError::Invalid(format!(
                "unsupported manifest version {}",
                self.version
            )));
        }
        self.root.validate("")
    }

    /// Invoker replaying the scripted outcomes of this manifest
    pub fn invoker(&self) -> ScriptedInvoker {
        let mut scripts = HashMap::new();
        self.root.collect_scripts("", &mut scripts);
        ScriptedInvoker { scripts }
    }
}

impl TestTreeFactory for Manifest {
    type Error = ManifestError;

    fn build(&self, ids: &mut IdGenerator) -> Result<Arc<TestNode>, ManifestError> {
        self.validate()?;
        Ok(self.root.to_builder().build(ids))
    }
}

fn is_json_file(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}

#[derive(Clone, Debug)]
struct Script {
    outcome: ScriptedOutcome,
    setup: ScriptedOutcome,
    teardown: ScriptedOutcome,
    message: Option<String>,
    asserts: u32,
    delay: Duration,
}

impl Script {
    fn message_or(&self, default: &str) -> String {
        self.message.clone().unwrap_or_else(|| default.to_string())
    }
}

/// Invoker that replays the outcomes written in a manifest, keyed by full name.
/// Tests without a script pass.
#[derive(Clone, Debug, Default)]
pub struct ScriptedInvoker {
    scripts: HashMap<String, Script>,
}

impl ScriptedInvoker {
    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

impl TestInvoker for ScriptedInvoker {
    fn run_test(
        &self,
        test: &TestNode,
        _context: &mut ExecutionContext,
    ) -> Result<TestOutcome, TestFailure> {
        let Some(script) = self.scripts.get(test.full_name()) else {
            return Ok(TestOutcome::passed());
        };
        if !script.delay.is_zero() {
            std::thread::sleep(script.delay);
        }

        match script
            .outcome
            .into_failure(&script.message_or("Scripted test failure"))
        {
            Some(failure) => Err(failure),
            None => {
                let mut outcome = TestOutcome::passed().with_asserts(script.asserts);
                outcome.message = script.message.clone();
                Ok(outcome)
            }
        }
    }

    fn one_time_setup(
        &self,
        suite: &TestNode,
        _context: &mut ExecutionContext,
    ) -> Result<(), TestFailure> {
        match self.scripts.get(suite.full_name()) {
            Some(script) => script
                .setup
                .into_failure(&script.message_or("Scripted setup failure"))
                .map_or(Ok(()), Err),
            None => Ok(()),
        }
    }

    fn one_time_teardown(
        &self,
        suite: &TestNode,
        _context: &mut ExecutionContext,
    ) -> Result<(), TestFailure> {
        match self.scripts.get(suite.full_name()) {
            Some(script) => script
                .teardown
                .into_failure(&script.message_or("Scripted teardown failure"))
                .map_or(Ok(()), Err),
            None => Ok(()),
        }
    }
}
