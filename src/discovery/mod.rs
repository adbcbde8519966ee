//! Test discovery
//!
//! Produces the root test node for a run. The scheduler never calls back
//! into discovery once the tree exists.

mod manifest;

pub use manifest::{Manifest, ManifestError, ManifestNode, ScriptedInvoker, ScriptedOutcome};

use std::sync::Arc;

use crate::models::{IdGenerator, TestNode};

/// Source of a test tree
pub trait TestTreeFactory {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Build the tree, drawing ids and seeds from `ids`
    fn build(&self, ids: &mut IdGenerator) -> Result<Arc<TestNode>, Self::Error>;
}
