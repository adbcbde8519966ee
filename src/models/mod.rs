//! Data models for test execution
//!
//! The test tree consumed by both engines and the result tree they produce.

mod test_node;
mod test_result;

pub use test_node::{
    ApplyToTest, ContextSetting, IdGenerator, NodeBuilder, PropertyBag, RunState, TestAttribute,
    TestId, TestKind, TestNode, CATEGORY_KEY, DESCRIPTION_KEY, SKIP_REASON_KEY,
};
pub use test_result::{
    FailureSite, ResultLabel, ResultState, RunSummary, TestResult, TestStatus,
};
