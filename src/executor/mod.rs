//! Test execution engine
//!
//! Turns a filtered test tree into work items and runs them sequentially or
//! on a bounded worker pool.

mod context;
mod dispatcher;
mod invoker;
mod rollup;
mod runner;
mod work_item;

pub use context::{ExecutionContext, StopToken, INVARIANT_CULTURE};
pub use dispatcher::Dispatcher;
pub use invoker::{
    guarded, leaf_result, ExecutionListener, LoggingListener, NullListener, TestFailure,
    TestInvoker, TestOutcome,
};
pub use rollup::Rollup;
pub use runner::{RunReport, TestRunner};
pub use work_item::{ExecutionError, WorkItem, WorkItemState};
