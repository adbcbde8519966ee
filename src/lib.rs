//! suite-runner - test selection and scheduling core of a unit-test framework
//!
//! Compiles selection queries into filter trees, decides which nodes of a
//! discovered test tree take part in a run, and executes them as work items
//! on a bounded worker pool, rolling child results up into a result tree.

pub mod config;
pub mod discovery;
pub mod executor;
pub mod filter;
pub mod models;
pub mod output;
pub mod utils;
