//! Output formatting module
//!
//! Renders run reports and test listings.

mod formatter;

pub use formatter::{write_report_to_file, OutputFormat, ResultFormatter};
