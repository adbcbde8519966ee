//! Output formatters for run reports
//!
//! Provides table, tree, JSON, CSV and one-line summary renderings.

use anyhow::{Context, Result};
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::executor::RunReport;
use crate::filter::TestFilter;
use crate::models::{TestNode, TestResult, TestStatus};

/// Output format options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Tree,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub const NAMES: &'static [&'static str] =
        &["table", "tree", "json", "json-pretty", "csv", "summary"];

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "tree" => Some(OutputFormat::Tree),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutputFormat::parse(s).ok_or_else(|| {
            format!(
                "unknown output format '{s}' (expected one of: {})",
                Self::NAMES.join(", ")
            )
        })
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Table => "table",
            OutputFormat::Tree => "tree",
            OutputFormat::Json => "json",
            OutputFormat::JsonPretty => "json-pretty",
            OutputFormat::Csv => "csv",
            OutputFormat::Summary => "summary",
        };
        f.write_str(name)
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Format a finished run
    pub fn format_report(&self, report: &RunReport) -> String {
        match self.format {
            OutputFormat::Table => self.format_table(report),
            OutputFormat::Tree => self.format_tree(&report.result),
            OutputFormat::Json => serde_json::to_string(report).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Csv => format_csv(&report.result).unwrap_or_default(),
            OutputFormat::Summary => self.format_summary(report),
        }
    }

    fn status_label(&self, result: &TestResult) -> String {
        let plain = match result.state.label {
            Some(label) => format!("{} {}:{}", result.status().symbol(), result.status(), label),
            None => format!("{} {}", result.status().symbol(), result.status()),
        };
        if !self.colorize {
            return plain;
        }
        let color = match result.status() {
            TestStatus::Passed => "32",
            TestStatus::Failed => "31",
            TestStatus::Skipped => "33",
            TestStatus::Inconclusive => "36",
        };
        format!("\x1b[{color}m{plain}\x1b[0m")
    }

    fn format_table(&self, report: &RunReport) -> String {
        let summary = &report.summary;
        let mut output = String::new();

        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!("║  {:58}  ║\n", report.result.full_name));
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        for result in report.result.walk().into_iter().filter(|r| r.is_leaf()) {
            output.push_str(&format!(
                "║  {:40} {} [{:>6}ms]\n",
                result.full_name,
                self.status_label(result),
                result.duration_ms
            ));
            let message = result.message.as_deref();
            if let Some(message) = message.filter(|_| !result.status().is_success()) {
                output.push_str(&format!("║      {message}\n"));
            }
        }

        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        let pass_str = if self.colorize {
            format!("\x1b[32m{}\x1b[0m", summary.passed)
        } else {
            summary.passed.to_string()
        };
        let fail_str = if self.colorize && summary.failed + summary.errors > 0 {
            format!("\x1b[31m{}\x1b[0m", summary.failed + summary.errors)
        } else {
            (summary.failed + summary.errors).to_string()
        };

        output.push_str(&format!(
            "║  Total: {:3} | Pass: {} | Fail: {} | Skip: {:3} | Inconclusive: {:3}\n",
            summary.total,
            pass_str,
            fail_str,
            summary.skipped + summary.ignored + summary.explicit,
            summary.inconclusive
        ));
        output.push_str(&format!(
            "║  Result: {} | Pass Rate: {:5.1}% | Duration: {:6}ms\n",
            report.result.state,
            summary.pass_rate(),
            summary.total_duration_ms
        ));
        if report.cancelled {
            output.push_str(&format!(
                "║  Run was stopped early; {} test(s) cancelled\n",
                summary.cancelled
            ));
        }
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");

        output
    }

    /// Indented result tree
    pub fn format_tree(&self, result: &TestResult) -> String {
        let mut output = String::new();
        self.write_tree(result, 0, &mut output);
        output
    }

    fn write_tree(&self, result: &TestResult, depth: usize, output: &mut String) {
        output.push_str(&format!(
            "{}{} {} [{}ms]",
            "  ".repeat(depth),
            self.status_label(result),
            result.name,
            result.duration_ms
        ));
        if let Some(message) = &result.message {
            output.push_str(&format!(" - {}", message.lines().next().unwrap_or_default()));
        }
        output.push('\n');
        for child in &result.children {
            self.write_tree(child, depth + 1, output);
        }
    }

    fn format_summary(&self, report: &RunReport) -> String {
        let summary = &report.summary;
        format!(
            "{} {}: {}/{} passed ({:.1}%) in {}ms",
            report.result.state.status.symbol(),
            report.result.full_name,
            summary.passed,
            summary.total,
            summary.pass_rate(),
            summary.total_duration_ms
        )
    }

    /// Tests selected by `filter`, as an indented tree
    pub fn format_tests(
        &self,
        root: &Arc<TestNode>,
        filter: &TestFilter,
        detailed: bool,
    ) -> String {
        let mut output = String::new();
        write_test_tree(root, filter, detailed, 0, &mut output);
        output
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

fn write_test_tree(
    node: &Arc<TestNode>,
    filter: &TestFilter,
    detailed: bool,
    depth: usize,
    output: &mut String,
) {
    if !filter.pass(node) {
        return;
    }
    let indent = "  ".repeat(depth);
    output.push_str(&format!("{indent}{} ({})", node.name(), node.kind()));
    if detailed {
        output.push_str(&format!(" [id {}, {}]", node.id(), node.run_state()));
    }
    output.push('\n');

    if detailed {
        for (key, values) in node.properties().iter() {
            output.push_str(&format!("{indent}    {key}: {}\n", values.join(", ")));
        }
    }
    for child in node.children() {
        write_test_tree(child, filter, detailed, depth + 1, output);
    }
}

fn format_csv(result: &TestResult) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "id",
        "full_name",
        "kind",
        "status",
        "label",
        "duration_ms",
        "asserts",
        "message",
    ])?;

    for r in result.walk() {
        writer.write_record([
            r.id.to_string(),
            r.full_name.clone(),
            r.kind.to_string(),
            r.status().to_string(),
            r.state.label.map(|l| l.to_string()).unwrap_or_default(),
            r.duration_ms.to_string(),
            r.assert_count.to_string(),
            r.message.clone().unwrap_or_default(),
        ])?;
    }

    let bytes = writer.into_inner().context("Failed to flush CSV output")?;
    String::from_utf8(bytes).context("CSV output was not UTF-8")
}

/// Write a report to a file
pub fn write_report_to_file(
    path: impl AsRef<Path>,
    report: &RunReport,
    format: OutputFormat,
) -> Result<()> {
    let path = path.as_ref();
    let formatter = ResultFormatter::new(format).no_color();
    let content = formatter.format_report(report);

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
