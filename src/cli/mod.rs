//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use suite_runner::config::RunConfig;

/// Select and run unit test suites described by a manifest
#[derive(Parser, Debug)]
#[command(name = "suite-runner")]
#[command(version)]
#[command(about = "Select and run unit test suites with filter queries and a bounded worker pool")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the tests in a manifest
    Run(RunArgs),

    /// List the tests a query selects
    List(ListArgs),

    /// Compile a query and print its canonical form
    Filter(FilterArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Manifest describing the test tree (YAML or JSON)
    pub manifest: PathBuf,

    /// Selection query, e.g. "cat == Fast && test =~ Calc"
    #[arg(short, long = "where")]
    pub where_clause: Option<String>,

    /// Worker pool size (0 = sequential)
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,

    /// Stop starting new tests after the first failure
    #[arg(long)]
    pub stop_on_error: bool,

    /// Output format (table, tree, json, json-pretty, csv, summary)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Seed for test ids and per-test randomizers
    #[arg(long)]
    pub seed: Option<u64>,

    /// Stop starting new tests after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Culture applied to every test
    #[arg(long)]
    pub culture: Option<String>,

    /// Save the report to a file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Disable coloured output
    #[arg(long)]
    pub no_color: bool,
}

impl RunArgs {
    /// Layer command-line flags over `config`
    pub fn apply_to(&self, config: &mut RunConfig) {
        if let Some(query) = &self.where_clause {
            config.where_clause = Some(query.clone());
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.stop_on_error {
            config.stop_on_error = true;
        }
        if let Some(format) = &self.format {
            config.format = format.clone();
        }
        if let Some(seed) = self.seed {
            config.random_seed = Some(seed);
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = Some(timeout);
        }
        if let Some(culture) = &self.culture {
            config.culture = Some(culture.clone());
        }
    }
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Manifest describing the test tree (YAML or JSON)
    pub manifest: PathBuf,

    /// Selection query
    #[arg(short, long = "where")]
    pub where_clause: Option<String>,

    /// Show ids, run states and properties
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for filter command
#[derive(Parser, Debug)]
pub struct FilterArgs {
    /// Query to compile
    #[arg(required_unless_present = "from_xml")]
    pub query: Option<String>,

    /// Print the canonical XML form
    #[arg(long)]
    pub xml: bool,

    /// Read filter XML instead of a query
    #[arg(long, conflicts_with = "query")]
    pub from_xml: Option<String>,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Create an example configuration file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "suite-runner.yaml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Show environment variable configuration instead
        #[arg(short, long)]
        env: bool,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Validate a configuration file
    Validate {
        /// Config file to validate
        file: Option<PathBuf>,
    },
}
