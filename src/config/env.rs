//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

use crate::utils::LogLevel;

/// Environment variable prefix
const ENV_PREFIX: &str = "SUITE_RUNNER";

/// Configuration read from `SUITE_RUNNER_*` variables
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvConfig {
    /// Worker count from SUITE_RUNNER_WORKERS
    pub workers: Option<usize>,
    /// Stop-on-error from SUITE_RUNNER_STOP_ON_ERROR
    pub stop_on_error: Option<bool>,
    /// Selection query from SUITE_RUNNER_WHERE
    pub where_clause: Option<String>,
    /// Culture from SUITE_RUNNER_CULTURE
    pub culture: Option<String>,
    /// Random seed from SUITE_RUNNER_SEED
    pub seed: Option<u64>,
    /// Timeout in seconds from SUITE_RUNNER_TIMEOUT
    pub timeout: Option<u64>,
    /// Output format from SUITE_RUNNER_FORMAT
    pub format: Option<String>,
    /// Log level from SUITE_RUNNER_LOG_LEVEL
    pub log_level: Option<LogLevel>,
    /// Config file from SUITE_RUNNER_CONFIG
    pub config_file: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            workers: get_env_parse("WORKERS"),
            stop_on_error: get_env_bool("STOP_ON_ERROR"),
            where_clause: get_env("WHERE"),
            culture: get_env("CULTURE"),
            seed: get_env_parse("SEED"),
            timeout: get_env_parse("TIMEOUT"),
            format: get_env("FORMAT"),
            log_level: get_env("LOG_LEVEL").and_then(|v| LogLevel::parse(&v)),
            config_file: get_env("CONFIG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        *self != Self::default()
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {ENV_PREFIX}_WORKERS:       {:?}", self.workers);
        println!("  {ENV_PREFIX}_STOP_ON_ERROR: {:?}", self.stop_on_error);
        println!("  {ENV_PREFIX}_WHERE:         {:?}", self.where_clause);
        println!("  {ENV_PREFIX}_CULTURE:       {:?}", self.culture);
        println!("  {ENV_PREFIX}_SEED:          {:?}", self.seed);
        println!("  {ENV_PREFIX}_TIMEOUT:       {:?}", self.timeout);
        println!("  {ENV_PREFIX}_FORMAT:        {:?}", self.format);
        println!("  {ENV_PREFIX}_LOG_LEVEL:     {:?}", self.log_level);
        println!("  {ENV_PREFIX}_CONFIG:        {:?}", self.config_file);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Print all SUITE_RUNNER environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_WORKERS        Worker pool size (0 = sequential)");
    println!("  {ENV_PREFIX}_STOP_ON_ERROR  Stop after the first failure (true/false)");
    println!("  {ENV_PREFIX}_WHERE          Default selection query");
    println!("  {ENV_PREFIX}_CULTURE        Culture for test execution");
    println!("  {ENV_PREFIX}_SEED           Random seed for ids and test randomizers");
    println!("  {ENV_PREFIX}_TIMEOUT        Run timeout in seconds");
    println!("  {ENV_PREFIX}_FORMAT         Output format (table, tree, json, csv, summary)");
    println!("  {ENV_PREFIX}_LOG_LEVEL      Log level (trace, debug, info, warn, error)");
    println!("  {ENV_PREFIX}_CONFIG         Path to configuration file");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_WORKERS=4");
    println!("  export {ENV_PREFIX}_WHERE=\"cat != Slow\"");
    println!("  suite-runner run tests.yaml");
}
