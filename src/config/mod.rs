//! Configuration module
//!
//! Run settings layered from defaults, a config file, `SUITE_RUNNER_*`
//! environment variables and command-line flags, in increasing precedence.

mod env;
mod file;

pub use env::{print_env_help, EnvConfig};
pub use file::ConfigFile;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::filter;
use crate::output::OutputFormat;
use crate::utils::LogLevel;

/// Settings for one run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Worker pool size; 0 or 1 runs sequentially
    pub workers: usize,

    /// Stop starting new tests after the first failure
    pub stop_on_error: bool,

    /// Default selection query
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub culture: Option<String>,

    /// Seed for node ids and per-test randomizers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub random_seed: Option<u64>,

    /// Stop starting new tests after this many seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Output format (table, tree, json, json-pretty, csv, summary)
    pub format: String,

    pub log_level: LogLevel,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            stop_on_error: false,
            where_clause: None,
            culture: None,
            random_seed: None,
            timeout_secs: None,
            format: "table".to_string(),
            log_level: LogLevel::Info,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if OutputFormat::parse(&self.format).is_none() {
            anyhow::bail!(
                "Unknown output format '{}'. Valid formats: {}",
                self.format,
                OutputFormat::NAMES.join(", ")
            );
        }
        if let Some(query) = &self.where_clause {
            filter::compile(query).with_context(|| format!("Invalid where clause: {query}"))?;
        }
        if self.timeout_secs == Some(0) {
            anyhow::bail!("Timeout must be at least one second");
        }
        Ok(())
    }

    /// Override settings with any values present in the environment
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(workers) = env.workers {
            self.workers = workers;
        }
        if let Some(stop) = env.stop_on_error {
            self.stop_on_error = stop;
        }
        if let Some(query) = &env.where_clause {
            self.where_clause = Some(query.clone());
        }
        if let Some(culture) = &env.culture {
            self.culture = Some(culture.clone());
        }
        if let Some(seed) = env.seed {
            self.random_seed = Some(seed);
        }
        if let Some(timeout) = env.timeout {
            self.timeout_secs = Some(timeout);
        }
        if let Some(format) = &env.format {
            self.format = format.clone();
        }
        if let Some(level) = env.log_level {
            self.log_level = level;
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat::parse(&self.format).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunConfig::default();
        assert_eq!(config.workers, 0);
        assert_eq!(config.format, "table");
        assert!(config.timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_format = RunConfig {
            format: "xml".to_string(),
            ..RunConfig::default()
        };
        assert!(bad_format.validate().is_err());

        let bad_query = RunConfig {
            where_clause: Some("cat == (".to_string()),
            ..RunConfig::default()
        };
        let err = bad_query.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid where clause"));
    }

    #[test]
    fn test_apply_env_overrides() {
        let mut config = RunConfig::default();
        let env = EnvConfig {
            workers: Some(4),
            where_clause: Some("cat == Fast".to_string()),
            timeout: Some(30),
            log_level: Some(LogLevel::Debug),
            ..EnvConfig::default()
        };
        config.apply_env(&env);

        assert_eq!(config.workers, 4);
        assert_eq!(config.where_clause.as_deref(), Some("cat == Fast"));
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(!config.stop_on_error);
    }

    #[test]
    fn test_where_field_name() {
        let config: RunConfig = serde_yaml::from_str("where: cat == Fast\nworkers: 2\n").unwrap();
        assert_eq!(config.where_clause.as_deref(), Some("cat == Fast"));
        assert_eq!(config.workers, 2);
        assert_eq!(config.format, "table");
    }
}
