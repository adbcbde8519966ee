//! suite-runner - select and run unit test suites
//!
//! A CLI over the selection and scheduling engines. Test trees come from
//! YAML or JSON manifests whose tests replay scripted outcomes.
//!
//! ## Usage
//!
//! ```bash
//! # Run everything in a manifest
//! suite-runner run tests.yaml
//!
//! # Run a selection on four workers, stopping at the first failure
//! suite-runner run tests.yaml --where "cat == Fast && !(test =~ Legacy)" -j 4 --stop-on-error
//!
//! # Show what a query selects
//! suite-runner list tests.yaml --where "cat != Slow" --detailed
//!
//! # Print the canonical XML form of a query
//! suite-runner filter "cat == Urgent && test == 'My.Tests'" --xml
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

mod cli;

use cli::{Args, Command, ConfigAction};
use suite_runner::config::{print_env_help, ConfigFile, EnvConfig, RunConfig};
use suite_runner::discovery::{Manifest, TestTreeFactory};
use suite_runner::executor::TestRunner;
use suite_runner::filter::{self, TestFilter};
use suite_runner::models::{IdGenerator, TestStatus};
use suite_runner::output::{write_report_to_file, ResultFormatter};
use suite_runner::utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env = EnvConfig::load();

    let config_path = args
        .config
        .clone()
        .or_else(|| env.config_file.as_ref().map(Into::into));
    let mut config = match &config_path {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::load_default()?,
    }
    .run;
    config.apply_env(&env);

    let level = if args.verbose {
        LogLevel::Debug
    } else {
        config.log_level
    };
    init_logger(level);

    match args.command {
        Command::Run(run_args) => {
            run_args.apply_to(&mut config);
            let failed = run_tests(
                &run_args.manifest,
                &config,
                run_args.output.as_deref(),
                run_args.no_color,
            )
            .await?;
            if failed {
                std::process::exit(1);
            }
        }
        Command::List(list_args) => {
            if let Some(query) = &list_args.where_clause {
                config.where_clause = Some(query.clone());
            }
            list_tests(&list_args.manifest, &config, list_args.detailed)?;
        }
        Command::Filter(filter_args) => {
            show_filter(filter_args)?;
        }
        Command::Config(config_args) => {
            manage_config(config_args, &config)?;
        }
    }

    Ok(())
}

/// Compile the configured where clause; a malformed query aborts before any test runs
fn selection(config: &RunConfig) -> Result<TestFilter> {
    match &config.where_clause {
        Some(query) => {
            filter::compile(query).with_context(|| format!("Invalid where clause: {query}"))
        }
        None => Ok(TestFilter::Empty),
    }
}

fn load_tree(
    manifest_path: &Path,
    config: &RunConfig,
) -> Result<(Manifest, Arc<suite_runner::models::TestNode>)> {
    let manifest = Manifest::load(manifest_path)?;
    let seed = config
        .random_seed
        .or(manifest.seed)
        .unwrap_or_else(rand::random);
    let tree = manifest.build(&mut IdGenerator::new(seed))?;
    info!(
        "Discovered {} test cases in {} (seed {})",
        tree.test_case_count(),
        manifest_path.display(),
        seed
    );
    Ok((manifest, tree))
}

/// Returns true when the run's root result failed
async fn run_tests(
    manifest_path: &Path,
    config: &RunConfig,
    output: Option<&Path>,
    no_color: bool,
) -> Result<bool> {
    config.validate()?;
    let filter = selection(config)?;
    let (manifest, tree) = load_tree(manifest_path, config)?;

    let mut runner = TestRunner::new(Arc::new(manifest.invoker()))
        .with_workers(config.workers)
        .with_stop_on_error(config.stop_on_error);
    if let Some(timeout) = config.timeout() {
        runner = runner.with_timeout(timeout);
    }
    if let Some(culture) = &config.culture {
        runner = runner.with_culture(culture.clone());
    }

    let report = runner.run(&tree, filter).await?;
    if report.cancelled {
        warn!("Run stopped early; {} tests cancelled", report.summary.cancelled);
    }

    let format = config.output_format();
    let mut formatter = ResultFormatter::new(format);
    if no_color {
        formatter = formatter.no_color();
    }
    println!("{}", formatter.format_report(&report));

    if let Some(path) = output {
        write_report_to_file(path, &report, format)?;
        info!("Report written to {}", path.display());
    }

    Ok(report.result.status() == TestStatus::Failed)
}

fn list_tests(manifest_path: &Path, config: &RunConfig, detailed: bool) -> Result<()> {
    let filter = selection(config)?;
    let (_, tree) = load_tree(manifest_path, config)?;
    let selected = filter.selected_test_cases(&tree);

    println!(
        "\n{} ({} of {} test cases selected)",
        tree.full_name(),
        selected.len(),
        tree.test_case_count()
    );
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    print!(
        "{}",
        ResultFormatter::default().format_tests(&tree, &filter, detailed)
    );
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    Ok(())
}

fn show_filter(args: cli::FilterArgs) -> Result<()> {
    let compiled = match (&args.from_xml, &args.query) {
        (Some(xml), _) => filter::from_xml(xml).context("Invalid filter XML")?,
        (None, Some(query)) => filter::compile(query)?,
        (None, None) => anyhow::bail!("Provide a query or --from-xml"),
    };

    if args.xml {
        println!("{}", filter::to_xml(&compiled));
    } else {
        println!("{compiled}");
    }
    Ok(())
}

fn manage_config(args: cli::ConfigArgs, effective: &RunConfig) -> Result<()> {
    match args.action {
        ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }

            ConfigFile::example().save(&output)?;
            println!("✓ Configuration file created: {}", output.display());
            println!("\nEdit the file to customize your settings.");
        }

        ConfigAction::Show { env, format } => {
            if env {
                EnvConfig::load().print_summary();
                println!();
                print_env_help();
            } else {
                let config = ConfigFile {
                    run: effective.clone(),
                    ..ConfigFile::default()
                };
                let output = if format == "json" {
                    serde_json::to_string_pretty(&config)?
                } else {
                    serde_yaml::to_string(&config)?
                };
                println!("{output}");
            }
        }

        ConfigAction::Validate { file } => {
            let path = file
                .or_else(ConfigFile::find)
                .unwrap_or_else(|| "./suite-runner.yaml".into());

            match ConfigFile::load(&path) {
                Ok(_) => println!("✓ Configuration file is valid: {}", path.display()),
                Err(e) => {
                    println!("✗ Configuration file is invalid: {}", path.display());
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}
