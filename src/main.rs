//! ltp-harness
//!
//! Runs LTP test binaries one by one, each inside a fresh sandbox directory,
//! and reports pass/fail/skip per test case.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ltp_harness::backend::ProcessLauncher;
use ltp_harness::capacity::{self, CapStates, CapacityGroup};
use ltp_harness::config::HarnessConfig;
use ltp_harness::invocation::TestCase;
use ltp_harness::runner::{Filter, SuiteReport, TestRunner};

#[derive(Parser, Debug)]
#[command(name = "ltp-harness")]
#[command(about = "Run Linux Test Project binaries in disposable sandboxes")]
struct Args {
    /// JSON configuration file (falls back to LTP_HARNESS_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run suites from the configuration
    Run {
        /// Only run this suite
        #[arg(long)]
        suite: Option<String>,

        /// Comma separated substrings matched against `suite.case`
        #[arg(long, default_value = "")]
        filter: String,
    },
    /// Run a single LTP binary
    Exec {
        /// Binary name under testcases/bin
        binary: String,

        /// Extra arguments; `$LTPROOT` is expanded
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// List configured test cases
    List,
    /// Print CPUs grouped by energy-model capacity
    Capacity {
        /// Print the CPUs that are not in the smallest-capacity group
        #[arg(long)]
        others: bool,

        /// Number of CPUs to inspect (default: online CPUs)
        #[arg(long)]
        ncpus: Option<usize>,
    },
    /// Keep a CPU busy for a while, optionally pinned to one CPU
    Burn {
        /// Busy time in microseconds
        usec: u64,

        /// Pin to this CPU first
        #[arg(long)]
        cpu: Option<usize>,

        /// Sleep 1ms between clock checks instead of spinning
        #[arg(long)]
        sleep: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Aborting test run");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every executed case passed or was skipped.
async fn run(args: Args) -> Result<bool> {
    let config = HarnessConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    match args.command {
        Command::Run { suite, filter } => {
            let runner = runner(config.clone());
            let filter = Filter::parse(&filter);
            let selected: Vec<_> = match &suite {
                Some(name) => vec![(name.as_str(), config.suite(name)?)],
                None => config
                    .suites
                    .iter()
                    .map(|(name, cases)| (name.as_str(), cases.as_slice()))
                    .collect(),
            };
            if selected.is_empty() {
                warn!("No suites configured");
            }

            let mut report = SuiteReport::default();
            for (name, cases) in selected {
                report.merge(runner.run_suite(name, cases, &filter).await?);
            }
            Ok(summarize(&report))
        }
        Command::Exec { binary, args } => {
            let runner = runner(config);
            let case = TestCase::new(binary).with_args(args);
            let report = runner
                .run_suite("exec", std::slice::from_ref(&case), &Filter::default())
                .await?;
            Ok(summarize(&report))
        }
        Command::List => {
            for (suite, cases) in &config.suites {
                println!("{suite}.");
                for case in cases {
                    println!("  {}", case.name);
                }
            }
            Ok(true)
        }
        Command::Capacity { others, ncpus } => {
            let group = if others {
                CapacityGroup::Others
            } else {
                CapacityGroup::Smallest
            };
            let ncpus = ncpus.unwrap_or_else(capacity::online_cpus);
            let cpus = CapStates::default()
                .find_cpus_with_capacity(ncpus, group)
                .context("Failed to classify CPUs by capacity")?;
            let list: Vec<String> = cpus.iter().map(ToString::to_string).collect();
            println!("{}", list.join(","));
            Ok(true)
        }
        Command::Burn { usec, cpu, sleep } => {
            if let Some(cpu) = cpu {
                capacity::affine(cpu)?;
            }
            capacity::burn(Duration::from_micros(usec), sleep);
            Ok(true)
        }
    }
}

fn runner(config: HarnessConfig) -> TestRunner<ProcessLauncher> {
    let launcher = ProcessLauncher::new().with_timeout(config.timeout());
    TestRunner::new(Arc::new(config), launcher)
}

fn summarize(report: &SuiteReport) -> bool {
    info!(
        total = report.total(),
        passed = report.passed.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Test run finished"
    );
    for (name, reason) in &report.failed {
        error!("[  FAILED  ] {name} ({reason})");
    }
    report.success()
}
