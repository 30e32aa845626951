//! Test case orchestration.
//!
//! Every case runs in its own sandbox: the directory is created, opened up
//! for group access, used as the child's working directory and removed once
//! the child has exited. Cases run one after another.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::backend::Launcher;
use crate::config::HarnessConfig;
use crate::invocation::{InstallRoot, PreparedCommand, TestCase};
use crate::outcome::{FailureReason, TestOutcome};
use crate::sandbox::Sandbox;

/// Errors that abort the whole run rather than failing one case.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to create sandbox under {base}: {source}")]
    CreateSandbox {
        base: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set permissions on sandbox {path}: {source}")]
    SandboxPermissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Selects test cases by `suite.name` substring.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    patterns: Vec<String>,
}

impl Filter {
    /// Parse a comma separated pattern list. Empty input selects everything.
    pub fn parse(patterns: &str) -> Self {
        Self {
            patterns: patterns
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect(),
        }
    }

    pub fn matches(&self, full_name: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| full_name.contains(p))
    }
}

/// Results of running one suite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuiteReport {
    pub passed: Vec<String>,
    pub failed: Vec<(String, FailureReason)>,
    pub skipped: Vec<String>,
}

impl SuiteReport {
    pub fn record(&mut self, name: String, outcome: TestOutcome) {
        match outcome {
            TestOutcome::Pass => self.passed.push(name),
            TestOutcome::Fail(reason) => self.failed.push((name, reason)),
            TestOutcome::Skip { .. } => self.skipped.push(name),
        }
    }

    pub fn merge(&mut self, other: Self) {
        self.passed.extend(other.passed);
        self.failed.extend(other.failed);
        self.skipped.extend(other.skipped);
    }

    pub fn total(&self) -> usize {
        self.passed.len() + self.failed.len() + self.skipped.len()
    }

    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs LTP test cases through a [`Launcher`].
pub struct TestRunner<L> {
    config: Arc<HarnessConfig>,
    launcher: L,
}

impl<L: Launcher> TestRunner<L> {
    pub fn new(config: Arc<HarnessConfig>, launcher: L) -> Self {
        Self { config, launcher }
    }

    /// Run a single case in a fresh sandbox.
    ///
    /// Returns `Err` only for sandbox setup failures; anything that goes wrong
    /// with the binary itself is a failed outcome.
    pub async fn run_case(&self, case: &TestCase) -> Result<TestOutcome, HarnessError> {
        let base = &self.config.sandbox_base;
        let sandbox = Sandbox::create(base).map_err(|source| HarnessError::CreateSandbox {
            base: base.clone(),
            source,
        })?;
        sandbox
            .grant_group_access()
            .map_err(|source| HarnessError::SandboxPermissions {
                path: sandbox.path().to_path_buf(),
                source,
            })?;

        let prepared = InstallRoot::resolve(self.config.install_root.as_deref()).and_then(|root| {
            PreparedCommand::prepare(case, &root, sandbox.path(), &self.config.env_settings())
        });
        let cmd = match prepared {
            Ok(cmd) => cmd,
            Err(e) => {
                error!(case = %case.name, error = %e, "Failed to prepare test binary");
                return Ok(TestOutcome::Fail(FailureReason::Launch(e.to_string())));
            }
        };

        let outcome = match self.launcher.launch(&cmd).await {
            Ok(result) => TestOutcome::from_execution(result),
            Err(e) => {
                error!(case = %case.name, error = %format!("{e:#}"), "Test binary did not run");
                match e.downcast_ref::<crate::backend::Timeout>() {
                    Some(t) => TestOutcome::Fail(FailureReason::TimedOut(t.0)),
                    None => TestOutcome::Fail(FailureReason::Launch(format!("{e:#}"))),
                }
            }
        };

        if let TestOutcome::Skip { reason } = &outcome {
            warn!(case = %case.name, reason = %reason, "testcase skipped");
        }
        Ok(outcome)
    }

    /// Run every case of `suite` selected by `filter`, in order.
    pub async fn run_suite(
        &self,
        suite: &str,
        cases: &[TestCase],
        filter: &Filter,
    ) -> Result<SuiteReport, HarnessError> {
        let mut report = SuiteReport::default();

        for case in cases {
            let full_name = format!("{suite}.{}", case.name);
            if !filter.matches(&full_name) {
                continue;
            }

            info!("[ RUN      ] {full_name}");
            let outcome = self.run_case(case).await?;
            match &outcome {
                TestOutcome::Pass => info!("[       OK ] {full_name}"),
                TestOutcome::Skip { .. } => info!("[  SKIPPED ] {full_name}"),
                TestOutcome::Fail(reason) => error!("[  FAILED  ] {full_name} ({reason})"),
            }
            report.record(full_name, outcome);
        }

        info!(
            suite = %suite,
            passed = report.passed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Suite finished"
        );
        Ok(report)
    }
}
