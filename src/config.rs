//! Harness configuration.
//!
//! Read as JSON from a file given on the command line, or from the
//! `LTP_HARNESS_CONFIG` environment variable. Every field has a default, so
//! the harness also runs without any configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::invocation::{EnvSettings, TestCase};
use crate::sandbox::DEFAULT_SANDBOX_BASE;

/// Environment variable holding inline JSON configuration.
pub const CONFIG_ENV: &str = "LTP_HARNESS_CONFIG";

/// Top-level configuration for the harness.
#[derive(Debug, Clone, Deserialize)]
pub struct HarnessConfig {
    /// Install root override. Defaults to the harness executable's directory.
    #[serde(default)]
    pub install_root: Option<PathBuf>,

    /// Directory sandboxes are created in.
    #[serde(default = "default_sandbox_base")]
    pub sandbox_base: PathBuf,

    /// Placed ahead of the LTP binary directory in the child's `PATH`.
    #[serde(default = "default_system_bin_dir")]
    pub system_bin_dir: String,

    /// Value of `LTP_DEV_FS_TYPE` in the child.
    #[serde(default = "default_fs_type")]
    pub fs_type: String,

    /// Per-case time limit. Unset means wait forever.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    /// Test suites, keyed by suite name.
    #[serde(default)]
    pub suites: BTreeMap<String, Vec<TestCase>>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            install_root: None,
            sandbox_base: default_sandbox_base(),
            system_bin_dir: default_system_bin_dir(),
            fs_type: default_fs_type(),
            timeout_seconds: None,
            suites: BTreeMap::new(),
        }
    }
}

fn default_sandbox_base() -> PathBuf {
    DEFAULT_SANDBOX_BASE.into()
}

fn default_system_bin_dir() -> String {
    "/system/bin".into()
}

fn default_fs_type() -> String {
    "ext4".into()
}

impl HarnessConfig {
    /// Load from `path` if given, else from `LTP_HARNESS_CONFIG`, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            debug!(path = %path.display(), "Loading configuration file");
            return Self::from_json(&json)
                .with_context(|| format!("Failed to parse config {}", path.display()));
        }

        match std::env::var(CONFIG_ENV) {
            Ok(json) => Self::from_json(&json).context("Failed to parse LTP_HARNESS_CONFIG"),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        Ok(config)
    }

    pub fn env_settings(&self) -> EnvSettings {
        EnvSettings {
            system_bin_dir: self.system_bin_dir.clone(),
            fs_type: self.fs_type.clone(),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }

    /// Look up a suite by name.
    pub fn suite(&self, name: &str) -> Result<&[TestCase]> {
        self.suites.get(name).map(Vec::as_slice).ok_or_else(|| {
            let available: Vec<_> = self.suites.keys().collect();
            anyhow::anyhow!("Unknown suite: '{name}'. Available: {available:?}")
        })
    }
}
