//! Building the argument vector and environment for an LTP binary.
//!
//! LTP binaries live under `<install-root>/testcases/bin`. The install root
//! is the directory holding the harness executable unless the configuration
//! overrides it.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Placeholder in extra arguments that expands to the install root.
pub const LTPROOT_VAR: &str = "$LTPROOT";

/// Longest path or `KEY=VALUE` entry accepted, including the terminator.
pub const PATH_MAX: usize = 4096;

/// Errors while turning a [`TestCase`] into a runnable command.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("cannot resolve install root: {0}")]
    InstallRoot(#[source] std::io::Error),

    #[error("{what} is {len} bytes, limit is {limit}")]
    TooLong {
        what: &'static str,
        len: usize,
        limit: usize,
    },

    #[error("{0} is not valid UTF-8")]
    NonUtf8(&'static str),
}

/// One test case: a binary under `testcases/bin` plus extra arguments.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TestCase {
    /// Test name as reported in results.
    pub name: String,

    /// Binary to run. Defaults to `name`.
    #[serde(default)]
    pub binary: Option<String>,

    /// Extra arguments; `$LTPROOT` is expanded.
    #[serde(default)]
    pub args: Vec<String>,
}

impl TestCase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binary: None,
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn binary(&self) -> &str {
        self.binary.as_deref().unwrap_or(&self.name)
    }
}

/// Directory the LTP tree is installed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRoot(String);

impl InstallRoot {
    /// Use `configured` if set, otherwise the directory of the running executable.
    pub fn resolve(configured: Option<&Path>) -> Result<Self, InvocationError> {
        let root = match configured {
            Some(path) => path.to_path_buf(),
            None => {
                let exe = std::env::current_exe().map_err(InvocationError::InstallRoot)?;
                exe.parent().map(Path::to_path_buf).ok_or_else(|| {
                    InvocationError::InstallRoot(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "executable has no parent directory",
                    ))
                })?
            }
        };

        root.into_os_string()
            .into_string()
            .map(Self)
            .map_err(|_| InvocationError::NonUtf8("install root"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn bin_dir(&self) -> PathBuf {
        Path::new(&self.0).join("testcases/bin")
    }
}

/// Finds the executable for a test binary name.
#[derive(Debug, Clone)]
pub struct BinaryResolver {
    bin_dir: PathBuf,
}

impl BinaryResolver {
    pub const fn new(bin_dir: PathBuf) -> Self {
        Self { bin_dir }
    }

    /// Paths to try, in order.
    ///
    /// Test names use underscores where some binaries use hyphens, so a name
    /// containing `_` also yields its hyphenated form.
    pub fn candidates(&self, name: &str) -> Vec<PathBuf> {
        let mut paths = vec![self.bin_dir.join(name)];
        if name.contains('_') {
            paths.push(self.bin_dir.join(name.replace('_', "-")));
        }
        paths
    }

    /// First candidate that exists, else the last one tried.
    pub fn resolve(&self, name: &str) -> PathBuf {
        let mut candidates = self.candidates(name);
        match candidates.iter().position(|p| p.exists()) {
            Some(i) => candidates.swap_remove(i),
            // candidates() always yields at least the literal path
            None => candidates.pop().unwrap_or_else(|| self.bin_dir.join(name)),
        }
    }
}

/// Replace every `$LTPROOT` in each argument.
pub fn expand_args(args: &[String], root: &InstallRoot) -> Vec<String> {
    args.iter()
        .map(|arg| arg.replace(LTPROOT_VAR, root.as_str()))
        .collect()
}

/// Settings for the child environment that do not depend on the case.
#[derive(Debug, Clone)]
pub struct EnvSettings {
    pub system_bin_dir: String,
    pub fs_type: String,
}

/// The complete, ordered environment handed to the child.
pub fn child_environment(
    sandbox: &str,
    root: &InstallRoot,
    settings: &EnvSettings,
) -> Result<Vec<(String, String)>, InvocationError> {
    let bin_dir = root.bin_dir();
    let bin_dir = bin_dir
        .to_str()
        .ok_or(InvocationError::NonUtf8("binary directory"))?;

    let env = vec![
        ("TMPDIR".to_string(), sandbox.to_string()),
        ("TMP".to_string(), sandbox.to_string()),
        ("LTPROOT".to_string(), root.as_str().to_string()),
        (
            "PATH".to_string(),
            format!("{}:{bin_dir}", settings.system_bin_dir),
        ),
        ("LTP_DEV_FS_TYPE".to_string(), settings.fs_type.clone()),
    ];

    for (key, value) in &env {
        check_len("environment entry", key.len() + 1 + value.len())?;
    }
    Ok(env)
}

/// Everything needed to start one test binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCommand {
    /// Full path, also used as argv[0].
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: PathBuf,
}

impl PreparedCommand {
    pub fn prepare(
        case: &TestCase,
        root: &InstallRoot,
        sandbox: &Path,
        settings: &EnvSettings,
    ) -> Result<Self, InvocationError> {
        let program = BinaryResolver::new(root.bin_dir()).resolve(case.binary());
        check_len("binary path", program.as_os_str().len())?;

        let sandbox_str = sandbox
            .to_str()
            .ok_or(InvocationError::NonUtf8("sandbox path"))?;

        Ok(Self {
            program,
            args: expand_args(&case.args, root),
            env: child_environment(sandbox_str, root, settings)?,
            working_dir: sandbox.to_path_buf(),
        })
    }
}

const fn check_len(what: &'static str, len: usize) -> Result<(), InvocationError> {
    if len >= PATH_MAX {
        return Err(InvocationError::TooLong {
            what,
            len,
            limit: PATH_MAX - 1,
        });
    }
    Ok(())
}
