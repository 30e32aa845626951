//! Mapping child exit status to a test result.

use std::fmt;

/// Exit codes with a reserved meaning in LTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LtpExit {
    /// `TPASS`
    Passed = 0,
    /// `TCONF`: the test does not apply to this configuration.
    NotConfigured = 32,
}

impl LtpExit {
    pub const fn from_code(code: i32) -> Option<Self> {
        if code == Self::Passed.code() {
            Some(Self::Passed)
        } else if code == Self::NotConfigured.code() {
            Some(Self::NotConfigured)
        } else {
            None
        }
    }

    pub const fn code(self) -> i32 {
        self as i32
    }
}

/// How the child process ended, as reported by the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Exit code if the process exited normally.
    pub exit_code: Option<i32>,
    /// Terminating signal if it was killed.
    pub signal: Option<i32>,
}

impl ExecutionResult {
    pub const fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            signal: None,
        }
    }

    pub const fn signaled(signal: i32) -> Self {
        Self {
            exit_code: None,
            signal: Some(signal),
        }
    }
}

/// Why a test case failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    ExitCode(i32),
    Signal(i32),
    /// The binary could not be started.
    Launch(String),
    TimedOut(u64),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExitCode(code) => write!(f, "exit status {code}"),
            Self::Signal(sig) => write!(f, "killed by signal {sig}"),
            Self::Launch(msg) => write!(f, "launch failed: {msg}"),
            Self::TimedOut(secs) => write!(f, "timed out after {secs}s"),
        }
    }
}

/// Result of one test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Pass,
    Fail(FailureReason),
    Skip { reason: String },
}

impl TestOutcome {
    pub const NOT_CONFIGURED: &'static str = "not configured";

    pub fn from_execution(result: ExecutionResult) -> Self {
        match (result.exit_code, result.signal) {
            (Some(code), _) => match LtpExit::from_code(code) {
                Some(LtpExit::Passed) => Self::Pass,
                Some(LtpExit::NotConfigured) => Self::Skip {
                    reason: Self::NOT_CONFIGURED.to_string(),
                },
                None => Self::Fail(FailureReason::ExitCode(code)),
            },
            (None, Some(sig)) => Self::Fail(FailureReason::Signal(sig)),
            (None, None) => Self::Fail(FailureReason::ExitCode(-1)),
        }
    }
}
