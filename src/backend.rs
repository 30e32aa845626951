//! Launch backends.
//!
//! A backend starts one prepared LTP binary and waits for it to finish.
//! The runner only sees the exit status, so tests can swap in a backend
//! that never spawns anything.

mod process;

pub use process::{ProcessLauncher, Timeout};

use anyhow::Result;
use async_trait::async_trait;

use crate::invocation::PreparedCommand;
use crate::outcome::ExecutionResult;

/// Trait for process launchers.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Run `cmd` to completion.
    ///
    /// Returns an error when the binary could not be started at all
    /// (missing file, bad working directory, exec failure) or when it
    /// exceeded the configured timeout.
    async fn launch(&self, cmd: &PreparedCommand) -> Result<ExecutionResult>;
}
