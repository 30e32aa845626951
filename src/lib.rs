//! ltp-harness library
//!
//! Runs Linux Test Project binaries as black-box subprocesses:
//! - Disposable sandbox directories, one per test case
//! - Argument and environment construction for the LTP install layout
//! - Exit status to pass/fail/skip mapping
//! - CPU capacity classification for the EAS scheduler tests

pub mod backend;
pub mod capacity;
pub mod config;
pub mod invocation;
pub mod outcome;
pub mod runner;
pub mod sandbox;
