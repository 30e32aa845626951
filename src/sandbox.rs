//! Disposable sandbox directories.
//!
//! Each test case gets a freshly created directory that the child process
//! uses as its working directory and `TMPDIR`. The directory is owned by the
//! [`Sandbox`] value and removed, with everything the test left behind, when
//! the value is dropped.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

/// Base directory used when the configuration does not name one.
pub const DEFAULT_SANDBOX_BASE: &str = "/data/local/tmp";

/// Owner and group get full access; some tests drop to an unprivileged user.
const SANDBOX_MODE: u32 = 0o770;

/// A uniquely named temporary directory, removed recursively on drop.
#[derive(Debug)]
pub struct Sandbox {
    path: PathBuf,
}

impl Sandbox {
    /// Create a new sandbox directory under `base`.
    pub fn create(base: &Path) -> io::Result<Self> {
        let path = tempfile::Builder::new()
            .prefix("ltp-")
            .rand_bytes(6)
            .tempdir_in(base)?
            .keep();

        debug!(path = %path.display(), "Created sandbox");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make the sandbox usable by a test that switched to a group-sharing user.
    pub fn grant_group_access(&self) -> io::Result<()> {
        fs::set_permissions(&self.path, fs::Permissions::from_mode(SANDBOX_MODE))
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        remove_tree(&self.path);
        debug!(path = %self.path.display(), "Removed sandbox");
    }
}

/// Remove `dir` and everything below it, children before parents.
///
/// Symlinks are unlinked, never followed. Errors are ignored so a partially
/// removable tree is cleaned as far as possible.
fn remove_tree(dir: &Path) {
    for entry in WalkDir::new(dir).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "Failed to walk sandbox entry");
                continue;
            }
        };

        let path = entry.path();
        let removed = if entry.file_type().is_dir() {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        };
        if let Err(e) = removed {
            debug!(path = %path.display(), error = %e, "Failed to remove sandbox entry");
        }
    }
}
