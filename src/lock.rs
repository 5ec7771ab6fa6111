//! Process-wide deployment lock
//!
//! A single advisory file lock scoped to the working directory serializes
//! entire deployment runs. The per-host lock is separate and acquired on
//! the agent side during bootstrap.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::ConvoyResult;
use crate::output::{OutputSink, Style};

/// Relative path of the lock file inside the working directory.
pub const LOCK_FILE: &str = ".convoy-lock";

/// Identity of this run: operator, pid and wall-clock time.
pub fn self_id() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    format!(
        "convoy {} ({}, pid {}, {})",
        env!("CARGO_PKG_VERSION"),
        user,
        std::process::id(),
        chrono::Local::now().to_rfc3339(),
    )
}

/// Held advisory lock. Released on drop.
pub struct DeployLock {
    file: File,
    path: PathBuf,
}

impl DeployLock {
    /// Acquire the lock, blocking (with operator feedback) when another
    /// run holds it. The holder's id is written into the lock file.
    pub fn acquire(path: &Path, output: &dyn OutputSink) -> ConvoyResult<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        if file.try_lock_exclusive().is_err() {
            output.step(
                "main",
                "Waiting for deployment lock ...",
                Style::bold(),
            );
            file.lock_exclusive()?;
        }

        file.set_len(0)?;
        writeln!(file, "{}", self_id())?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DeployLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
