//! Source repository
//!
//! The orchestrator needs two things from the repository: that the local
//! working copy is fit to deploy, and a way to bring a host's remote copy
//! up to date. Both sit behind a port so deployments can be driven without
//! touching git or the network.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::error::{ConvoyError, ConvoyResult};
use crate::output::{OutputSink, Style};

/// Port for repository verification and per-host synchronization.
pub trait RepositorySource {
    /// Check the local working copy before any host is touched.
    fn verify(&self, output: &dyn OutputSink) -> ConvoyResult<()>;

    /// Bring `fqdn`'s copy at `remote_path` up to date with the local tree.
    fn update(&self, fqdn: &str, remote_path: &str, output: &dyn OutputSink) -> ConvoyResult<()>;
}

/// Production implementation: a git working copy pushed with rsync.
pub struct GitRsyncRepository {
    root: PathBuf,
    dirty: bool,
    fast: bool,
}

impl GitRsyncRepository {
    pub fn new(root: PathBuf, dirty: bool, fast: bool) -> Self {
        Self { root, dirty, fast }
    }

    pub fn from_cwd(dirty: bool, fast: bool) -> ConvoyResult<Self> {
        Ok(Self::new(std::env::current_dir()?, dirty, fast))
    }
}

impl RepositorySource for GitRsyncRepository {
    fn verify(&self, output: &dyn OutputSink) -> ConvoyResult<()> {
        if self.fast {
            output.annotate("Skipping repository verification (fast mode)", Style::debug());
            return Ok(());
        }

        let status = Command::new("git")
            .arg("status")
            .arg("--porcelain")
            .current_dir(&self.root)
            .stderr(Stdio::null())
            .output()
            .map_err(|e| ConvoyError::Repository(format!("running git status: {}", e)))?;

        if !status.status.success() {
            return Err(ConvoyError::Repository(format!(
                "{} is not a usable git working copy",
                self.root.display()
            )));
        }

        if !self.dirty && !status.stdout.is_empty() {
            return Err(ConvoyError::Repository(
                "working copy has uncommitted changes (deploy with --dirty to override)"
                    .to_string(),
            ));
        }

        Ok(())
    }

    fn update(&self, fqdn: &str, remote_path: &str, output: &dyn OutputSink) -> ConvoyResult<()> {
        if self.fast {
            output.annotate("Skipping repository update (fast mode)", Style::debug());
            return Ok(());
        }

        let destination = format!("{}:{}/", fqdn, remote_path.trim_end_matches('/'));

        // Trailing slash on the source: copy contents, not the directory.
        let status = Command::new("rsync")
            .arg("-az")
            .arg("--delete")
            .arg("-e")
            .arg("ssh")
            .arg(format!("{}/", self.root.display()))
            .arg(&destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .map_err(|e| ConvoyError::Repository(format!("running rsync: {}", e)))?;

        if !status.success() {
            return Err(ConvoyError::Repository(format!(
                "rsync to {} failed with exit code {:?}",
                destination,
                status.code()
            )));
        }

        Ok(())
    }
}
