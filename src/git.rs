//! Local version-control operations
//!
//! The [`WorkingCopy`] trait is the seam between the monitor loop and the
//! `git` command set (fetch, rebase, push, log), mirroring the platform
//! seam. [`GitRepo`] drives a real working copy via subprocess.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::RebaseResult;

/// Operations the monitor needs from the local working copy
#[async_trait]
pub trait WorkingCopy: Send + Sync {
    /// Fetch the given remote
    async fn fetch(&self, remote: &str) -> Result<()>;

    /// Rebase the current branch onto `<remote>/<target>` and force-push it.
    ///
    /// Returns a rich result rather than raising: `conflict` is set only for
    /// content conflicts, which are terminal for the PR.
    async fn rebase_onto(&self, remote: &str, target: &str) -> RebaseResult;

    /// Committer time of the most recent commit on `<remote>/<branch>`
    async fn last_commit_time(&self, remote: &str, branch: &str) -> Result<DateTime<Utc>>;
}

/// Output of one git invocation, with failure folded into a flag
struct GitOutput {
    ok: bool,
    stdout: String,
    stderr: String,
}

impl GitOutput {
    fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// A git working copy driven via subprocess
pub struct GitRepo {
    root: PathBuf,
    command_timeout: Duration,
}

impl GitRepo {
    /// Open the working copy containing `path`
    pub fn open(path: &Path, command_timeout: Duration) -> Result<Self> {
        let output = std::process::Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(path)
            .output()
            .map_err(|e| Error::Git(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            return Err(Error::Git(format!(
                "{} is not inside a git working copy",
                path.display()
            )));
        }

        let root = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        Ok(Self {
            root,
            command_timeout,
        })
    }

    /// Root of the working copy
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// URL of the given remote
    pub fn remote_url(&self, remote: &str) -> Result<String> {
        let output = std::process::Command::new("git")
            .args(["remote", "get-url", remote])
            .current_dir(&self.root)
            .output()
            .map_err(|e| Error::Git(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            return Err(Error::Git(format!(
                "remote '{remote}' not found: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn run_git(&self, args: &[&str]) -> GitOutput {
        debug!(?args, "running git");
        let command = tokio::process::Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output();

        match tokio::time::timeout(self.command_timeout, command).await {
            Ok(Ok(output)) => GitOutput {
                ok: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Ok(Err(e)) => GitOutput {
                ok: false,
                stdout: String::new(),
                stderr: format!("failed to run git: {e}"),
            },
            Err(_) => GitOutput {
                ok: false,
                stdout: String::new(),
                stderr: format!(
                    "git {} timed out after {}s",
                    args.first().unwrap_or(&""),
                    self.command_timeout.as_secs()
                ),
            },
        }
    }
}

/// Whether rebase output reports a content conflict
fn is_conflict_output(text: &str) -> bool {
    text.contains("CONFLICT") || text.contains("could not apply") || text.contains("Merge conflict")
}

#[async_trait]
impl WorkingCopy for GitRepo {
    async fn fetch(&self, remote: &str) -> Result<()> {
        let output = self.run_git(&["fetch", remote]).await;
        if output.ok {
            Ok(())
        } else {
            Err(Error::Git(format!("git fetch failed: {}", output.combined())))
        }
    }

    async fn rebase_onto(&self, remote: &str, target: &str) -> RebaseResult {
        let fetch = self.run_git(&["fetch", remote, target]).await;
        if !fetch.ok {
            return RebaseResult::failed(format!("fetch before rebase failed: {}", fetch.combined()));
        }

        let upstream = format!("{remote}/{target}");
        let rebase = self.run_git(&["rebase", &upstream]).await;
        if !rebase.ok {
            let text = rebase.combined();
            let abort = self.run_git(&["rebase", "--abort"]).await;
            if !abort.ok {
                warn!("rebase --abort failed: {}", abort.combined());
            }
            if is_conflict_output(&text) {
                return RebaseResult::conflict(text);
            }
            return RebaseResult::failed(text);
        }

        let push = self
            .run_git(&["push", "--force-with-lease", remote, "HEAD"])
            .await;
        if !push.ok {
            return RebaseResult::failed(format!("rebased but push failed: {}", push.combined()));
        }

        RebaseResult::ok()
    }

    async fn last_commit_time(&self, remote: &str, branch: &str) -> Result<DateTime<Utc>> {
        let rref = format!("{remote}/{branch}");
        let output = self.run_git(&["log", "-1", "--format=%ct", &rref]).await;
        if !output.ok {
            return Err(Error::Git(format!(
                "git log {rref} failed: {}",
                output.combined()
            )));
        }

        let epoch: i64 = output
            .stdout
            .trim()
            .parse()
            .map_err(|e| Error::Git(format!("unparseable commit time from {rref}: {e}")))?;
        DateTime::from_timestamp(epoch, 0)
            .ok_or_else(|| Error::Git(format!("commit time out of range: {epoch}")))
    }
}

/// Resolve the repository's git common directory from `start`.
///
/// In a linked worktree `--git-common-dir` points back into the main working
/// copy, so state stored under it is visible from every worktree of the
/// repository.
pub fn resolve_git_common_dir(start: &Path) -> Result<PathBuf> {
    let output = std::process::Command::new("git")
        .args(["rev-parse", "--git-common-dir"])
        .current_dir(start)
        .output()
        .map_err(|e| Error::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        return Err(Error::Git(format!(
            "{} is not inside a git working copy",
            start.display()
        )));
    }

    let raw = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
    let dir = if raw.is_absolute() {
        raw
    } else {
        start.join(raw)
    };
    Ok(std::fs::canonicalize(&dir).unwrap_or(dir))
}
