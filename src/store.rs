//! Persistence for monitor progress in `.git/sentinel/`
//!
//! One JSON document per monitored PR, written atomically (temp sibling,
//! fsync, rename) so a concurrent reader always sees either the previous or
//! the new complete document. The file is the only channel through which a
//! second process can inspect a run.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::git::resolve_git_common_dir;
use crate::types::{CheckStatus, MergeState};

/// Directory name for sentinel metadata within the git common dir.
const SENTINEL_DIR: &str = "sentinel";

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Largest accepted PR number.
pub const MAX_PR_NUMBER: u64 = 999_999;

/// Monitor loop phase, persisted for inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Reading the PR's state
    Polling,
    /// Rebasing onto the target branch
    Rebasing,
    /// Waiting for a pending reviewer
    WaitingReview,
    /// Waiting for CI to complete
    WaitingCi,
    /// Waiting for the target branch to stop changing
    WaitingStability,
    /// Attempting the merge
    Merging,
    /// Terminal: merged
    Succeeded,
    /// Terminal: gave up
    Failed,
    /// Terminal: run timeout elapsed
    TimedOut,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Polling => "polling",
            Self::Rebasing => "rebasing",
            Self::WaitingReview => "waiting-review",
            Self::WaitingCi => "waiting-ci",
            Self::WaitingStability => "waiting-stability",
            Self::Merging => "merging",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed-out",
        };
        write!(f, "{name}")
    }
}

/// Persisted progress for one monitored PR
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Schema version for forward-compatible migrations
    pub schema_version: u32,
    /// PR this record belongs to (stamped on every save)
    pub pr_number: u64,
    /// Current loop phase
    pub phase: Phase,
    /// Rebases performed so far
    pub rebase_count: u32,
    /// Merge attempts so far
    pub merge_attempts: u32,
    /// AI-review re-requests so far
    pub review_retries: u32,
    /// When the current review wait began, if one is in progress
    pub review_wait_started_at: Option<DateTime<Utc>>,
    /// When this run started
    pub started_at: DateTime<Utc>,
    /// When this record was last written (stamped on every save)
    pub updated_at: DateTime<Utc>,
    /// Last observed merge state
    pub last_merge_state: Option<MergeState>,
    /// Last observed check status
    pub last_check_status: Option<CheckStatus>,
    /// Last transition message
    pub last_message: Option<String>,
}

impl ProgressRecord {
    /// Fresh record for the start of a run
    pub fn new(pr_number: u64) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            pr_number,
            phase: Phase::Polling,
            rebase_count: 0,
            merge_attempts: 0,
            review_retries: 0,
            review_wait_started_at: None,
            started_at: now,
            updated_at: now,
            last_merge_state: None,
            last_check_status: None,
            last_message: None,
        }
    }
}

/// Validate a caller-supplied PR identifier.
///
/// Accepts canonical positive integers up to [`MAX_PR_NUMBER`]; everything
/// else is rejected before it can reach a path or a remote call.
pub fn validate_pr_number(raw: &str) -> Result<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || !trimmed.chars().all(|c| c.is_ascii_digit())
        || trimmed.starts_with('0')
    {
        return Err(Error::InvalidPrNumber(format!(
            "{trimmed:?} is not a positive integer"
        )));
    }

    let Ok(value) = trimmed.parse::<u64>() else {
        return Err(Error::InvalidPrNumber(format!(
            "{trimmed} is too large (max {MAX_PR_NUMBER})"
        )));
    };
    if value > MAX_PR_NUMBER {
        return Err(Error::InvalidPrNumber(format!(
            "{value} is too large (max {MAX_PR_NUMBER})"
        )));
    }
    Ok(value)
}

/// On-disk store of per-PR progress records
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Open a store rooted at `dir` (created lazily on first save)
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Locate the store for the repository containing `path`.
    ///
    /// Resolves through linked worktrees to the main working copy's git
    /// common dir, so status can be queried from any worktree.
    pub fn discover(path: &Path) -> Result<Self> {
        let common = resolve_git_common_dir(path)?;
        Ok(Self::open(common.join(SENTINEL_DIR)))
    }

    /// Path of the state file for a PR
    pub fn path_for(&self, pr_number: u64) -> PathBuf {
        self.dir.join(format!("pr-{pr_number}.json"))
    }

    /// Write the record for a PR, replacing any previous one.
    ///
    /// `pr_number` and `updated_at` are stamped here so every persisted
    /// document carries them regardless of what the loop tracked.
    pub fn save(&self, pr_number: u64, record: &ProgressRecord) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).map_err(|e| {
                Error::StateStore(format!("failed to create {}: {e}", self.dir.display()))
            })?;
        }

        let mut stamped = record.clone();
        stamped.pr_number = pr_number;
        stamped.updated_at = Utc::now();

        let content = serde_json::to_vec_pretty(&stamped)
            .map_err(|e| Error::StateStore(format!("failed to serialize progress: {e}")))?;

        let path = self.path_for(pr_number);
        let tmp = path.with_extension("json.tmp");

        let mut file = fs::File::create(&tmp)
            .map_err(|e| Error::StateStore(format!("failed to create {}: {e}", tmp.display())))?;
        file.write_all(&content)
            .and_then(|()| file.sync_all())
            .map_err(|e| Error::StateStore(format!("failed to write {}: {e}", tmp.display())))?;
        drop(file);

        fs::rename(&tmp, &path)
            .map_err(|e| Error::StateStore(format!("failed to rename {}: {e}", tmp.display())))?;

        Ok(())
    }

    /// Load the record for a PR, if one exists
    pub fn load(&self, pr_number: u64) -> Result<Option<ProgressRecord>> {
        let path = self.path_for(pr_number);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::StateStore(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        let record: ProgressRecord = serde_json::from_str(&content)
            .map_err(|e| Error::StateStore(format!("failed to parse {}: {e}", path.display())))?;
        Ok(Some(record))
    }

    /// Remove the record for a PR (missing is fine)
    pub fn clear(&self, pr_number: u64) -> Result<()> {
        let path = self.path_for(pr_number);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::StateStore(format!(
                "failed to remove {}: {e}",
                path.display()
            ))),
        }
    }
}
