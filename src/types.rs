//! Core types for pr-sentinel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a PR's branch is up to date with its merge target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeState {
    /// Up to date with the target branch and mergeable
    Clean,
    /// Behind the target branch; needs a rebase
    Behind,
    /// Has merge conflicts; needs a human
    Dirty,
    /// Administratively blocked (branch protection, required reviews)
    Blocked,
    /// GitHub has not finished computing mergeability
    Unknown,
}

impl std::fmt::Display for MergeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clean => write!(f, "clean"),
            Self::Behind => write!(f, "behind"),
            Self::Dirty => write!(f, "dirty"),
            Self::Blocked => write!(f, "blocked"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Rolled-up CI status across all checks on the PR's head commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckStatus {
    /// At least one check is still running or queued
    Pending,
    /// All checks completed successfully (or none are configured)
    Success,
    /// At least one check failed
    Failure,
    /// At least one check was cancelled and none failed
    Cancelled,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl CheckStatus {
    /// Roll individual check results up into one status.
    ///
    /// Precedence: failure beats cancelled beats pending beats success.
    /// Zero checks configured counts as success.
    pub fn rollup(details: &[CheckResult]) -> Self {
        let mut rolled = Self::Success;
        for check in details {
            match check.status {
                Self::Failure => return Self::Failure,
                Self::Cancelled => rolled = Self::Cancelled,
                Self::Pending if rolled != Self::Cancelled => rolled = Self::Pending,
                _ => {}
            }
        }
        rolled
    }
}

/// A single named check result on the PR's head commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check name as reported by the CI provider
    pub name: String,
    /// Status of this individual check
    pub status: CheckStatus,
}

/// A reviewer still owing a review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reviewer {
    /// Login name on the platform
    pub login: String,
    /// Whether this identity matches the AI-reviewer allow-list
    pub is_ai: bool,
}

/// A review comment on the PR
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewComment {
    /// Comment ID
    pub id: u64,
    /// Author login
    pub author: String,
    /// Comment body text
    pub body: String,
    /// File the comment is anchored to (None for PR-level comments)
    pub path: Option<String>,
    /// Line the comment is anchored to
    pub line: Option<u64>,
}

/// A review thread on the PR
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewThread {
    /// Thread ID (GraphQL node ID, or synthesized from the root comment)
    pub id: String,
    /// Whether the thread has been marked resolved
    pub is_resolved: bool,
    /// File the thread is anchored to
    pub path: Option<String>,
    /// Line the thread is anchored to
    pub line: Option<u64>,
}

/// Snapshot of one pull request at a single poll
///
/// Created fresh each poll and never mutated in place, so comparisons
/// between consecutive polls are safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrSnapshot {
    /// PR number
    pub number: u64,
    /// Mergeability of the PR's branch against its target
    pub merge_state: MergeState,
    /// Rolled-up CI status
    pub check_status: CheckStatus,
    /// Individual check results, in API order
    pub check_details: Vec<CheckResult>,
    /// Reviewers still owing a review
    pub pending_reviewers: Vec<Reviewer>,
    /// Raw review comments
    pub review_comments: Vec<ReviewComment>,
    /// Review threads not marked resolved
    pub unresolved_threads: Vec<ReviewThread>,
    /// Files changed by the PR's current diff
    pub changed_files: Vec<String>,
    /// Head commit SHA
    pub head_sha: String,
    /// Target branch name
    pub base_ref: String,
}

impl PrSnapshot {
    /// Whether any reviewer on the AI allow-list is still pending
    pub fn has_pending_ai_reviewer(&self) -> bool {
        self.pending_reviewers.iter().any(|r| r.is_ai)
    }

    /// Whether any human reviewer is still pending
    pub fn has_pending_human_reviewer(&self) -> bool {
        self.pending_reviewers.iter().any(|r| !r.is_ai)
    }
}

/// Result of a rebase attempt
///
/// `conflict` is true only when the failure is a content conflict,
/// distinguishing it from transient failures that are worth retrying.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebaseResult {
    /// Whether the rebase (and push) completed
    pub success: bool,
    /// Whether the failure was a content conflict
    pub conflict: bool,
    /// Error text from the failed rebase, if any
    pub error_message: Option<String>,
}

impl RebaseResult {
    /// A successful rebase
    pub const fn ok() -> Self {
        Self {
            success: true,
            conflict: false,
            error_message: None,
        }
    }

    /// A content-conflict failure (terminal for the PR)
    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            success: false,
            conflict: true,
            error_message: Some(message.into()),
        }
    }

    /// A transient (retryable) failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            conflict: false,
            error_message: Some(message.into()),
        }
    }
}

/// Outcome of a merge attempt via the platform API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The PR was merged
    Merged {
        /// SHA of the merge commit, when the API reports one
        sha: Option<String>,
    },
    /// The merge was rejected because the branch is behind the target
    Behind,
    /// The merge failed for another reason
    Failed {
        /// Failure text from the API
        message: String,
    },
}

/// Terminal outcome of one monitor run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct MonitorResult {
    /// Whether the PR was merged
    pub success: bool,
    /// Human-readable summary of the outcome
    pub message: String,
    /// Number of rebases performed during the run
    pub rebase_count: u32,
    /// Last observed snapshot, if any poll succeeded
    pub final_state: Option<PrSnapshot>,
    /// Whether all requested reviews completed during the run
    pub review_completed: bool,
    /// Whether CI reached success during the run
    pub ci_passed: bool,
    /// Whether the run ended by exceeding the overall timeout
    pub timed_out: bool,
    /// Extra outcome details for the caller
    pub details: serde_json::Map<String, serde_json::Value>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
}
