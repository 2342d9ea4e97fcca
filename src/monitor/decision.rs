//! Monitor decision core - pure functions over observed state
//!
//! No I/O happens here: the loop hands in the latest snapshot and its
//! progress record, and gets back the one action to take. This keeps every
//! transition of the state machine unit-testable without a host.

use chrono::{DateTime, Utc};

use crate::config::MonitorConfig;
use crate::review::blocking_threads;
use crate::store::ProgressRecord;
use crate::types::{CheckStatus, MergeState, PrSnapshot};

/// Why the loop is holding at a poll without a dedicated wait state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldReason {
    /// Unresolved review threads inside the current diff
    UnresolvedThreads(usize),
    /// Administratively blocked (branch protection)
    Blocked,
    /// GitHub has not finished computing mergeability
    MergeabilityUnknown,
}

impl std::fmt::Display for HoldReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnresolvedThreads(n) => write!(f, "{n} unresolved review thread(s) in scope"),
            Self::Blocked => write!(f, "merge is administratively blocked"),
            Self::MergeabilityUnknown => write!(f, "mergeability still being computed"),
        }
    }
}

/// The one thing the loop should do after a poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Conflicts require a human; terminal
    FailDirty,
    /// Rebase onto the target branch
    Rebase,
    /// Rebase budget exhausted; terminal
    FailRebaseBudget,
    /// A reviewer is still pending; keep waiting
    WaitReview,
    /// An AI review exceeded its pending-time budget; terminal
    FailReviewBudget,
    /// CI is still running; keep waiting
    WaitCi,
    /// CI failed; terminal
    FailCi {
        /// True when the terminal status was a cancellation, not a failure
        cancelled: bool,
    },
    /// Blocked on something polling may clear; keep polling
    Hold(HoldReason),
    /// Everything is green: wait for target stability, then merge
    Merge,
}

/// Decide the next action from the latest snapshot.
///
/// Precedence mirrors the severity of each dimension: conflicts, then
/// being behind, then CI verdicts, then review budgets and waits, then
/// mergeability holds, then the merge itself.
pub fn next_action(
    snapshot: &PrSnapshot,
    progress: &ProgressRecord,
    config: &MonitorConfig,
    now: DateTime<Utc>,
) -> Action {
    if snapshot.merge_state == MergeState::Dirty {
        return Action::FailDirty;
    }

    if snapshot.merge_state == MergeState::Behind {
        if progress.rebase_count >= config.max_rebase_attempts {
            return Action::FailRebaseBudget;
        }
        return Action::Rebase;
    }

    match snapshot.check_status {
        CheckStatus::Failure => return Action::FailCi { cancelled: false },
        CheckStatus::Cancelled => return Action::FailCi { cancelled: true },
        CheckStatus::Pending | CheckStatus::Success => {}
    }

    if snapshot.has_pending_ai_reviewer() {
        if review_budget_exhausted(progress, config, now) {
            return Action::FailReviewBudget;
        }
        return Action::WaitReview;
    }

    if snapshot.check_status == CheckStatus::Pending {
        return Action::WaitCi;
    }

    if snapshot.has_pending_human_reviewer() {
        return Action::WaitReview;
    }

    match snapshot.merge_state {
        MergeState::Unknown => return Action::Hold(HoldReason::MergeabilityUnknown),
        MergeState::Blocked => return Action::Hold(HoldReason::Blocked),
        MergeState::Clean | MergeState::Behind | MergeState::Dirty => {}
    }

    let blocking = blocking_threads(
        &snapshot.unresolved_threads,
        &snapshot.changed_files,
        config.scope_policy,
    );
    if !blocking.is_empty() {
        return Action::Hold(HoldReason::UnresolvedThreads(blocking.len()));
    }

    Action::Merge
}

/// Whether the AI review has been pending longer than its time budget
fn review_budget_exhausted(
    progress: &ProgressRecord,
    config: &MonitorConfig,
    now: DateTime<Utc>,
) -> bool {
    progress.review_wait_started_at.is_some_and(|started| {
        (now - started).to_std().unwrap_or_default() >= config.review_pending_budget
    })
}

/// Whether it is time to re-request the pending AI review.
///
/// Re-requests are paced evenly across the pending-time budget so the retry
/// count is spent before the budget ends the wait.
pub fn should_nudge_review(
    progress: &ProgressRecord,
    config: &MonitorConfig,
    now: DateTime<Utc>,
) -> bool {
    if progress.review_retries >= config.max_review_retries {
        return false;
    }
    let Some(started) = progress.review_wait_started_at else {
        return false;
    };
    let elapsed = (now - started).to_std().unwrap_or_default();
    let step = config.review_pending_budget / (config.max_review_retries + 1);
    elapsed >= step * (progress.review_retries + 1)
}
