//! Shared test fixtures

#![allow(dead_code)]

pub mod mock_host;

pub use mock_host::{MemorySink, MockHost, MockVcs};

use std::time::Duration;

use pr_sentinel::config::MonitorConfig;
use pr_sentinel::types::{
    CheckResult, CheckStatus, MergeState, PrSnapshot, ReviewThread, Reviewer,
};

/// Config with millisecond cadences so scenario tests run fast
pub fn test_config() -> MonitorConfig {
    MonitorConfig {
        poll_interval: Duration::from_millis(10),
        run_timeout: Duration::from_secs(5),
        call_timeout: Duration::from_secs(1),
        stability_duration: Duration::ZERO,
        stability_timeout: Duration::from_millis(200),
        stability_recheck: Duration::from_millis(10),
        ..MonitorConfig::default()
    }
}

/// A snapshot that is ready to merge
pub fn clean_snapshot(pr_number: u64) -> PrSnapshot {
    PrSnapshot {
        number: pr_number,
        merge_state: MergeState::Clean,
        check_status: CheckStatus::Success,
        check_details: vec![CheckResult {
            name: "ci/build".to_string(),
            status: CheckStatus::Success,
        }],
        pending_reviewers: vec![],
        review_comments: vec![],
        unresolved_threads: vec![],
        changed_files: vec!["src/lib.rs".to_string()],
        head_sha: "abc123".to_string(),
        base_ref: "main".to_string(),
    }
}

/// A snapshot whose branch is behind its target
pub fn behind_snapshot(pr_number: u64) -> PrSnapshot {
    PrSnapshot {
        merge_state: MergeState::Behind,
        ..clean_snapshot(pr_number)
    }
}

/// A snapshot with CI still running
pub fn ci_pending_snapshot(pr_number: u64) -> PrSnapshot {
    PrSnapshot {
        check_status: CheckStatus::Pending,
        check_details: vec![CheckResult {
            name: "ci/build".to_string(),
            status: CheckStatus::Pending,
        }],
        ..clean_snapshot(pr_number)
    }
}

/// A snapshot with failed CI
pub fn ci_failed_snapshot(pr_number: u64) -> PrSnapshot {
    PrSnapshot {
        check_status: CheckStatus::Failure,
        check_details: vec![CheckResult {
            name: "ci/build".to_string(),
            status: CheckStatus::Failure,
        }],
        ..clean_snapshot(pr_number)
    }
}

/// A clean snapshot blocked by an unresolved in-scope thread
pub fn threaded_snapshot(pr_number: u64) -> PrSnapshot {
    PrSnapshot {
        unresolved_threads: vec![ReviewThread {
            id: "thread-1".to_string(),
            is_resolved: false,
            path: Some("src/lib.rs".to_string()),
            line: Some(12),
        }],
        ..clean_snapshot(pr_number)
    }
}

/// A clean snapshot waiting on an AI reviewer
pub fn ai_review_snapshot(pr_number: u64) -> PrSnapshot {
    PrSnapshot {
        pending_reviewers: vec![Reviewer {
            login: "coderabbitai".to_string(),
            is_ai: true,
        }],
        ..clean_snapshot(pr_number)
    }
}
