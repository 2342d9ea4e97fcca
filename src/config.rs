//! Monitor configuration
//!
//! All polling cadences, budgets, and timeouts live here with their defaults.
//! Every value can be overridden from the command line.

use std::time::Duration;

/// Default interval between polls (30 seconds).
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Default overall run timeout (45 minutes).
const DEFAULT_RUN_TIMEOUT_SECS: u64 = 45 * 60;

/// Default per-call timeout for one outbound API call (60 seconds).
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 60;

/// Default maximum rebase attempts per run.
const DEFAULT_MAX_REBASE_ATTEMPTS: u32 = 3;

/// Default maximum merge attempts per run.
const DEFAULT_MAX_MERGE_ATTEMPTS: u32 = 3;

/// Default maximum AI-review re-requests per run.
const DEFAULT_MAX_REVIEW_RETRIES: u32 = 2;

/// Default budget for an AI review to stay pending (10 minutes).
const DEFAULT_REVIEW_PENDING_BUDGET_SECS: u64 = 10 * 60;

/// Default window the target branch must go without new commits (90 seconds).
const DEFAULT_STABILITY_DURATION_SECS: u64 = 90;

/// Default timeout for the stability wait itself (10 minutes).
const DEFAULT_STABILITY_TIMEOUT_SECS: u64 = 10 * 60;

/// Default interval between stability samples (15 seconds).
const DEFAULT_STABILITY_RECHECK_SECS: u64 = 15;

/// Login-name substrings identifying automated reviewers.
///
/// Reviewers matching this list get a bounded wait budget; humans wait
/// until the overall run timeout.
pub const DEFAULT_AI_REVIEWER_LOGINS: &[&str] = &[
    "copilot",
    "coderabbit",
    "claude",
    "cursor",
    "devin",
    "greptile",
    "sourcery",
    "[bot]",
];

/// Policy for classifying a review comment as in scope of the current diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopePolicy {
    /// In scope when the comment's file is in the PR's changed-file set
    #[default]
    ChangedFiles,
    /// In scope only when the comment's file and line are both anchored
    /// (stricter; unanchored comments fall out of scope)
    ChangedLines,
}

/// Tunable configuration for one monitor run
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Base interval between polls (the rate limiter may stretch it)
    pub poll_interval: Duration,
    /// Overall run timeout; exceeding it ends the run as timed out
    pub run_timeout: Duration,
    /// Timeout applied to each outbound API call
    pub call_timeout: Duration,
    /// Maximum rebase attempts per run
    pub max_rebase_attempts: u32,
    /// Maximum merge attempts per run
    pub max_merge_attempts: u32,
    /// Maximum AI-review re-requests per run
    pub max_review_retries: u32,
    /// How long an AI review may stay pending before it is treated as errored
    pub review_pending_budget: Duration,
    /// Window the target branch must go without new commits before merging
    pub stability_duration: Duration,
    /// Timeout for the stability wait, independent of the run timeout
    pub stability_timeout: Duration,
    /// Interval between stability samples
    pub stability_recheck: Duration,
    /// Login substrings identifying AI reviewers
    pub ai_reviewer_logins: Vec<String>,
    /// Comment scope-classification policy
    pub scope_policy: ScopePolicy,
    /// Remote name to fetch from and rebase against
    pub remote: String,
    /// Opaque caller-supplied correlation token, logged only
    pub session: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            run_timeout: Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS),
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            max_rebase_attempts: DEFAULT_MAX_REBASE_ATTEMPTS,
            max_merge_attempts: DEFAULT_MAX_MERGE_ATTEMPTS,
            max_review_retries: DEFAULT_MAX_REVIEW_RETRIES,
            review_pending_budget: Duration::from_secs(DEFAULT_REVIEW_PENDING_BUDGET_SECS),
            stability_duration: Duration::from_secs(DEFAULT_STABILITY_DURATION_SECS),
            stability_timeout: Duration::from_secs(DEFAULT_STABILITY_TIMEOUT_SECS),
            stability_recheck: Duration::from_secs(DEFAULT_STABILITY_RECHECK_SECS),
            ai_reviewer_logins: DEFAULT_AI_REVIEWER_LOGINS
                .iter()
                .map(ToString::to_string)
                .collect(),
            scope_policy: ScopePolicy::default(),
            remote: "origin".to_string(),
            session: None,
        }
    }
}

impl MonitorConfig {
    /// Whether a reviewer login matches the AI allow-list
    pub fn is_ai_reviewer(&self, login: &str) -> bool {
        let login = login.to_ascii_lowercase();
        self.ai_reviewer_logins
            .iter()
            .any(|needle| login.contains(&needle.to_ascii_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_budgets() {
        let config = MonitorConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.max_rebase_attempts, 3);
        assert_eq!(config.max_merge_attempts, 3);
        assert_eq!(config.stability_duration, Duration::from_secs(90));
    }

    #[test]
    fn ai_reviewer_matching_is_substring_and_case_insensitive() {
        let config = MonitorConfig::default();
        assert!(config.is_ai_reviewer("CodeRabbitAI"));
        assert!(config.is_ai_reviewer("github-copilot"));
        assert!(config.is_ai_reviewer("renovate[bot]"));
        assert!(!config.is_ai_reviewer("alice"));
    }
}
