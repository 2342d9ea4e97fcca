//! Integration tests for pr-sentinel
//!
//! CLI-level assertions plus end-to-end monitor scenarios driven through the
//! scripted host and working-copy mocks.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use common::{
    ai_review_snapshot, behind_snapshot, ci_failed_snapshot, ci_pending_snapshot, clean_snapshot,
    test_config, threaded_snapshot, MemorySink, MockHost, MockVcs,
};
use pr_sentinel::config::MonitorConfig;
use pr_sentinel::events::EventKind;
use pr_sentinel::monitor::Monitor;
use pr_sentinel::ratelimit::RateLimiter;
use pr_sentinel::store::{Phase, ProgressRecord, StateStore};
use pr_sentinel::types::{CheckStatus, MergeOutcome, MergeState, PrSnapshot};

// =============================================================================
// CLI Tests
// =============================================================================

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("sentinel").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Merge-readiness monitor"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("sentinel").unwrap();
    cmd.arg("--version");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_run_help() {
    let mut cmd = Command::cargo_bin("sentinel").unwrap();
    cmd.args(["run", "--help"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Monitor one or more PRs"));
}

#[test]
fn test_run_rejects_non_numeric_pr() {
    let mut cmd = Command::cargo_bin("sentinel").unwrap();
    cmd.args(["run", "abc"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("positive integer"));
}

#[test]
fn test_run_rejects_zero_pr() {
    let mut cmd = Command::cargo_bin("sentinel").unwrap();
    cmd.args(["run", "0"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("positive integer"));
}

#[test]
fn test_run_rejects_oversized_pr() {
    let mut cmd = Command::cargo_bin("sentinel").unwrap();
    cmd.args(["run", "1000000"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("too large"));
}

#[test]
fn test_status_reports_absent_state() {
    let temp = TempDir::new().unwrap();
    let init = std::process::Command::new("git")
        .args(["init", "--quiet"])
        .current_dir(temp.path())
        .status()
        .expect("git is available");
    assert!(init.success());

    let mut cmd = Command::cargo_bin("sentinel").unwrap();
    cmd.args(["status", "5", "--path"]).arg(temp.path());

    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("No monitor state"));
}

// =============================================================================
// Monitor Scenarios
// =============================================================================

struct Harness {
    host: Arc<MockHost>,
    vcs: Arc<MockVcs>,
    sink: Arc<MemorySink>,
    store: StateStore,
    monitor: Monitor,
    _temp: TempDir,
}

fn harness(snapshots: Vec<PrSnapshot>, config: MonitorConfig) -> Harness {
    let temp = TempDir::new().unwrap();
    let host = Arc::new(MockHost::new(snapshots));
    let vcs = Arc::new(MockVcs::new());
    let sink = Arc::new(MemorySink::default());
    let store = StateStore::open(temp.path().join("sentinel"));

    let monitor = Monitor::new(
        Arc::clone(&host) as Arc<dyn pr_sentinel::platform::PrHost>,
        Arc::clone(&vcs) as Arc<dyn pr_sentinel::git::WorkingCopy>,
        Arc::new(RateLimiter::default()),
        store.clone(),
        Arc::clone(&sink) as Arc<dyn pr_sentinel::events::EventSink>,
        config,
    );

    Harness {
        host,
        vcs,
        sink,
        store,
        monitor,
        _temp: temp,
    }
}

#[tokio::test]
async fn scenario_clean_pr_merges_on_first_attempt() {
    let h = harness(vec![clean_snapshot(42)], test_config());

    let result = h.monitor.run(42).await;

    assert!(result.success, "unexpected failure: {}", result.message);
    assert_eq!(result.rebase_count, 0);
    assert!(result.ci_passed);
    assert!(result.review_completed);
    assert_eq!(h.host.merge_call_count(), 1);
    assert_eq!(h.sink.kinds(), vec![EventKind::Merged]);

    // A finished run leaves nothing to resume.
    assert!(h.store.load(42).unwrap().is_none());
}

#[tokio::test]
async fn scenario_behind_three_polls_then_clean() {
    let snapshots = vec![
        behind_snapshot(42),
        behind_snapshot(42),
        behind_snapshot(42),
        clean_snapshot(42),
    ];
    let config = MonitorConfig {
        max_rebase_attempts: 3,
        ..test_config()
    };
    let h = harness(snapshots, config);

    let result = h.monitor.run(42).await;

    assert!(result.success, "unexpected failure: {}", result.message);
    assert_eq!(result.rebase_count, 3);
    assert_eq!(h.vcs.rebase_call_count(), 3);
    assert_eq!(h.host.merge_call_count(), 1);
    assert_eq!(h.sink.count(EventKind::BehindDetected), 3);
}

#[tokio::test]
async fn scenario_rebase_budget_exhaustion() {
    let config = MonitorConfig {
        max_rebase_attempts: 2,
        ..test_config()
    };
    let h = harness(vec![behind_snapshot(42)], config);

    let result = h.monitor.run(42).await;

    assert!(!result.success);
    assert!(!result.timed_out);
    assert_eq!(result.rebase_count, 2);
    assert_eq!(h.vcs.rebase_call_count(), 2);
    assert_eq!(h.host.merge_call_count(), 0);
    assert!(
        result.message.contains("rebase budget exhausted"),
        "message was: {}",
        result.message
    );
    assert_eq!(h.sink.count(EventKind::Error), 1);

    // Terminal failures stay inspectable.
    let record = h.store.load(42).unwrap().expect("record kept");
    assert_eq!(record.phase, Phase::Failed);
}

#[tokio::test]
async fn scenario_ci_failure_is_terminal_without_merge() {
    let h = harness(vec![ci_failed_snapshot(42)], test_config());

    let result = h.monitor.run(42).await;

    assert!(!result.success);
    assert!(!result.ci_passed);
    assert_eq!(h.host.merge_call_count(), 0);
    assert_eq!(h.sink.count(EventKind::CiFailed), 1);
    assert_eq!(h.sink.kinds(), vec![EventKind::CiFailed]);
}

#[tokio::test]
async fn scenario_timeout_while_waiting_for_ci() {
    let config = MonitorConfig {
        run_timeout: Duration::from_millis(150),
        ..test_config()
    };
    let h = harness(vec![ci_pending_snapshot(42)], config);

    let result = h.monitor.run(42).await;

    assert!(!result.success);
    assert!(result.timed_out);
    assert_eq!(h.host.merge_call_count(), 0);
    assert_eq!(h.sink.count(EventKind::Timeout), 1);

    // The state file reflects the last observed PR state, not a synthetic one.
    let record = h.store.load(42).unwrap().expect("record kept");
    assert_eq!(record.phase, Phase::TimedOut);
    assert_eq!(record.last_check_status, Some(CheckStatus::Pending));
    assert_eq!(record.last_merge_state, Some(MergeState::Clean));
}

#[tokio::test]
async fn merge_rejected_as_behind_reenters_rebase_path() {
    let snapshots = vec![clean_snapshot(42), behind_snapshot(42), clean_snapshot(42)];
    let h = harness(snapshots, test_config());
    h.host.push_merge_response(MergeOutcome::Behind);
    h.host.push_merge_response(MergeOutcome::Merged {
        sha: Some("final-sha".to_string()),
    });

    let result = h.monitor.run(42).await;

    assert!(result.success, "unexpected failure: {}", result.message);
    assert_eq!(h.host.merge_call_count(), 2);
    assert_eq!(h.vcs.rebase_call_count(), 1);
    assert_eq!(result.rebase_count, 1);
}

#[tokio::test]
async fn merge_budget_exhaustion_is_terminal() {
    let config = MonitorConfig {
        max_merge_attempts: 2,
        ..test_config()
    };
    let h = harness(vec![clean_snapshot(42)], config);
    h.host.push_merge_response(MergeOutcome::Failed {
        message: "merge blocked by a required status".to_string(),
    });
    h.host.push_merge_response(MergeOutcome::Failed {
        message: "merge blocked by a required status".to_string(),
    });

    let result = h.monitor.run(42).await;

    assert!(!result.success);
    assert_eq!(h.host.merge_call_count(), 2);
    assert!(
        result.message.contains("merge failed after 2 attempt(s)"),
        "message was: {}",
        result.message
    );
    assert_eq!(h.sink.count(EventKind::Error), 1);
}

#[tokio::test]
async fn unstable_target_branch_defers_merge_until_timeout() {
    let config = MonitorConfig {
        run_timeout: Duration::from_millis(300),
        stability_duration: Duration::from_millis(200),
        stability_timeout: Duration::from_millis(60),
        stability_recheck: Duration::from_millis(10),
        ..test_config()
    };
    let h = harness(vec![clean_snapshot(42)], config);
    h.vcs.set_advancing();

    let result = h.monitor.run(42).await;

    // The branch never went quiet, so the merge was never attempted.
    assert!(result.timed_out);
    assert_eq!(h.host.merge_call_count(), 0);
}

#[tokio::test]
async fn unreadable_target_branch_counts_as_unstable() {
    let config = MonitorConfig {
        run_timeout: Duration::from_millis(300),
        stability_timeout: Duration::from_millis(60),
        stability_recheck: Duration::from_millis(10),
        ..test_config()
    };
    let h = harness(vec![clean_snapshot(42)], config);
    h.vcs.set_unavailable();

    let result = h.monitor.run(42).await;

    assert!(result.timed_out);
    assert_eq!(h.host.merge_call_count(), 0);
}

#[tokio::test]
async fn in_scope_unresolved_thread_blocks_merge() {
    let config = MonitorConfig {
        run_timeout: Duration::from_millis(200),
        ..test_config()
    };
    let h = harness(vec![threaded_snapshot(42)], config);

    let result = h.monitor.run(42).await;

    assert!(result.timed_out);
    assert_eq!(h.host.merge_call_count(), 0);
}

#[tokio::test]
async fn out_of_scope_thread_does_not_block_merge() {
    let mut snapshot = threaded_snapshot(42);
    snapshot.unresolved_threads[0].path = Some("docs/unrelated.md".to_string());
    let h = harness(vec![snapshot], test_config());

    let result = h.monitor.run(42).await;

    assert!(result.success, "unexpected failure: {}", result.message);
    assert_eq!(h.host.merge_call_count(), 1);
}

#[tokio::test]
async fn ai_review_budget_produces_review_error() {
    let config = MonitorConfig {
        review_pending_budget: Duration::from_millis(100),
        max_review_retries: 1,
        run_timeout: Duration::from_secs(2),
        ..test_config()
    };
    let h = harness(vec![ai_review_snapshot(42)], config);

    let result = h.monitor.run(42).await;

    assert!(!result.success);
    assert!(!result.timed_out);
    assert_eq!(h.sink.count(EventKind::ReviewError), 1);
    assert_eq!(h.host.merge_call_count(), 0);

    // One paced re-request before the budget expired.
    let requests = h.host.review_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, 42);
    assert_eq!(requests[0].1, "coderabbitai");
}

#[tokio::test]
async fn persisted_budgets_survive_a_restart() {
    let config = MonitorConfig {
        max_rebase_attempts: 3,
        ..test_config()
    };
    let h = harness(vec![behind_snapshot(42)], config);

    // A previous run already spent two rebase attempts.
    let mut record = ProgressRecord::new(42);
    record.rebase_count = 2;
    h.store.save(42, &record).unwrap();

    let result = h.monitor.run(42).await;

    assert!(!result.success);
    assert_eq!(result.rebase_count, 3);
    // Only one more rebase happened in this process.
    assert_eq!(h.vcs.rebase_call_count(), 1);
    assert!(result.message.contains("rebase budget exhausted"));
}

#[tokio::test]
async fn low_quota_flips_polling_to_rest() {
    let h = harness(vec![clean_snapshot(42)], test_config());
    h.host.set_quota(150);

    let result = h.monitor.run(42).await;

    assert!(result.success);
    // The quota probe ran before the first poll, so every fetch preferred REST.
    assert!(h.host.fetch_calls().iter().all(|&prefer_rest| prefer_rest));
}

#[tokio::test]
async fn transient_poll_failures_are_retried_not_fatal() {
    let config = MonitorConfig {
        run_timeout: Duration::from_millis(400),
        ..test_config()
    };
    let h = harness(vec![clean_snapshot(42)], config);
    h.host.fail_fetch("connection reset by peer");

    // Let a few failed polls happen, then heal the transport.
    let monitor = h.monitor;
    let host = Arc::clone(&h.host);
    let handle = tokio::spawn(async move { monitor.run(42).await });
    tokio::time::sleep(Duration::from_millis(60)).await;
    host.heal_fetch();

    let result = handle.await.unwrap();
    assert!(result.success, "unexpected failure: {}", result.message);
}
