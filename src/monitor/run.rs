//! The effectful monitor loop
//!
//! Each iteration: check the run clock, refresh quota if stale, read one
//! snapshot, ask the decision core for the next action, execute it, persist
//! progress when it changed, sleep. Terminal outcomes always emit exactly
//! one event; the event stream survives even when the state store does not.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::events::{EventKind, EventSink, MonitorEvent};
use crate::git::WorkingCopy;
use crate::monitor::decision::{next_action, should_nudge_review, Action};
use crate::platform::PrHost;
use crate::ratelimit::RateLimiter;
use crate::review::{classify_comments, has_open_tasks};
use crate::store::{Phase, ProgressRecord, StateStore};
use crate::types::{CheckStatus, MergeOutcome, MonitorResult, PrSnapshot};

/// Drives one or more PR monitor runs over shared services
pub struct Monitor {
    host: Arc<dyn PrHost>,
    vcs: Arc<dyn WorkingCopy>,
    limiter: Arc<RateLimiter>,
    store: StateStore,
    sink: Arc<dyn EventSink>,
    config: MonitorConfig,
}

impl Monitor {
    /// Assemble a monitor over the given services
    pub fn new(
        host: Arc<dyn PrHost>,
        vcs: Arc<dyn WorkingCopy>,
        limiter: Arc<RateLimiter>,
        store: StateStore,
        sink: Arc<dyn EventSink>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            host,
            vcs,
            limiter,
            store,
            sink,
            config,
        }
    }

    /// Monitor one PR until it merges, fails, or the run times out
    #[allow(clippy::too_many_lines)]
    pub async fn run(&self, pr_number: u64) -> MonitorResult {
        let started = Instant::now();
        let mut progress = self.resume_or_start(pr_number);
        let mut last_saved: Option<ProgressRecord> = None;
        let mut last_snapshot: Option<PrSnapshot> = None;
        let mut ci_passed_seen = false;
        let mut review_completed_seen = false;

        loop {
            if started.elapsed() >= self.config.run_timeout {
                return self.finish_timeout(pr_number, &mut progress, last_snapshot);
            }

            self.refresh_quota().await;

            let snapshot = match self
                .host
                .fetch_pr_state(pr_number, self.limiter.prefer_rest())
                .await
            {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    // Transient transport failure: never fatal on first
                    // occurrence, the run timeout bounds the retries.
                    warn!(pr_number, "poll failed, will retry: {e}");
                    self.sleep_interval().await;
                    continue;
                }
            };

            // Cross-poll transitions that are themselves events.
            if let Some(prev) = &last_snapshot {
                if prev.check_status == CheckStatus::Pending
                    && snapshot.check_status == CheckStatus::Success
                {
                    ci_passed_seen = true;
                    self.emit(
                        MonitorEvent::new(EventKind::CiPassed, pr_number, "all checks passed")
                            .with_detail("checks", json!(snapshot.check_details.len())),
                    );
                }
                if !prev.pending_reviewers.is_empty() && snapshot.pending_reviewers.is_empty() {
                    review_completed_seen = true;
                    self.emit(MonitorEvent::new(
                        EventKind::ReviewCompleted,
                        pr_number,
                        "all requested reviews completed",
                    ));
                }
            }

            // Comment scope is recomputed every poll: a rebase can change the
            // diff and move comments between partitions.
            let classified = classify_comments(
                &snapshot.review_comments,
                &snapshot.changed_files,
                self.config.scope_policy,
            );
            let open_tasks = classified
                .in_scope
                .iter()
                .filter(|c| has_open_tasks(&c.body))
                .count();
            if open_tasks > 0 {
                debug!(
                    pr_number,
                    open_tasks,
                    in_scope = classified.in_scope.len(),
                    "in-scope review comments still carry open task boxes"
                );
            }

            progress.last_merge_state = Some(snapshot.merge_state);
            progress.last_check_status = Some(snapshot.check_status);

            // The AI-review clock starts when a pending AI reviewer is first
            // observed and resets when none remain.
            if snapshot.has_pending_ai_reviewer() {
                if progress.review_wait_started_at.is_none() {
                    progress.review_wait_started_at = Some(Utc::now());
                }
            } else {
                progress.review_wait_started_at = None;
            }

            let action = next_action(&snapshot, &progress, &self.config, Utc::now());
            debug!(pr_number, ?action, "decided next action");

            match action {
                Action::FailDirty => {
                    let event = MonitorEvent::new(
                        EventKind::DirtyDetected,
                        pr_number,
                        "PR has merge conflicts",
                    )
                    .with_suggestion("resolve the conflicts manually and push");
                    return self.finish_failure(
                        pr_number,
                        &mut progress,
                        event,
                        "merge conflicts require human intervention",
                        Some(snapshot),
                        review_completed_seen,
                        ci_passed_seen,
                    );
                }

                Action::FailRebaseBudget => {
                    let message = format!(
                        "still behind after {} rebase attempt(s); rebase budget exhausted",
                        progress.rebase_count
                    );
                    let event = MonitorEvent::new(EventKind::Error, pr_number, message.clone())
                        .with_detail("rebase_count", json!(progress.rebase_count))
                        .with_suggestion("rebase and push manually, then re-run");
                    return self.finish_failure(
                        pr_number,
                        &mut progress,
                        event,
                        message,
                        Some(snapshot),
                        review_completed_seen,
                        ci_passed_seen,
                    );
                }

                Action::Rebase => {
                    progress.phase = Phase::Rebasing;
                    progress.rebase_count += 1;
                    self.emit(
                        MonitorEvent::new(
                            EventKind::BehindDetected,
                            pr_number,
                            format!(
                                "branch is behind {}; rebasing (attempt {} of {})",
                                snapshot.base_ref,
                                progress.rebase_count,
                                self.config.max_rebase_attempts
                            ),
                        )
                        .with_detail("rebase_count", json!(progress.rebase_count)),
                    );
                    self.persist_if_changed(pr_number, &progress, &mut last_saved);

                    let result = self
                        .vcs
                        .rebase_onto(&self.config.remote, &snapshot.base_ref)
                        .await;

                    if result.conflict {
                        let detail = result.error_message.unwrap_or_default();
                        let event = MonitorEvent::new(
                            EventKind::DirtyDetected,
                            pr_number,
                            "rebase hit a content conflict",
                        )
                        .with_detail("rebase_output", json!(detail))
                        .with_suggestion("resolve the conflicts manually and push");
                        return self.finish_failure(
                            pr_number,
                            &mut progress,
                            event,
                            "rebase conflict requires human intervention",
                            Some(snapshot),
                            review_completed_seen,
                            ci_passed_seen,
                        );
                    }
                    if !result.success {
                        warn!(
                            pr_number,
                            "rebase attempt failed (non-conflict): {}",
                            result.error_message.as_deref().unwrap_or("unknown")
                        );
                    }
                    progress.phase = Phase::Polling;
                }

                Action::WaitReview => {
                    progress.phase = Phase::WaitingReview;
                    if snapshot.has_pending_ai_reviewer()
                        && should_nudge_review(&progress, &self.config, Utc::now())
                    {
                        // Attempts are counted even when the request fails.
                        progress.review_retries += 1;
                        if let Some(reviewer) = snapshot.pending_reviewers.iter().find(|r| r.is_ai)
                        {
                            info!(pr_number, reviewer = %reviewer.login, "re-requesting AI review");
                            if let Err(e) =
                                self.host.request_review(pr_number, &reviewer.login).await
                            {
                                warn!(pr_number, "review re-request failed: {e}");
                            }
                        }
                    }
                }

                Action::FailReviewBudget => {
                    let pending: Vec<String> = snapshot
                        .pending_reviewers
                        .iter()
                        .filter(|r| r.is_ai)
                        .map(|r| r.login.clone())
                        .collect();
                    let message = format!(
                        "AI review still pending after {}s; treating as errored",
                        self.config.review_pending_budget.as_secs()
                    );
                    let event = MonitorEvent::new(EventKind::ReviewError, pr_number, message.clone())
                        .with_detail("pending_reviewers", json!(pending))
                        .with_detail("review_retries", json!(progress.review_retries))
                        .with_suggestion("check the reviewer bot, or re-request manually");
                    return self.finish_failure(
                        pr_number,
                        &mut progress,
                        event,
                        message,
                        Some(snapshot),
                        review_completed_seen,
                        ci_passed_seen,
                    );
                }

                Action::WaitCi => {
                    progress.phase = Phase::WaitingCi;
                }

                Action::FailCi { cancelled } => {
                    let failed: Vec<String> = snapshot
                        .check_details
                        .iter()
                        .filter(|c| {
                            matches!(c.status, CheckStatus::Failure | CheckStatus::Cancelled)
                        })
                        .map(|c| c.name.clone())
                        .collect();
                    let message = if cancelled {
                        "CI checks were cancelled".to_string()
                    } else {
                        format!("CI failed: {}", failed.join(", "))
                    };
                    let event = MonitorEvent::new(EventKind::CiFailed, pr_number, message.clone())
                        .with_detail("failed_checks", json!(failed))
                        .with_suggestion("fix the failing checks and push");
                    return self.finish_failure(
                        pr_number,
                        &mut progress,
                        event,
                        message,
                        Some(snapshot),
                        review_completed_seen,
                        ci_passed_seen,
                    );
                }

                Action::Hold(reason) => {
                    debug!(pr_number, %reason, "holding");
                    progress.phase = Phase::Polling;
                    progress.last_message = Some(reason.to_string());
                }

                Action::Merge => {
                    progress.phase = Phase::WaitingStability;
                    self.persist_if_changed(pr_number, &progress, &mut last_saved);

                    let run_deadline = started + self.config.run_timeout;
                    if !self.wait_for_stable(&snapshot.base_ref, run_deadline).await {
                        // Not stable within the stability timeout; keep the
                        // loop going, the run timeout is the backstop.
                        warn!(
                            pr_number,
                            "target branch {} did not stabilize; retrying", snapshot.base_ref
                        );
                        progress.phase = Phase::Polling;
                        self.persist_if_changed(pr_number, &progress, &mut last_saved);
                        self.sleep_interval().await;
                        continue;
                    }

                    progress.phase = Phase::Merging;
                    progress.merge_attempts += 1;
                    self.persist_if_changed(pr_number, &progress, &mut last_saved);

                    match self.host.merge_pr(pr_number).await {
                        Ok(MergeOutcome::Merged { sha }) => {
                            return self.finish_success(
                                pr_number,
                                &mut progress,
                                sha,
                                snapshot,
                                review_completed_seen,
                                ci_passed_seen,
                            );
                        }
                        Ok(MergeOutcome::Behind) => {
                            // The target moved under us; loop back into the
                            // rebase path instead of burning merge attempts.
                            info!(pr_number, "merge rejected: behind target; re-entering rebase");
                            progress.phase = Phase::Polling;
                        }
                        Ok(MergeOutcome::Failed { message }) => {
                            if progress.merge_attempts >= self.config.max_merge_attempts {
                                let summary = format!(
                                    "merge failed after {} attempt(s): {message}",
                                    progress.merge_attempts
                                );
                                let event =
                                    MonitorEvent::new(EventKind::Error, pr_number, summary.clone())
                                        .with_detail(
                                            "merge_attempts",
                                            json!(progress.merge_attempts),
                                        );
                                return self.finish_failure(
                                    pr_number,
                                    &mut progress,
                                    event,
                                    summary,
                                    Some(snapshot),
                                    review_completed_seen,
                                    ci_passed_seen,
                                );
                            }
                            warn!(pr_number, "merge attempt failed, will retry: {message}");
                            progress.phase = Phase::Polling;
                        }
                        Err(e) => {
                            if progress.merge_attempts >= self.config.max_merge_attempts {
                                let summary = format!(
                                    "merge failed after {} attempt(s): {e}",
                                    progress.merge_attempts
                                );
                                let event =
                                    MonitorEvent::new(EventKind::Error, pr_number, summary.clone());
                                return self.finish_failure(
                                    pr_number,
                                    &mut progress,
                                    event,
                                    summary,
                                    Some(snapshot),
                                    review_completed_seen,
                                    ci_passed_seen,
                                );
                            }
                            warn!(pr_number, "merge call failed, will retry: {e}");
                            progress.phase = Phase::Polling;
                        }
                    }
                }
            }

            self.persist_if_changed(pr_number, &progress, &mut last_saved);
            last_snapshot = Some(snapshot);
            self.sleep_interval().await;
        }
    }

    /// Continue from a persisted record when one exists, else start fresh.
    ///
    /// Budgets carry over from an interrupted or timed-out run. A record
    /// left by a completed failure starts over: the operator re-running
    /// after a terminal verdict expects fresh budgets.
    fn resume_or_start(&self, pr_number: u64) -> ProgressRecord {
        match self.store.load(pr_number) {
            Ok(Some(mut record)) => {
                if matches!(record.phase, Phase::Failed | Phase::Succeeded) {
                    return ProgressRecord::new(pr_number);
                }
                info!(
                    pr_number,
                    rebase_count = record.rebase_count,
                    "resuming from persisted progress"
                );
                record.phase = Phase::Polling;
                record
            }
            Ok(None) => ProgressRecord::new(pr_number),
            Err(e) => {
                warn!(pr_number, "could not load persisted progress: {e}");
                ProgressRecord::new(pr_number)
            }
        }
    }

    /// Refresh the shared quota cache when its TTL has lapsed
    async fn refresh_quota(&self) {
        if !self.limiter.needs_refresh() {
            return;
        }
        match self.host.remaining_quota().await {
            Ok(remaining) => {
                for signal in self.limiter.observe(remaining) {
                    info!(remaining, ?signal, "rate-limit transition");
                }
            }
            Err(e) => debug!("quota probe failed (keeping cached level): {e}"),
        }
    }

    /// Wait for the target branch to go quiet before merging.
    ///
    /// Returns false when the stability timeout (or the overall run
    /// deadline) elapses first. A fetch or log failure counts as "cannot
    /// determine, assume unstable".
    async fn wait_for_stable(&self, base_ref: &str, run_deadline: Instant) -> bool {
        let deadline = std::cmp::min(Instant::now() + self.config.stability_timeout, run_deadline);

        loop {
            if let Err(e) = self.vcs.fetch(&self.config.remote).await {
                debug!("fetch during stability wait failed: {e}");
            }

            match self
                .vcs
                .last_commit_time(&self.config.remote, base_ref)
                .await
            {
                Ok(commit_time) => {
                    let age = (Utc::now() - commit_time).to_std().unwrap_or_default();
                    if age >= self.config.stability_duration {
                        debug!(base_ref, age_secs = age.as_secs(), "target branch is stable");
                        return true;
                    }
                    debug!(base_ref, age_secs = age.as_secs(), "target branch still moving");
                }
                Err(e) => {
                    // Cannot determine: assume unstable and keep sampling.
                    debug!("stability sample failed: {e}");
                }
            }

            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.config.stability_recheck).await;
        }
    }

    fn emit(&self, event: MonitorEvent) {
        self.sink.emit(&event);
    }

    /// Save progress when it differs from the last persisted copy.
    ///
    /// Persistence is best-effort durability: a failed write is logged and
    /// the run continues.
    fn persist_if_changed(
        &self,
        pr_number: u64,
        progress: &ProgressRecord,
        last_saved: &mut Option<ProgressRecord>,
    ) {
        if last_saved.as_ref() == Some(progress) {
            return;
        }
        if let Err(e) = self.store.save(pr_number, progress) {
            warn!(pr_number, "failed to persist progress: {e}");
        }
        *last_saved = Some(progress.clone());
    }

    fn finish_success(
        &self,
        pr_number: u64,
        progress: &mut ProgressRecord,
        sha: Option<String>,
        snapshot: PrSnapshot,
        review_completed_seen: bool,
        ci_passed_seen: bool,
    ) -> MonitorResult {
        progress.phase = Phase::Succeeded;
        let message = format!("PR #{pr_number} merged");
        self.emit(
            MonitorEvent::new(EventKind::Merged, pr_number, message.clone())
                .with_detail("sha", json!(sha))
                .with_detail("rebase_count", json!(progress.rebase_count)),
        );

        // The run is complete; the record has nothing left to resume.
        if let Err(e) = self.store.clear(pr_number) {
            warn!(pr_number, "failed to clear state file: {e}");
        }

        let classified = classify_comments(
            &snapshot.review_comments,
            &snapshot.changed_files,
            self.config.scope_policy,
        );
        let mut details = serde_json::Map::new();
        details.insert("sha".to_string(), json!(sha));
        details.insert(
            "merge_attempts".to_string(),
            json!(progress.merge_attempts),
        );
        details.insert(
            "in_scope_comments".to_string(),
            json!(classified.in_scope.len()),
        );
        details.insert(
            "out_of_scope_comments".to_string(),
            json!(classified.out_of_scope.len()),
        );

        MonitorResult {
            success: true,
            message,
            rebase_count: progress.rebase_count,
            review_completed: review_completed_seen || snapshot.pending_reviewers.is_empty(),
            ci_passed: ci_passed_seen || snapshot.check_status == CheckStatus::Success,
            final_state: Some(snapshot),
            timed_out: false,
            details,
            finished_at: Utc::now(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_failure(
        &self,
        pr_number: u64,
        progress: &mut ProgressRecord,
        event: MonitorEvent,
        message: impl Into<String>,
        snapshot: Option<PrSnapshot>,
        review_completed_seen: bool,
        ci_passed_seen: bool,
    ) -> MonitorResult {
        let message = message.into();
        progress.phase = Phase::Failed;
        progress.last_message = Some(message.clone());

        // Emit before the state write; the event stream is the
        // authoritative record of the outcome.
        self.emit(event);
        if let Err(e) = self.store.save(pr_number, progress) {
            warn!(pr_number, "failed to persist terminal state: {e}");
        }

        MonitorResult {
            success: false,
            message,
            rebase_count: progress.rebase_count,
            review_completed: review_completed_seen,
            ci_passed: ci_passed_seen,
            final_state: snapshot,
            timed_out: false,
            details: serde_json::Map::new(),
            finished_at: Utc::now(),
        }
    }

    fn finish_timeout(
        &self,
        pr_number: u64,
        progress: &mut ProgressRecord,
        last_snapshot: Option<PrSnapshot>,
    ) -> MonitorResult {
        let message = format!(
            "run timeout of {}s exceeded while {}",
            self.config.run_timeout.as_secs(),
            progress.phase
        );
        progress.last_message = Some(message.clone());
        let previous_phase = progress.phase;
        progress.phase = Phase::TimedOut;

        self.emit(
            MonitorEvent::new(EventKind::Timeout, pr_number, message.clone())
                .with_detail("phase", json!(previous_phase.to_string()))
                .with_suggestion("re-run to continue monitoring; budgets are persisted"),
        );
        if let Err(e) = self.store.save(pr_number, progress) {
            warn!(pr_number, "failed to persist timeout state: {e}");
        }

        MonitorResult {
            success: false,
            message,
            rebase_count: progress.rebase_count,
            review_completed: false,
            ci_passed: progress.last_check_status == Some(CheckStatus::Success),
            final_state: last_snapshot,
            timed_out: true,
            details: serde_json::Map::new(),
            finished_at: Utc::now(),
        }
    }

    async fn sleep_interval(&self) {
        tokio::time::sleep(self.limiter.interval(self.config.poll_interval)).await;
    }
}
