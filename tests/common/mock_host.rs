//! Scripted mock implementations of the host and working-copy seams
//!
//! These manually implement the traits in the same spirit as the production
//! types: scripted responses per call, call tracking for verification, and
//! error injection for failure paths.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use pr_sentinel::error::{Error, Result};
use pr_sentinel::events::{EventKind, EventSink, MonitorEvent};
use pr_sentinel::git::WorkingCopy;
use pr_sentinel::platform::{HostConfig, PrHost};
use pr_sentinel::types::{MergeOutcome, PrSnapshot, RebaseResult};

/// Scripted `PrHost`: snapshots are served in order, the last one repeating
pub struct MockHost {
    config: HostConfig,
    snapshots: Mutex<VecDeque<PrSnapshot>>,
    merge_responses: Mutex<VecDeque<MergeOutcome>>,
    quota: Mutex<u32>,
    fetch_calls: Mutex<Vec<bool>>,
    merge_calls: AtomicU32,
    review_requests: Mutex<Vec<(u64, String)>>,
    error_on_fetch: Mutex<Option<String>>,
}

impl MockHost {
    /// Mock host serving the given snapshot script
    pub fn new(snapshots: Vec<PrSnapshot>) -> Self {
        Self {
            config: HostConfig {
                owner: "acme".to_string(),
                repo: "widgets".to_string(),
                host: None,
            },
            snapshots: Mutex::new(snapshots.into()),
            merge_responses: Mutex::new(VecDeque::new()),
            quota: Mutex::new(5000),
            fetch_calls: Mutex::new(Vec::new()),
            merge_calls: AtomicU32::new(0),
            review_requests: Mutex::new(Vec::new()),
            error_on_fetch: Mutex::new(None),
        }
    }

    /// Queue a merge response (defaults to `Merged` when the queue is empty)
    pub fn push_merge_response(&self, outcome: MergeOutcome) {
        self.merge_responses.lock().unwrap().push_back(outcome);
    }

    /// Set the remaining quota reported by the quota probe
    pub fn set_quota(&self, remaining: u32) {
        *self.quota.lock().unwrap() = remaining;
    }

    /// Make the next fetches fail with the given message
    pub fn fail_fetch(&self, message: &str) {
        *self.error_on_fetch.lock().unwrap() = Some(message.to_string());
    }

    /// Stop injecting fetch failures
    pub fn heal_fetch(&self) {
        *self.error_on_fetch.lock().unwrap() = None;
    }

    /// Number of snapshot fetches performed
    pub fn fetch_call_count(&self) -> usize {
        self.fetch_calls.lock().unwrap().len()
    }

    /// The `prefer_rest` flag of each fetch, in call order
    pub fn fetch_calls(&self) -> Vec<bool> {
        self.fetch_calls.lock().unwrap().clone()
    }

    /// Number of merge attempts performed
    pub fn merge_call_count(&self) -> u32 {
        self.merge_calls.load(Ordering::SeqCst)
    }

    /// Review re-requests performed, in call order
    pub fn review_requests(&self) -> Vec<(u64, String)> {
        self.review_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PrHost for MockHost {
    async fn fetch_pr_state(&self, pr_number: u64, prefer_rest: bool) -> Result<PrSnapshot> {
        self.fetch_calls.lock().unwrap().push(prefer_rest);

        if let Some(message) = self.error_on_fetch.lock().unwrap().as_ref() {
            return Err(Error::GitHubApi(message.clone()));
        }

        let mut snapshots = self.snapshots.lock().unwrap();
        let snapshot = if snapshots.len() > 1 {
            snapshots.pop_front()
        } else {
            snapshots.front().cloned()
        };
        snapshot.ok_or_else(|| Error::GitHubApi(format!("no snapshot scripted for PR #{pr_number}")))
    }

    async fn merge_pr(&self, _pr_number: u64) -> Result<MergeOutcome> {
        self.merge_calls.fetch_add(1, Ordering::SeqCst);
        let response = self.merge_responses.lock().unwrap().pop_front();
        Ok(response.unwrap_or(MergeOutcome::Merged {
            sha: Some("merge-sha".to_string()),
        }))
    }

    async fn request_review(&self, pr_number: u64, reviewer: &str) -> Result<()> {
        self.review_requests
            .lock()
            .unwrap()
            .push((pr_number, reviewer.to_string()));
        Ok(())
    }

    async fn remaining_quota(&self) -> Result<u32> {
        Ok(*self.quota.lock().unwrap())
    }

    fn host_config(&self) -> &HostConfig {
        &self.config
    }
}

/// How the mock working copy reports the target branch's last commit
enum CommitClock {
    /// A fixed time in the past: the branch is quiet
    Stable,
    /// Always "now": the branch never stops moving
    Advancing,
    /// Sampling fails: stability cannot be determined
    Unavailable,
}

/// Scripted `WorkingCopy` with call tracking
pub struct MockVcs {
    rebase_results: Mutex<VecDeque<RebaseResult>>,
    rebase_calls: AtomicU32,
    fetch_calls: AtomicU32,
    clock: Mutex<CommitClock>,
}

impl Default for MockVcs {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVcs {
    /// Mock working copy with a quiet target branch and successful rebases
    pub fn new() -> Self {
        Self {
            rebase_results: Mutex::new(VecDeque::new()),
            rebase_calls: AtomicU32::new(0),
            fetch_calls: AtomicU32::new(0),
            clock: Mutex::new(CommitClock::Stable),
        }
    }

    /// Queue a rebase result (defaults to success when the queue is empty)
    pub fn push_rebase_result(&self, result: RebaseResult) {
        self.rebase_results.lock().unwrap().push_back(result);
    }

    /// Make the target branch keep moving forever
    pub fn set_advancing(&self) {
        *self.clock.lock().unwrap() = CommitClock::Advancing;
    }

    /// Make stability sampling fail
    pub fn set_unavailable(&self) {
        *self.clock.lock().unwrap() = CommitClock::Unavailable;
    }

    /// Number of rebase invocations performed
    pub fn rebase_call_count(&self) -> u32 {
        self.rebase_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkingCopy for MockVcs {
    async fn fetch(&self, _remote: &str) -> Result<()> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rebase_onto(&self, _remote: &str, _target: &str) -> RebaseResult {
        self.rebase_calls.fetch_add(1, Ordering::SeqCst);
        self.rebase_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(RebaseResult::ok)
    }

    async fn last_commit_time(&self, _remote: &str, _branch: &str) -> Result<DateTime<Utc>> {
        match *self.clock.lock().unwrap() {
            CommitClock::Stable => Ok(Utc::now() - chrono::Duration::hours(1)),
            CommitClock::Advancing => Ok(Utc::now()),
            CommitClock::Unavailable => Err(Error::Git("ref not found".to_string())),
        }
    }
}

/// Sink collecting events in memory for assertions
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<MonitorEvent>>,
}

impl MemorySink {
    /// All emitted events, in order
    pub fn events(&self) -> Vec<MonitorEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Just the kinds, in order
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().unwrap().iter().map(|e| e.event).collect()
    }

    /// How many events of one kind were emitted
    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event == kind)
            .count()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &MonitorEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
