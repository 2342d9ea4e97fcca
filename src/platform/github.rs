//! GitHub host implementation
//!
//! One poll is served by a single batched GraphQL query; when that query is
//! rate limited (or the rate limiter has entered REST priority) the same
//! snapshot is reassembled from per-resource REST endpoints. The REST path
//! cannot see thread resolution, so top-level review-comment threads are
//! conservatively treated as unresolved there.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::platform::transport::{call_with_fallback, CallResult};
use crate::platform::{HostConfig, PrHost};
use crate::types::{
    CheckResult, CheckStatus, MergeOutcome, MergeState, PrSnapshot, ReviewComment, ReviewThread,
    Reviewer,
};

// GraphQL response types for the snapshot query

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
struct SnapshotData {
    repository: Option<SnapshotRepository>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRepository {
    pull_request: Option<GraphQlPullRequest>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlPullRequest {
    number: u64,
    head_ref_oid: String,
    base_ref_name: String,
    mergeable: Option<String>,
    merge_state_status: Option<String>,
    files: Option<Nodes<GraphQlFile>>,
    review_requests: Option<Nodes<GraphQlReviewRequest>>,
    review_threads: Option<Nodes<GraphQlThread>>,
    commits: Option<Nodes<GraphQlCommitNode>>,
}

#[derive(Deserialize)]
struct Nodes<T> {
    nodes: Option<Vec<Option<T>>>,
}

impl<T> Nodes<T> {
    fn into_vec(self) -> Vec<T> {
        self.nodes.unwrap_or_default().into_iter().flatten().collect()
    }
}

#[derive(Deserialize)]
struct GraphQlFile {
    path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlReviewRequest {
    requested_reviewer: Option<GraphQlReviewer>,
}

#[derive(Deserialize)]
struct GraphQlReviewer {
    login: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlThread {
    id: String,
    is_resolved: bool,
    path: Option<String>,
    line: Option<u64>,
    comments: Option<Nodes<GraphQlThreadComment>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlThreadComment {
    database_id: Option<u64>,
    author: Option<GraphQlReviewer>,
    body: String,
    path: Option<String>,
    line: Option<u64>,
}

#[derive(Deserialize)]
struct GraphQlCommitNode {
    commit: GraphQlCommit,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlCommit {
    status_check_rollup: Option<GraphQlRollup>,
}

#[derive(Deserialize)]
struct GraphQlRollup {
    contexts: Option<Nodes<GraphQlCheckContext>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlCheckContext {
    // CheckRun fields
    name: Option<String>,
    status: Option<String>,
    conclusion: Option<String>,
    // StatusContext fields
    context: Option<String>,
    state: Option<String>,
}

const SNAPSHOT_QUERY: &str = r"
    query PrSnapshot($owner: String!, $name: String!, $number: Int!) {
        repository(owner: $owner, name: $name) {
            pullRequest(number: $number) {
                number
                headRefOid
                baseRefName
                mergeable
                mergeStateStatus
                files(first: 100) { nodes { path } }
                reviewRequests(first: 50) {
                    nodes {
                        requestedReviewer {
                            ... on User { login }
                            ... on Bot { login }
                            ... on Team { name }
                        }
                    }
                }
                reviewThreads(first: 100) {
                    nodes {
                        id
                        isResolved
                        path
                        line
                        comments(first: 50) {
                            nodes {
                                databaseId
                                author { login }
                                body
                                path
                                line
                            }
                        }
                    }
                }
                commits(last: 1) {
                    nodes {
                        commit {
                            statusCheckRollup {
                                contexts(first: 100) {
                                    nodes {
                                        ... on CheckRun { name status conclusion }
                                        ... on StatusContext { context state }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
";

/// GitHub host using octocrab for GraphQL/merge and raw HTTP for the
/// per-resource REST fallback
pub struct GitHubHost {
    client: octocrab::Octocrab,
    config: HostConfig,
    /// Token for raw HTTP requests
    token: String,
    /// HTTP client for raw requests
    http_client: Client,
    /// API host for raw requests
    api_host: String,
    /// Timeout applied to each outbound call
    call_timeout: Duration,
    /// Login substrings identifying AI reviewers
    ai_reviewer_logins: Vec<String>,
}

impl GitHubHost {
    /// Create a new GitHub host
    pub fn new(
        token: &str,
        config: HostConfig,
        call_timeout: Duration,
        ai_reviewer_logins: Vec<String>,
    ) -> Result<Self> {
        let mut builder = octocrab::Octocrab::builder().personal_token(token.to_string());

        let api_host = if let Some(ref h) = config.host {
            let base_url = format!("https://{h}/api/v3");
            builder = builder
                .base_uri(&base_url)
                .map_err(|e| Error::GitHubApi(e.to_string()))?;
            format!("{h}/api/v3")
        } else {
            "api.github.com".to_string()
        };

        let client = builder
            .build()
            .map_err(|e| Error::GitHubApi(e.to_string()))?;

        let http_client = Client::builder()
            .user_agent("pr-sentinel")
            .build()
            .map_err(|e| Error::GitHubApi(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            token: token.to_string(),
            http_client,
            api_host,
            call_timeout,
            ai_reviewer_logins,
        })
    }

    fn is_ai_reviewer(&self, login: &str) -> bool {
        let login = login.to_ascii_lowercase();
        self.ai_reviewer_logins
            .iter()
            .any(|needle| login.contains(&needle.to_ascii_lowercase()))
    }

    /// Run the batched GraphQL snapshot query, folded into a `CallResult`
    async fn graphql_snapshot_call(&self, pr_number: u64) -> CallResult {
        let payload = json!({
            "query": SNAPSHOT_QUERY,
            "variables": {
                "owner": self.config.owner,
                "name": self.config.repo,
                "number": pr_number,
            }
        });

        let call = self.client.graphql::<serde_json::Value>(&payload);
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => CallResult::ok(value.to_string()),
            Ok(Err(e)) => CallResult::err(e.to_string()),
            Err(_) => CallResult::err(format!(
                "GraphQL call timed out after {}s",
                self.call_timeout.as_secs()
            )),
        }
    }

    /// Assemble the snapshot from per-resource REST endpoints, folded into a
    /// `CallResult` carrying the snapshot as JSON text
    async fn rest_snapshot_call(&self, pr_number: u64) -> CallResult {
        let build = self.rest_snapshot(pr_number);
        match tokio::time::timeout(self.call_timeout, build).await {
            Ok(Ok(snapshot)) => match serde_json::to_string(&snapshot) {
                Ok(text) => CallResult::ok(text),
                Err(e) => CallResult::err(format!("failed to encode snapshot: {e}")),
            },
            Ok(Err(e)) => CallResult::err(e.to_string()),
            Err(_) => CallResult::err(format!(
                "REST calls timed out after {}s",
                self.call_timeout.as_secs()
            )),
        }
    }

    /// GET a REST path relative to `/repos/{owner}/{repo}/`
    async fn rest_get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!(
            "https://{}/repos/{}/{}/{path}",
            self.api_host, self.config.owner, self.config.repo
        );

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await
            .map_err(|e| Error::GitHubApi(format!("GET {path} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::GitHubApi(format!("GET {path} returned {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| Error::GitHubApi(format!("GET {path} returned unparseable body: {e}")))
    }

    async fn rest_snapshot(&self, pr_number: u64) -> Result<PrSnapshot> {
        #[derive(Deserialize)]
        struct RestUser {
            login: String,
        }

        #[derive(Deserialize)]
        struct RestHead {
            sha: String,
        }

        #[derive(Deserialize)]
        struct RestBase {
            #[serde(rename = "ref")]
            ref_field: String,
        }

        #[derive(Deserialize)]
        struct RestPr {
            head: RestHead,
            base: RestBase,
            mergeable: Option<bool>,
            mergeable_state: Option<String>,
            #[serde(default)]
            requested_reviewers: Vec<RestUser>,
        }

        #[derive(Deserialize)]
        struct RestCheckRun {
            name: String,
            status: String,
            conclusion: Option<String>,
        }

        #[derive(Deserialize)]
        struct RestCheckRuns {
            #[serde(default)]
            check_runs: Vec<RestCheckRun>,
        }

        #[derive(Deserialize)]
        struct RestReviewComment {
            id: u64,
            user: Option<RestUser>,
            body: String,
            path: Option<String>,
            line: Option<u64>,
            in_reply_to_id: Option<u64>,
        }

        #[derive(Deserialize)]
        struct RestFile {
            filename: String,
        }

        let pr: RestPr = self.rest_get(&format!("pulls/{pr_number}")).await?;

        let merge_state = match (pr.mergeable, pr.mergeable_state.as_deref()) {
            (Some(false), _) | (_, Some("dirty")) => MergeState::Dirty,
            (_, Some("behind")) => MergeState::Behind,
            (_, Some("blocked")) => MergeState::Blocked,
            (_, Some("clean" | "has_hooks" | "unstable")) => MergeState::Clean,
            _ => MergeState::Unknown,
        };

        let checks: RestCheckRuns = self
            .rest_get(&format!("commits/{}/check-runs", pr.head.sha))
            .await?;
        let check_details: Vec<CheckResult> = checks
            .check_runs
            .into_iter()
            .map(|run| CheckResult {
                name: run.name,
                status: if run.status == "completed" {
                    match run.conclusion.as_deref() {
                        Some("success" | "neutral" | "skipped") => CheckStatus::Success,
                        Some("cancelled") => CheckStatus::Cancelled,
                        _ => CheckStatus::Failure,
                    }
                } else {
                    CheckStatus::Pending
                },
            })
            .collect();

        let raw_comments: Vec<RestReviewComment> = self
            .rest_get(&format!("pulls/{pr_number}/comments?per_page=100"))
            .await?;

        // Thread resolution is a GraphQL-only concept; over REST, each
        // top-level review comment is treated as an unresolved thread.
        let unresolved_threads: Vec<ReviewThread> = raw_comments
            .iter()
            .filter(|c| c.in_reply_to_id.is_none())
            .map(|c| ReviewThread {
                id: format!("rest-{}", c.id),
                is_resolved: false,
                path: c.path.clone(),
                line: c.line,
            })
            .collect();

        let review_comments: Vec<ReviewComment> = raw_comments
            .into_iter()
            .map(|c| ReviewComment {
                id: c.id,
                author: c.user.map(|u| u.login).unwrap_or_default(),
                body: c.body,
                path: c.path,
                line: c.line,
            })
            .collect();

        let files: Vec<RestFile> = self
            .rest_get(&format!("pulls/{pr_number}/files?per_page=100"))
            .await?;

        let pending_reviewers = pr
            .requested_reviewers
            .into_iter()
            .map(|u| Reviewer {
                is_ai: self.is_ai_reviewer(&u.login),
                login: u.login,
            })
            .collect();

        let check_status = CheckStatus::rollup(&check_details);
        Ok(PrSnapshot {
            number: pr_number,
            merge_state,
            check_status,
            check_details,
            pending_reviewers,
            review_comments,
            unresolved_threads,
            changed_files: files.into_iter().map(|f| f.filename).collect(),
            head_sha: pr.head.sha,
            base_ref: pr.base.ref_field,
        })
    }

    /// Turn the GraphQL response text into a normalized snapshot
    fn parse_graphql_snapshot(&self, text: &str, pr_number: u64) -> Result<PrSnapshot> {
        let response: GraphQlResponse<SnapshotData> = serde_json::from_str(text)
            .map_err(|e| Error::GitHubApi(format!("unparseable GraphQL response: {e}")))?;

        if let Some(errors) = response.errors
            && !errors.is_empty()
        {
            let messages: Vec<_> = errors.into_iter().map(|e| e.message).collect();
            return Err(Error::GitHubApi(format!(
                "GraphQL error: {}",
                messages.join(", ")
            )));
        }

        let pr = response
            .data
            .and_then(|d| d.repository)
            .and_then(|r| r.pull_request)
            .ok_or_else(|| Error::GitHubApi(format!("PR #{pr_number} not found")))?;

        let merge_state = match (pr.mergeable.as_deref(), pr.merge_state_status.as_deref()) {
            (Some("CONFLICTING"), _) | (_, Some("DIRTY")) => MergeState::Dirty,
            (_, Some("BEHIND")) => MergeState::Behind,
            (_, Some("BLOCKED")) => MergeState::Blocked,
            (_, Some("CLEAN" | "HAS_HOOKS" | "UNSTABLE")) => MergeState::Clean,
            _ => MergeState::Unknown,
        };

        let check_details: Vec<CheckResult> = pr
            .commits
            .map(Nodes::into_vec)
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|node| node.commit.status_check_rollup)
            .and_then(|rollup| rollup.contexts)
            .map(Nodes::into_vec)
            .unwrap_or_default()
            .into_iter()
            .map(|ctx| {
                // CheckRun has name/status/conclusion; StatusContext has context/state
                if let Some(name) = ctx.name {
                    let status = if ctx.status.as_deref() == Some("COMPLETED") {
                        match ctx.conclusion.as_deref() {
                            Some("SUCCESS" | "NEUTRAL" | "SKIPPED") => CheckStatus::Success,
                            Some("CANCELLED") => CheckStatus::Cancelled,
                            _ => CheckStatus::Failure,
                        }
                    } else {
                        CheckStatus::Pending
                    };
                    CheckResult { name, status }
                } else {
                    let status = match ctx.state.as_deref() {
                        Some("SUCCESS") => CheckStatus::Success,
                        Some("PENDING" | "EXPECTED") => CheckStatus::Pending,
                        _ => CheckStatus::Failure,
                    };
                    CheckResult {
                        name: ctx.context.unwrap_or_default(),
                        status,
                    }
                }
            })
            .collect();

        let pending_reviewers: Vec<Reviewer> = pr
            .review_requests
            .map(Nodes::into_vec)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|req| req.requested_reviewer)
            .filter_map(|r| r.login.or(r.name))
            .map(|login| Reviewer {
                is_ai: self.is_ai_reviewer(&login),
                login,
            })
            .collect();

        let threads = pr.review_threads.map(Nodes::into_vec).unwrap_or_default();

        let review_comments: Vec<ReviewComment> = threads
            .iter()
            .flat_map(|t| {
                t.comments
                    .as_ref()
                    .and_then(|c| c.nodes.as_ref())
                    .into_iter()
                    .flatten()
                    .flatten()
            })
            .map(|c| ReviewComment {
                id: c.database_id.unwrap_or_default(),
                author: c
                    .author
                    .as_ref()
                    .and_then(|a| a.login.clone())
                    .unwrap_or_default(),
                body: c.body.clone(),
                path: c.path.clone(),
                line: c.line,
            })
            .collect();

        let unresolved_threads: Vec<ReviewThread> = threads
            .into_iter()
            .filter(|t| !t.is_resolved)
            .map(|t| ReviewThread {
                id: t.id,
                is_resolved: false,
                path: t.path,
                line: t.line,
            })
            .collect();

        let check_status = CheckStatus::rollup(&check_details);
        Ok(PrSnapshot {
            number: pr.number,
            merge_state,
            check_status,
            check_details,
            pending_reviewers,
            review_comments,
            unresolved_threads,
            changed_files: pr
                .files
                .map(Nodes::into_vec)
                .unwrap_or_default()
                .into_iter()
                .map(|f| f.path)
                .collect(),
            head_sha: pr.head_ref_oid,
            base_ref: pr.base_ref_name,
        })
    }
}

/// Whether merge-failure text reports the branch as behind its target
fn is_behind_failure(text: &str) -> bool {
    let text = text.to_ascii_lowercase();
    text.contains("base branch was modified")
        || text.contains("head branch is out of date")
        || text.contains("behind")
}

#[async_trait]
impl PrHost for GitHubHost {
    async fn fetch_pr_state(&self, pr_number: u64, prefer_rest: bool) -> Result<PrSnapshot> {
        if prefer_rest {
            debug!(pr_number, "reading PR state via REST (rate-limit priority)");
            return match tokio::time::timeout(self.call_timeout, self.rest_snapshot(pr_number))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::GitHubApi(format!(
                    "REST calls timed out after {}s",
                    self.call_timeout.as_secs()
                ))),
            };
        }

        debug!(pr_number, "reading PR state via GraphQL");
        let outcome = call_with_fallback(
            self.graphql_snapshot_call(pr_number),
            Some(|| self.rest_snapshot_call(pr_number)),
        )
        .await;

        if !outcome.success {
            return Err(Error::GitHubApi(outcome.output));
        }

        if outcome.used_fallback {
            debug!(pr_number, "snapshot served by REST fallback");
            serde_json::from_str(&outcome.output)
                .map_err(|e| Error::GitHubApi(format!("unparseable fallback snapshot: {e}")))
        } else {
            self.parse_graphql_snapshot(&outcome.output, pr_number)
        }
    }

    async fn merge_pr(&self, pr_number: u64) -> Result<MergeOutcome> {
        debug!(pr_number, "merging PR");

        let pulls = self.client.pulls(&self.config.owner, &self.config.repo);
        let merge = pulls
            .merge(pr_number)
            .method(octocrab::params::pulls::MergeMethod::Squash)
            .send();

        let result = match tokio::time::timeout(self.call_timeout, merge).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                let text = e.to_string();
                if is_behind_failure(&text) {
                    return Ok(MergeOutcome::Behind);
                }
                return Ok(MergeOutcome::Failed { message: text });
            }
            Err(_) => {
                return Ok(MergeOutcome::Failed {
                    message: format!("merge call timed out after {}s", self.call_timeout.as_secs()),
                });
            }
        };

        if result.merged {
            debug!(pr_number, sha = ?result.sha, "merge complete");
            Ok(MergeOutcome::Merged { sha: result.sha })
        } else {
            let message = result.message.unwrap_or_else(|| "merge rejected".to_string());
            if is_behind_failure(&message) {
                Ok(MergeOutcome::Behind)
            } else {
                Ok(MergeOutcome::Failed { message })
            }
        }
    }

    async fn request_review(&self, pr_number: u64, reviewer: &str) -> Result<()> {
        debug!(pr_number, reviewer, "re-requesting review");
        // The API takes the login without any [bot] suffix.
        let login = reviewer.trim_end_matches("[bot]");
        let url = format!(
            "https://{}/repos/{}/{}/pulls/{pr_number}/requested_reviewers",
            self.api_host, self.config.owner, self.config.repo
        );

        let send = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .json(&json!({ "reviewers": [login] }))
            .send();

        let response = match tokio::time::timeout(self.call_timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(Error::GitHubApi(format!("review request failed: {e}"))),
            Err(_) => {
                return Err(Error::GitHubApi(format!(
                    "review request timed out after {}s",
                    self.call_timeout.as_secs()
                )));
            }
        };

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(pr_number, %status, "review re-request rejected");
            Err(Error::GitHubApi(format!(
                "review request returned {status}: {body}"
            )))
        }
    }

    async fn remaining_quota(&self) -> Result<u32> {
        #[derive(Deserialize)]
        struct RateResource {
            remaining: u32,
        }

        #[derive(Deserialize)]
        struct RateResources {
            core: RateResource,
        }

        #[derive(Deserialize)]
        struct RateLimitResponse {
            resources: RateResources,
        }

        let url = format!("https://{}/rate_limit", self.api_host);
        let send = self
            .http_client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send();

        let response = match tokio::time::timeout(self.call_timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(Error::GitHubApi(format!("quota probe failed: {e}"))),
            Err(_) => {
                return Err(Error::GitHubApi(format!(
                    "quota probe timed out after {}s",
                    self.call_timeout.as_secs()
                )));
            }
        };

        if !response.status().is_success() {
            return Err(Error::GitHubApi(format!(
                "quota probe returned {}",
                response.status()
            )));
        }

        let parsed: RateLimitResponse = response
            .json()
            .await
            .map_err(|e| Error::GitHubApi(format!("unparseable quota response: {e}")))?;
        Ok(parsed.resources.core.remaining)
    }

    fn host_config(&self) -> &HostConfig {
        &self.config
    }
}
