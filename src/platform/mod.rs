//! Platform services for the hosted code-review API
//!
//! The [`PrHost`] trait is the seam between the monitor loop and GitHub, so
//! the loop can be driven against a scripted implementation in tests.

mod github;
pub mod transport;

pub use github::GitHubHost;

use crate::error::{Error, Result};
use crate::types::{MergeOutcome, PrSnapshot};
use async_trait::async_trait;

/// Repository coordinates on the hosting platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Repository owner (user or organization)
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Custom host (None for github.com)
    pub host: Option<String>,
}

/// Operations the monitor needs from the hosting platform
#[async_trait]
pub trait PrHost: Send + Sync {
    /// Read one normalized snapshot of the PR.
    ///
    /// `prefer_rest` skips the structured (GraphQL) form entirely, for use
    /// when the rate limiter has entered REST priority.
    async fn fetch_pr_state(&self, pr_number: u64, prefer_rest: bool) -> Result<PrSnapshot>;

    /// Merge the PR. Returns a rich outcome rather than raising, so the
    /// loop can distinguish "behind" from a genuine failure.
    async fn merge_pr(&self, pr_number: u64) -> Result<MergeOutcome>;

    /// Re-request a review from the given reviewer
    async fn request_review(&self, pr_number: u64, reviewer: &str) -> Result<()>;

    /// Remaining core API quota
    async fn remaining_quota(&self) -> Result<u32>;

    /// Repository coordinates this host is bound to
    fn host_config(&self) -> &HostConfig;
}

/// Parse a git remote URL into repository coordinates.
///
/// Accepts `https://host/owner/repo[.git]`, `ssh://git@host/owner/repo[.git]`
/// and scp-style `git@host:owner/repo[.git]` forms.
pub fn parse_repo_info(remote_url: &str) -> Result<HostConfig> {
    let (host, path) = if let Some(rest) = remote_url.strip_prefix("git@") {
        // scp-style: git@host:owner/repo.git
        let (host, path) = rest
            .split_once(':')
            .ok_or_else(|| Error::Remote(format!("unrecognized remote URL: {remote_url}")))?;
        (host.to_string(), path.to_string())
    } else {
        let url = url::Url::parse(remote_url)
            .map_err(|e| Error::Remote(format!("unrecognized remote URL {remote_url}: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::Remote(format!("remote URL has no host: {remote_url}")))?
            .to_string();
        (host, url.path().trim_start_matches('/').to_string())
    };

    let path = path.trim_end_matches('/').trim_end_matches(".git");
    let mut parts = path.splitn(2, '/');
    let owner = parts.next().unwrap_or_default();
    let repo = parts.next().unwrap_or_default();
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return Err(Error::Remote(format!(
            "could not extract owner/repo from remote URL: {remote_url}"
        )));
    }

    Ok(HostConfig {
        owner: owner.to_string(),
        repo: repo.to_string(),
        host: (host != "github.com").then_some(host),
    })
}
