//! Run command - monitor PRs until they merge, fail, or time out

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tracing::{info, warn};

use pr_sentinel::auth::resolve_github_token;
use pr_sentinel::config::MonitorConfig;
use pr_sentinel::error::Result;
use pr_sentinel::events::StdoutSink;
use pr_sentinel::git::GitRepo;
use pr_sentinel::monitor::Monitor;
use pr_sentinel::platform::{parse_repo_info, GitHubHost};
use pr_sentinel::ratelimit::RateLimiter;
use pr_sentinel::store::{validate_pr_number, StateStore};

use crate::cli::{EXIT_FAILURE, EXIT_TIMEOUT};

/// Options for the run command
#[derive(Debug, Args)]
pub struct RunArgs {
    /// PR numbers to monitor
    #[arg(required = true, value_name = "PR")]
    pub prs: Vec<String>,

    /// Base polling interval in seconds
    #[arg(long, value_name = "SECS")]
    pub poll_interval_secs: Option<u64>,

    /// Overall run timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Per-call timeout for outbound API and git calls, in seconds
    #[arg(long, value_name = "SECS")]
    pub call_timeout_secs: Option<u64>,

    /// Maximum rebase attempts per run
    #[arg(long, value_name = "N")]
    pub max_rebase_attempts: Option<u32>,

    /// Maximum merge attempts per run
    #[arg(long, value_name = "N")]
    pub max_merge_attempts: Option<u32>,

    /// Maximum AI-review re-requests per run
    #[arg(long, value_name = "N")]
    pub max_review_retries: Option<u32>,

    /// How long an AI review may stay pending, in seconds
    #[arg(long, value_name = "SECS")]
    pub review_budget_secs: Option<u64>,

    /// Window the target branch must go without new commits, in seconds
    #[arg(long, value_name = "SECS")]
    pub stability_secs: Option<u64>,

    /// Timeout for the stability wait itself, in seconds
    #[arg(long, value_name = "SECS")]
    pub stability_timeout_secs: Option<u64>,

    /// Remote to fetch from and rebase against
    #[arg(long, default_value = "origin")]
    pub remote: String,

    /// Opaque correlation token, attached to diagnostic logs only
    #[arg(long)]
    pub session: Option<String>,
}

fn build_config(args: &RunArgs) -> MonitorConfig {
    let mut config = MonitorConfig::default();
    if let Some(secs) = args.poll_interval_secs {
        config.poll_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = args.timeout_secs {
        config.run_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = args.call_timeout_secs {
        config.call_timeout = Duration::from_secs(secs);
    }
    if let Some(n) = args.max_rebase_attempts {
        config.max_rebase_attempts = n;
    }
    if let Some(n) = args.max_merge_attempts {
        config.max_merge_attempts = n;
    }
    if let Some(n) = args.max_review_retries {
        config.max_review_retries = n;
    }
    if let Some(secs) = args.review_budget_secs {
        config.review_pending_budget = Duration::from_secs(secs);
    }
    if let Some(secs) = args.stability_secs {
        config.stability_duration = Duration::from_secs(secs);
    }
    if let Some(secs) = args.stability_timeout_secs {
        config.stability_timeout = Duration::from_secs(secs);
    }
    config.remote.clone_from(&args.remote);
    config.session.clone_from(&args.session);
    config
}

/// Run the monitor for each requested PR
pub async fn run(path: &Path, args: RunArgs) -> Result<ExitCode> {
    // Validate every identifier before any remote call or state write.
    let mut pr_numbers = Vec::with_capacity(args.prs.len());
    for raw in &args.prs {
        pr_numbers.push(validate_pr_number(raw)?);
    }

    let config = build_config(&args);
    if let Some(session) = &config.session {
        info!(session = %session, "session token attached");
    }

    let repo = GitRepo::open(path, config.call_timeout)?;
    let remote_url = repo.remote_url(&config.remote)?;
    let host_config = parse_repo_info(&remote_url)?;
    info!(
        owner = %host_config.owner,
        repo = %host_config.repo,
        "monitoring {} PR(s)",
        pr_numbers.len()
    );

    let auth = resolve_github_token()?;
    let host = GitHubHost::new(
        &auth.token,
        host_config,
        config.call_timeout,
        config.ai_reviewer_logins.clone(),
    )?;
    let store = StateStore::discover(path)?;

    let monitor = Arc::new(Monitor::new(
        Arc::new(host),
        Arc::new(repo),
        Arc::new(RateLimiter::default()),
        store,
        Arc::new(StdoutSink),
        config,
    ));

    // One independent loop per PR; the rate-limit cache is the only shared
    // mutable state.
    let handles: Vec<_> = pr_numbers
        .iter()
        .map(|&pr| {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move { (pr, monitor.run(pr).await) })
        })
        .collect();

    let mut any_failure = false;
    let mut any_timeout = false;
    for handle in handles {
        match handle.await {
            Ok((pr, result)) => {
                info!(
                    pr,
                    success = result.success,
                    rebase_count = result.rebase_count,
                    "{}",
                    result.message
                );
                if result.timed_out {
                    any_timeout = true;
                } else if !result.success {
                    any_failure = true;
                }
            }
            Err(e) => {
                warn!("monitor task aborted: {e}");
                any_failure = true;
            }
        }
    }

    let code = if any_failure {
        ExitCode::from(EXIT_FAILURE)
    } else if any_timeout {
        ExitCode::from(EXIT_TIMEOUT)
    } else {
        ExitCode::SUCCESS
    };
    Ok(code)
}
