//! Status command - inspect a persisted monitor run
//!
//! Reads the state file written by a (possibly still running) monitor and
//! reports it. Never contacts the remote API.

use std::path::Path;
use std::process::ExitCode;

use anstream::println;
use clap::Args;

use pr_sentinel::error::{Error, Result};
use pr_sentinel::store::{validate_pr_number, StateStore};

use crate::cli::style::Stylize;
use crate::cli::EXIT_FAILURE;

/// Options for the status command
#[derive(Debug, Args)]
pub struct StatusArgs {
    /// PR number to inspect
    #[arg(value_name = "PR")]
    pub pr: String,

    /// Print the raw JSON record instead of a summary
    #[arg(long)]
    pub json: bool,
}

/// Show persisted status for one PR
pub fn run(path: &Path, args: &StatusArgs) -> Result<ExitCode> {
    let pr_number = validate_pr_number(&args.pr)?;
    let store = StateStore::discover(path)?;

    let Some(record) = store.load(pr_number)? else {
        println!(
            "{}",
            format!("No monitor state for PR #{pr_number}").muted()
        );
        return Ok(ExitCode::from(EXIT_FAILURE));
    };

    if args.json {
        let raw = serde_json::to_string_pretty(&record)
            .map_err(|e| Error::Internal(format!("failed to render record: {e}")))?;
        println!("{raw}");
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "{} {}",
        "PR".emphasis(),
        format!("#{}", record.pr_number).accent()
    );
    println!("  Phase:        {}", record.phase.to_string().emphasis());
    println!("  Rebases:      {}", record.rebase_count);
    println!("  Merge tries:  {}", record.merge_attempts);
    if let Some(state) = record.last_merge_state {
        println!("  Merge state:  {state}");
    }
    if let Some(checks) = record.last_check_status {
        println!("  Checks:       {checks}");
    }
    if let Some(message) = &record.last_message {
        println!("  Last note:    {}", message.muted());
    }
    println!("  Started:      {}", record.started_at.to_rfc3339().muted());
    println!("  Updated:      {}", record.updated_at.to_rfc3339().muted());

    Ok(ExitCode::SUCCESS)
}
