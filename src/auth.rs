//! GitHub authentication
//!
//! Supports environment variables and CLI-based auth (gh).

use crate::error::{Error, Result};

/// Source of the authentication token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSource {
    /// Token from an environment variable
    EnvVar,
    /// Token from the gh CLI
    Cli,
}

/// A resolved token and where it came from
#[derive(Debug, Clone)]
pub struct Auth {
    /// The token itself
    pub token: String,
    /// Where the token was found
    pub source: AuthSource,
}

/// Resolve a GitHub token from `GITHUB_TOKEN`, `GH_TOKEN`, or `gh auth token`
pub fn resolve_github_token() -> Result<Auth> {
    for var in ["GITHUB_TOKEN", "GH_TOKEN"] {
        if let Ok(token) = std::env::var(var) {
            let token = token.trim().to_string();
            if !token.is_empty() {
                return Ok(Auth {
                    token,
                    source: AuthSource::EnvVar,
                });
            }
        }
    }

    let output = std::process::Command::new("gh")
        .args(["auth", "token"])
        .output()
        .map_err(|e| Error::Auth(format!("failed to run gh: {e}")))?;

    if !output.status.success() {
        return Err(Error::Auth(
            "no token in GITHUB_TOKEN/GH_TOKEN and 'gh auth token' failed; \
             run 'gh auth login' or export a token"
                .to_string(),
        ));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(Error::Auth("gh returned an empty token".to_string()));
    }

    Ok(Auth {
        token,
        source: AuthSource::Cli,
    })
}
