//! Error types for pr-sentinel

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while monitoring a pull request
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid pull request identifier supplied by the caller
    #[error("invalid PR number: {0}")]
    InvalidPrNumber(String),

    /// GitHub API error (REST or GraphQL)
    #[error("GitHub API error: {0}")]
    GitHubApi(String),

    /// Local git command failed
    #[error("git error: {0}")]
    Git(String),

    /// Authentication could not be resolved
    #[error("authentication error: {0}")]
    Auth(String),

    /// Remote URL could not be parsed into owner/repo
    #[error("remote error: {0}")]
    Remote(String),

    /// State store read/write failure
    #[error("state store error: {0}")]
    StateStore(String),

    /// Internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}
