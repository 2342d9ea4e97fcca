//! Call plumbing shared by the GraphQL and REST paths
//!
//! Failures never cross this boundary as errors: every call is folded into a
//! [`CallResult`] carrying a success flag and the response or error text, so
//! callers can make policy decisions (fallback, retry, fail) on the kind of
//! failure rather than on an exception.

use std::future::Future;
use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

/// Substrings that identify a rate-limit or abuse-detection failure.
const RATE_LIMIT_INDICATORS: &[&str] = &[
    "rate limited",
    "rate limit exceeded",
    "secondary rate limit",
    "abuse detection",
    "too many requests",
];

/// Result of a single API call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResult {
    /// Whether the call succeeded
    pub success: bool,
    /// Response text on success, flattened error text on failure
    pub output: String,
}

impl CallResult {
    /// A successful call carrying its response text
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    /// A failed call carrying its error text
    pub fn err(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Result of a call that may have gone through the REST fallback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    /// Whether the call (primary or fallback) succeeded
    pub success: bool,
    /// Output of whichever call the outcome reports
    pub output: String,
    /// Whether the fallback was attempted, even if it did not help
    pub used_fallback: bool,
}

fn url_pattern() -> &'static Regex {
    static URL: OnceLock<Regex> = OnceLock::new();
    URL.get_or_init(|| Regex::new(r"https?://\S+").expect("static regex"))
}

/// Remove URL substrings from each line of `text`.
///
/// GitHub error bodies embed `documentation_url` links whose paths mention
/// rate limits; those must not count as rate-limit indicators.
pub fn strip_urls(text: &str) -> String {
    text.lines()
        .map(|line| url_pattern().replace_all(line, "").into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether failure text indicates the remote rejected us for quota/abuse.
///
/// URLs are stripped first so a documentation link that merely mentions rate
/// limits does not trigger a false positive.
pub fn is_rate_limit_error(text: &str) -> bool {
    let stripped = strip_urls(text).to_ascii_lowercase();
    RATE_LIMIT_INDICATORS
        .iter()
        .any(|needle| stripped.contains(needle))
}

/// Run `primary`, falling back to `fallback` when the failure is a rate limit.
///
/// Accounting rules:
/// - primary succeeds: its output, `used_fallback = false`
/// - primary fails for a non-quota reason: its output, `used_fallback = false`
/// - rate-limited and fallback succeeds: fallback output, `used_fallback = true`
/// - rate-limited and fallback fails (or none given): the *primary* failure is
///   reported, with `used_fallback` recording whether fallback was attempted
pub async fn call_with_fallback<P, F, Fut>(primary: P, fallback: Option<F>) -> CallOutcome
where
    P: Future<Output = CallResult>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = CallResult>,
{
    let result = primary.await;
    if result.success {
        return CallOutcome {
            success: true,
            output: result.output,
            used_fallback: false,
        };
    }

    if !is_rate_limit_error(&result.output) {
        return CallOutcome {
            success: false,
            output: result.output,
            used_fallback: false,
        };
    }

    let Some(fallback) = fallback else {
        return CallOutcome {
            success: false,
            output: result.output,
            used_fallback: false,
        };
    };

    warn!("rate limit hit on structured call, trying REST fallback");
    let fb = fallback().await;
    if fb.success {
        CallOutcome {
            success: true,
            output: fb.output,
            used_fallback: true,
        }
    } else {
        // Report the original failure; the caller still learns fallback was tried.
        CallOutcome {
            success: false,
            output: result.output,
            used_fallback: true,
        }
    }
}
