//! Review comment and thread classification
//!
//! Comments are partitioned into in-scope / out-of-scope against the diff
//! the PR currently covers. The partition is recomputed every poll, so a
//! rebase that changes the diff can move a comment between partitions.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::ScopePolicy;
use crate::types::{ReviewComment, ReviewThread};

/// Review comments partitioned by diff-scope membership
#[derive(Debug, Clone, Default)]
pub struct ClassifiedComments {
    /// Comments anchored inside the PR's current diff
    pub in_scope: Vec<ReviewComment>,
    /// Comments outside the current diff (stale anchors, PR-level chatter)
    pub out_of_scope: Vec<ReviewComment>,
}

fn in_scope(path: Option<&str>, line: Option<u64>, changed_files: &[String], policy: ScopePolicy) -> bool {
    let Some(path) = path else {
        // PR-level records have no anchor and never block on scope grounds.
        return false;
    };
    let file_changed = changed_files.iter().any(|f| f == path);
    match policy {
        ScopePolicy::ChangedFiles => file_changed,
        ScopePolicy::ChangedLines => file_changed && line.is_some(),
    }
}

/// Partition `comments` against the current changed-file set
pub fn classify_comments(
    comments: &[ReviewComment],
    changed_files: &[String],
    policy: ScopePolicy,
) -> ClassifiedComments {
    let mut classified = ClassifiedComments::default();
    for comment in comments {
        if in_scope(comment.path.as_deref(), comment.line, changed_files, policy) {
            classified.in_scope.push(comment.clone());
        } else {
            classified.out_of_scope.push(comment.clone());
        }
    }
    classified
}

/// Unresolved threads that block merging: only those inside the current diff
pub fn blocking_threads<'a>(
    threads: &'a [ReviewThread],
    changed_files: &[String],
    policy: ScopePolicy,
) -> Vec<&'a ReviewThread> {
    threads
        .iter()
        .filter(|t| !t.is_resolved)
        .filter(|t| in_scope(t.path.as_deref(), t.line, changed_files, policy))
        .collect()
}

fn inline_code_pattern() -> &'static Regex {
    static INLINE: OnceLock<Regex> = OnceLock::new();
    INLINE.get_or_init(|| Regex::new(r"`[^`\n]*`").expect("static regex"))
}

/// Remove fenced code blocks and inline code spans from comment text.
///
/// Scanning for checkbox or keyword tokens must not match example code that
/// merely contains them.
pub fn strip_code_regions(text: &str) -> String {
    let mut out = Vec::new();
    let mut in_fence = false;
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        out.push(inline_code_pattern().replace_all(line, "").into_owned());
    }
    out.join("\n")
}

/// Whether comment text still carries unchecked task boxes
pub fn has_open_tasks(text: &str) -> bool {
    strip_code_regions(text)
        .lines()
        .map(str::trim_start)
        .any(|line| line.starts_with("- [ ]") || line.starts_with("* [ ]"))
}
