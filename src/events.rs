//! The structured event stream
//!
//! Every externally meaningful transition becomes exactly one
//! [`MonitorEvent`], serialized as one JSON object per line on stdout. The
//! stream is the authoritative record of a run's outcome; stderr diagnostics
//! are never parsed by the consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Closed set of event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The PR's branch fell behind its target
    BehindDetected,
    /// The PR has merge conflicts
    DirtyDetected,
    /// All requested reviews completed
    ReviewCompleted,
    /// An AI review exceeded its wait budget
    ReviewError,
    /// CI reported a failure
    CiFailed,
    /// CI reached success
    CiPassed,
    /// The PR was merged
    Merged,
    /// The overall run timeout elapsed
    Timeout,
    /// Any other terminal error
    Error,
}

/// One emitted event record
///
/// Created once per transition, serialized immediately, and not retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorEvent {
    /// Event type
    pub event: EventKind,
    /// PR this event concerns
    pub pr_number: u64,
    /// When the transition occurred
    pub timestamp: DateTime<Utc>,
    /// Human-readable description
    pub message: String,
    /// Free-form extra fields
    pub details: serde_json::Map<String, serde_json::Value>,
    /// Optional hint for the operator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl MonitorEvent {
    /// Create an event with an empty details map
    pub fn new(event: EventKind, pr_number: u64, message: impl Into<String>) -> Self {
        Self {
            event,
            pr_number,
            timestamp: Utc::now(),
            message: message.into(),
            details: serde_json::Map::new(),
            suggested_action: None,
        }
    }

    /// Attach a detail field
    #[must_use]
    pub fn with_detail(mut self, key: &str, value: serde_json::Value) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }

    /// Attach a suggested action
    #[must_use]
    pub fn with_suggestion(mut self, action: impl Into<String>) -> Self {
        self.suggested_action = Some(action.into());
        self
    }
}

/// Destination for emitted events
pub trait EventSink: Send + Sync {
    /// Emit one event. Implementations capture their own failures; emission
    /// never fails the monitor.
    fn emit(&self, event: &MonitorEvent);
}

/// Sink writing one JSON object per line to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn emit(&self, event: &MonitorEvent) {
        use std::io::Write;

        match serde_json::to_string(event) {
            Ok(line) => {
                let stdout = std::io::stdout();
                let mut handle = stdout.lock();
                if let Err(e) = writeln!(handle, "{line}").and_then(|()| handle.flush()) {
                    warn!("failed to write event to stdout: {e}");
                }
            }
            Err(e) => warn!("failed to serialize event: {e}"),
        }
    }
}
