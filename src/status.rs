//! Run status side-channel.
//!
//! The backend publishes plain tokens on a per-run status topic: a run status
//! (`QUEUED`, `RUNNING`, `COMPLETED`, `FAILED`, `CANCELLED`) or a threshold
//! verdict (`VERDICT:<value>`). These are not samples; a consumer uses them to
//! decide when to stop streaming and fetch the final persisted snapshot.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::sample::{RunKind, SubjectId, SubjectStatus};
use crate::transport::{ChannelEvent, TopicSubscription, Transport};

/// Lifecycle status of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// `true` once no further samples will be produced.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn subject_status(self) -> SubjectStatus {
        if self.is_terminal() {
            SubjectStatus::Terminal
        } else {
            SubjectStatus::Active
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(RunStatus::Queued),
            "RUNNING" => Ok(RunStatus::Running),
            "COMPLETED" => Ok(RunStatus::Completed),
            "FAILED" => Ok(RunStatus::Failed),
            "CANCELLED" | "CANCELED" => Ok(RunStatus::Cancelled),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Queued => "QUEUED",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// One parsed token from the status topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Status(RunStatus),
    /// Threshold verdict, e.g. `PASSED` / `FAILED`.
    Verdict(String),
}

impl StatusEvent {
    /// Parse a raw token. JSON-quoted tokens are accepted too.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim().trim_matches('"');
        if let Some(verdict) = token.strip_prefix("VERDICT:") {
            let verdict = verdict.trim();
            return (!verdict.is_empty()).then(|| StatusEvent::Verdict(verdict.to_string()));
        }
        token.parse().ok().map(StatusEvent::Status)
    }
}

/// Parsed view of a run's status topic.
#[derive(Debug)]
pub struct StatusFeed {
    subscription: TopicSubscription,
}

impl StatusFeed {
    /// Subscribe to the status topic of `subject`, a run of kind `run`.
    pub fn open<T: Transport + ?Sized>(transport: &T, run: RunKind, subject: SubjectId) -> Self {
        Self {
            subscription: transport.subscribe(&run.status_topic(subject)),
        }
    }

    /// Next status event. Connectivity changes and unknown tokens are skipped.
    pub async fn next(&mut self) -> Option<StatusEvent> {
        loop {
            match self.subscription.next_event().await? {
                ChannelEvent::Message(body) => match StatusEvent::parse(&body) {
                    Some(event) => return Some(event),
                    None => debug!(
                        topic = %self.subscription.topic(),
                        token = %body,
                        "ignoring unknown status token"
                    ),
                },
                ChannelEvent::Connected | ChannelEvent::Disconnected => {}
            }
        }
    }

    pub fn close(&mut self) {
        self.subscription.close();
    }
}
