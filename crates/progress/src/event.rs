//! Progress event shape

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// What a progress event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A token was renewed ahead of expiry by the preventive job
    Preventive,
    /// A token was refreshed on the request path or by forced refresh
    Refreshed,
    /// A quarantined account was recovered (or a recovery attempt failed)
    Recovery,
    /// Progress of a multi-account synchronization job
    SyncProgress,
    /// A refresh failed; `requires_reconnection` says whether the user must act
    Error,
}

/// One progress event, delivered at-most-once to currently-connected
/// listeners of its subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub subject_id: String,
    pub kind: EventKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetched: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_reconnection: bool,
    /// Unix timestamp in milliseconds at publish time
    pub timestamp: u64,
}

impl ProgressEvent {
    /// New event with the current timestamp and no numeric fields.
    pub fn new(subject_id: impl Into<String>, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            kind,
            message: message.into(),
            current: None,
            total: None,
            fetched: None,
            expected: None,
            requires_reconnection: false,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }

    /// Error event flagged as requiring user reconnection.
    pub fn reconnection_required(subject_id: impl Into<String>, message: impl Into<String>) -> Self {
        let mut event = Self::new(subject_id, EventKind::Error, message);
        event.requires_reconnection = true;
        event
    }

    /// Attach current/total counters (sync job style).
    pub fn with_progress(mut self, current: u64, total: u64) -> Self {
        self.current = Some(current);
        self.total = Some(total);
        self
    }

    /// Attach fetched/expected counters (ingestion style).
    pub fn with_counts(mut self, fetched: u64, expected: u64) -> Self {
        self.fetched = Some(fetched);
        self.expected = Some(expected);
        self
    }
}
