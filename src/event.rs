//! Job model and the fixed-shape completion event.
//!
//! One inbound message yields at most one [`Job`]; one job yields exactly one
//! [`CompletionEvent`], published on the completion topic regardless of
//! success or failure. Jobs are immutable once constructed and are discarded
//! after their event is published; there is no retained history.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::classify::Kind;

/// Inbound request payload: one JSON object per message.
#[derive(Debug, Deserialize)]
pub struct JobRequest {
    /// Resource to download. Required and non-empty.
    pub url: Option<String>,
    /// Display / target filename hint.
    pub name: Option<String>,
}

/// One unit of work derived from one inbound message.
#[derive(Debug, Clone)]
pub struct Job {
    /// The resource URL, as extracted from the message.
    pub url: String,
    /// Optional filename hint from the message.
    pub name: Option<String>,
    /// Classification, computed once and never mutated after.
    pub kind: Kind,
    /// Wall-clock capture time, seconds since epoch with fractional part.
    pub received_at: f64,
}

/// Outcome status labels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// The download completed (playlist) or was accepted (daemon paths).
    Success,
    /// The backend reported a failure.
    Error,
}

/// Completion event published on the outbound topic.
///
/// Field shape is fixed: consumers rely on `file_path` being present only on
/// success and `message` only on error. `download_url` may be empty (no
/// configured prefix, or a magnet source with no deterministic file path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEvent {
    /// `success` or `error`.
    pub status: EventStatus,
    /// The original request URL.
    pub url: String,
    /// Filename, or empty when the request carried no name hint.
    pub name: String,
    /// Path of the downloaded file; success only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Public URL derived from the configured prefix; success only, may be empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Human-readable failure reason; error only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Event creation time, unix seconds.
    pub timestamp: u64,
    /// Message arrival time, seconds since epoch with fractional part.
    pub receive_time: f64,
}

impl CompletionEvent {
    /// Builds a success event for `job`.
    #[must_use]
    pub fn success(job: &Job, file_path: String, download_url: String) -> Self {
        Self {
            status: EventStatus::Success,
            url: job.url.clone(),
            name: job.name.clone().unwrap_or_default(),
            file_path: Some(file_path),
            download_url: Some(download_url),
            message: None,
            timestamp: unix_seconds(),
            receive_time: job.received_at,
        }
    }

    /// Builds an error event for `job`. `output_name` is the filename the
    /// download would have produced.
    #[must_use]
    pub fn error(job: &Job, output_name: &str, message: String) -> Self {
        Self {
            status: EventStatus::Error,
            url: job.url.clone(),
            name: output_name.to_string(),
            file_path: None,
            download_url: None,
            message: Some(message),
            timestamp: unix_seconds(),
            receive_time: job.received_at,
        }
    }
}

/// Current wall clock as whole unix seconds.
#[must_use]
pub fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current wall clock as fractional seconds since epoch.
#[must_use]
pub fn epoch_seconds_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
