//! Ingress queue and the sequential worker.
//!
//! Message arrival and message processing are decoupled by an unbounded
//! channel: the bus task only enqueues, the worker drains one item at a time.
//! Item N+1 is not dequeued until item N's entire classify-route-publish
//! cycle has completed, which gives strict per-process FIFO ordering and at
//! most one in-flight download for the synchronous playlist backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::bus::EventSink;
use crate::classify::{self, Kind};
use crate::event::{CompletionEvent, Job, JobRequest, unix_seconds};
use crate::filename::{self, MAX_OUTPUT_NAME_BYTES};
use crate::router::{DownloadOutcome, Router};

/// Bounded poll interval so the stop flag is observed promptly while the
/// queue is empty.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One raw message as captured by the bus receive path.
#[derive(Debug)]
pub struct InboundMessage {
    /// Raw payload bytes as received.
    pub payload: Vec<u8>,
    /// Arrival wall-clock time, fractional seconds since epoch.
    pub received_at: f64,
}

/// Sending half of the ingress queue; held by the bus task.
pub type IngressSender = mpsc::UnboundedSender<InboundMessage>;
/// Receiving half of the ingress queue; owned by the worker.
pub type IngressReceiver = mpsc::UnboundedReceiver<InboundMessage>;

/// Creates the ingress hand-off channel.
#[must_use]
pub fn channel() -> (IngressSender, IngressReceiver) {
    mpsc::unbounded_channel()
}

/// The single worker draining the ingress queue.
pub struct Worker {
    router: Router,
    sink: Box<dyn EventSink>,
    stop: Arc<AtomicBool>,
}

impl Worker {
    /// Builds a worker over the router and event sink.
    pub fn new(router: Router, sink: Box<dyn EventSink>, stop: Arc<AtomicBool>) -> Self {
        Self { router, sink, stop }
    }

    /// Drains the queue until the stop flag is set or the channel closes.
    ///
    /// The current item is always finished before the flag is honored; items
    /// still queued at shutdown are dropped.
    pub async fn run(self, mut rx: IngressReceiver) {
        info!("ingress worker started");
        while !self.stop.load(Ordering::SeqCst) {
            match timeout(POLL_INTERVAL, rx.recv()).await {
                Err(_) => {} // poll timeout; re-check the stop flag
                Ok(None) => break,
                Ok(Some(message)) => {
                    debug!("dequeued message for processing");
                    self.process(message).await;
                }
            }
        }
        info!("ingress worker stopped");
    }

    /// Runs one full message cycle. Failures are isolated per message: every
    /// path either publishes exactly one event or logs a drop, and never
    /// propagates.
    #[instrument(skip(self, message), fields(received_at = message.received_at))]
    async fn process(&self, message: InboundMessage) {
        let payload = String::from_utf8_lossy(&message.payload);

        let Some((url, name)) = parse_request(&payload) else {
            // No usable URL in the payload. Dropped, not published.
            warn!(payload = %payload, "no valid URL found in message, dropping");
            return;
        };

        let kind = classify::classify(&url);
        if kind == Kind::Invalid {
            // A URL was present but no backend recognizes it. Dropped, not published.
            warn!(%url, "unrecognized URL scheme, dropping");
            return;
        }

        let job = Job {
            url,
            name,
            kind,
            received_at: message.received_at,
        };
        info!(url = %job.url, kind = %job.kind, name = ?job.name, "processing job");

        let output_name = output_name_for(&job);
        let outcome = self.router.route(job.kind, &job.url, &output_name).await;

        let event = match outcome {
            DownloadOutcome::Success {
                file_path,
                download_url,
            } => CompletionEvent::success(&job, file_path, download_url),
            DownloadOutcome::Error { message } => {
                CompletionEvent::error(&job, &output_name, message)
            }
        };

        // A publish failure closes the job anyway; nothing is retried.
        if let Err(err) = self.sink.publish(&event).await {
            error!(error = %err, url = %job.url, "failed to publish completion event");
        }
    }
}

/// Extracts `(url, name)` from a payload. Valid JSON must carry a non-empty
/// `url` field or the message is dropped; the raw-text URL scan applies only
/// to payloads that are not JSON at all (no name hint in that case).
fn parse_request(payload: &str) -> Option<(String, Option<String>)> {
    match serde_json::from_str::<JobRequest>(payload) {
        Ok(request) => {
            let url = request.url.filter(|u| !u.is_empty())?;
            Some((url, request.name.filter(|n| !n.is_empty())))
        }
        Err(_) => classify::extract_url(payload).map(|url| (url.to_string(), None)),
    }
}

/// Derives the sanitized, byte-bounded output filename for a job: the name
/// hint, or `file_<unix-seconds>` when the message carried none.
fn output_name_for(job: &Job) -> String {
    let candidate = job
        .name
        .clone()
        .unwrap_or_else(|| format!("file_{}", unix_seconds()));
    filename::truncate_filename(&filename::sanitize_filename(&candidate), MAX_OUTPUT_NAME_BYTES)
}
