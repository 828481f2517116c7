//! mqfetch core library
//!
//! Bridges an MQTT message bus and a set of download backends: job requests
//! ("fetch this URL") arrive on a request topic, each one is classified and
//! routed to exactly one backend, and a structured completion or error event
//! is published back on the completion topic.
//!
//! # Architecture
//!
//! - [`classify`] - URL classification (playlist / magnet / http / invalid)
//! - [`filename`] - filesystem-safe, byte-bounded output names
//! - [`aria2`] - lifecycle supervisor and JSON-RPC client for the aria2 daemon
//! - [`router`] - backend dispatch producing one outcome per job
//! - [`ingress`] - non-blocking ingress queue and the sequential worker
//! - [`bus`] - MQTT transport: subscription, enqueue-only receive path, publisher
//! - [`event`] - job model and the fixed-shape completion event
//! - [`config`] - layered settings (CLI > file > env > defaults)

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod aria2;
pub mod bus;
pub mod classify;
pub mod config;
pub mod event;
pub mod filename;
pub mod ingress;
pub mod router;

// Re-export commonly used types
pub use aria2::{Aria2Rpc, Aria2Supervisor, DaemonState, SubmissionError};
pub use bus::{EventSink, MqttPublisher, PublishError};
pub use classify::{Kind, classify, extract_url};
pub use config::Settings;
pub use event::{CompletionEvent, Job};
pub use ingress::{InboundMessage, Worker};
pub use router::{DownloadOutcome, HelperError, PlaylistFetcher, Router};
