//! JSON-RPC client for the aria2 daemon.
//!
//! aria2 exposes its control surface as JSON-RPC 2.0 over HTTP at
//! `http://<host>:<port>/jsonrpc`. The three methods this orchestrator needs
//! are `aria2.getVersion` (liveness probe), `aria2.addUri` (job submission)
//! and `aria2.shutdown` (graceful stop). When a shared secret is configured,
//! every call carries a `token:<secret>` first parameter.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::trace;

/// Timeout for individual RPC round trips.
const RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from the aria2 RPC boundary.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Connection-level failure (daemon absent, refused, timed out).
    #[error("aria2 RPC transport error calling {method}: {source}")]
    Transport {
        /// The RPC method that failed.
        method: &'static str,
        /// The underlying HTTP error.
        #[source]
        source: reqwest::Error,
    },

    /// The daemon answered with a JSON-RPC error object.
    #[error("aria2 rejected {method}: {message} (code {code})")]
    Rejected {
        /// The RPC method that was rejected.
        method: &'static str,
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    /// The response did not carry the expected result shape.
    #[error("malformed aria2 response for {method}")]
    Malformed {
        /// The RPC method whose response could not be decoded.
        method: &'static str,
    },
}

/// Per-job submission options understood by `aria2.addUri`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct AddUriOptions {
    /// Target directory override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    /// Output filename override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out: Option<String>,
}

/// The RPC surface of the aria2 daemon.
///
/// Kept as a trait so the supervisor and router can be exercised against a
/// canned fake in tests.
#[async_trait]
pub trait Aria2Rpc: Send + Sync {
    /// Liveness probe; returns the daemon version string.
    async fn get_version(&self) -> Result<String, RpcError>;

    /// Submits URIs for download; returns the daemon-assigned job id (gid).
    /// Fire-and-forget: the transfer itself is not awaited.
    async fn add_uri(&self, uris: &[String], options: AddUriOptions) -> Result<String, RpcError>;

    /// Asks the daemon to shut down gracefully.
    async fn shutdown(&self) -> Result<(), RpcError>;
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<RpcFailure>,
}

#[derive(Debug, Deserialize)]
struct RpcFailure {
    code: i64,
    message: String,
}

/// HTTP-backed [`Aria2Rpc`] implementation.
pub struct HttpRpcClient {
    endpoint: String,
    secret: String,
    http: reqwest::Client,
}

impl HttpRpcClient {
    /// Builds a client for `host:port`. `host` may carry an `http://` scheme
    /// prefix (the daemon config traditionally includes it); one is added
    /// when absent.
    #[must_use]
    pub fn new(host: &str, port: u16, secret: &str) -> Self {
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("http://{host}")
        };
        let http = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            endpoint: format!("{base}:{port}/jsonrpc"),
            secret: secret.to_string(),
            http,
        }
    }

    /// RPC endpoint URL, exposed for logging.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Issues one JSON-RPC call, prepending the secret token when configured.
    async fn call(&self, method: &'static str, mut params: Vec<Value>) -> Result<Value, RpcError> {
        if !self.secret.is_empty() {
            params.insert(0, json!(format!("token:{}", self.secret)));
        }
        let body = json!({
            "jsonrpc": "2.0",
            "id": "mqfetch",
            "method": method,
            "params": params,
        });
        trace!(%method, endpoint = %self.endpoint, "aria2 RPC call");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|source| RpcError::Transport { method, source })?;

        let envelope: RpcEnvelope = response
            .json()
            .await
            .map_err(|source| RpcError::Transport { method, source })?;

        if let Some(failure) = envelope.error {
            return Err(RpcError::Rejected {
                method,
                code: failure.code,
                message: failure.message,
            });
        }
        envelope.result.ok_or(RpcError::Malformed { method })
    }
}

#[async_trait]
impl Aria2Rpc for HttpRpcClient {
    async fn get_version(&self) -> Result<String, RpcError> {
        let method = "aria2.getVersion";
        let result = self.call(method, Vec::new()).await?;
        result
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(RpcError::Malformed { method })
    }

    async fn add_uri(&self, uris: &[String], options: AddUriOptions) -> Result<String, RpcError> {
        let method = "aria2.addUri";
        let options =
            serde_json::to_value(&options).map_err(|_| RpcError::Malformed { method })?;
        let result = self.call(method, vec![json!(uris), options]).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or(RpcError::Malformed { method })
    }

    async fn shutdown(&self) -> Result<(), RpcError> {
        self.call("aria2.shutdown", Vec::new()).await.map(|_| ())
    }
}
