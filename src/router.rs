//! Backend dispatch: one classified job in, one outcome out.
//!
//! Playlists run through the one-shot `m3u8-downloader` helper process and
//! block until it exits. Magnet and http jobs are submitted to the aria2
//! daemon fire-and-forget: the success outcome is produced the moment the
//! daemon *accepts* the job, not when the file exists on disk. That means a
//! published `download_url` can 404 until the transfer finishes - a known
//! limitation preserved from the wire contract, not a bug to fix here.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, instrument, warn};

use crate::aria2::Aria2Supervisor;
use crate::classify::Kind;
use crate::filename;

/// Suffix the playlist helper appends to its output stem.
const PLAYLIST_OUTPUT_SUFFIX: &str = ".mp4";

/// Result of attempting one job. Created exactly once per job, consumed
/// exactly once by the publisher, never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The backend completed (playlist) or accepted (daemon) the job.
    Success {
        /// Declared output path or filename.
        file_path: String,
        /// Public URL (prefix + path); empty when no prefix is configured or
        /// the source was a magnet link.
        download_url: String,
    },
    /// The backend failed; `message` carries the diagnostic.
    Error {
        /// Human-readable failure reason.
        message: String,
    },
}

/// Failure of the one-shot playlist helper process.
#[derive(Debug, Error)]
pub enum HelperError {
    /// The helper binary could not be spawned at all.
    #[error("failed to spawn playlist helper: {0}")]
    Spawn(#[from] std::io::Error),

    /// The helper ran but exited non-zero.
    #[error("playlist helper exited with status {status:?}: {diagnostic}")]
    Failed {
        /// Process exit code, when one was reported.
        status: Option<i32>,
        /// Captured stderr (or stdout when stderr was empty).
        diagnostic: String,
    },
}

/// Capability seam for the streaming-playlist backend.
///
/// The production implementation spawns an external process; tests substitute
/// a fake returning canned results.
#[async_trait]
pub trait PlaylistFetcher: Send + Sync {
    /// Downloads `url` to `<save_dir>/<output_stem>.mp4`, blocking for the
    /// full process duration. Returns the declared output path.
    async fn fetch(&self, url: &str, output_stem: &str, save_dir: &Path)
    -> Result<String, HelperError>;
}

/// [`PlaylistFetcher`] backed by the `m3u8-downloader` helper binary,
/// invoked as `m3u8-downloader -u <url> -o <stem> -sp <dir>`.
pub struct M3u8CommandFetcher {
    binary: String,
}

impl M3u8CommandFetcher {
    /// Uses the default `m3u8-downloader` binary from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_binary("m3u8-downloader")
    }

    /// Uses a custom helper binary path.
    #[must_use]
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for M3u8CommandFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlaylistFetcher for M3u8CommandFetcher {
    #[instrument(skip(self), fields(binary = %self.binary))]
    async fn fetch(
        &self,
        url: &str,
        output_stem: &str,
        save_dir: &Path,
    ) -> Result<String, HelperError> {
        let mut command = Command::new(&self.binary);
        command.arg("-u").arg(url).arg("-o").arg(output_stem);
        if !save_dir.as_os_str().is_empty() {
            command.arg("-sp").arg(save_dir);
        }
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        info!(%url, %output_stem, "invoking playlist helper");

        let output = command.output().await?;
        if output.status.success() {
            let declared = format!("{output_stem}{PLAYLIST_OUTPUT_SUFFIX}");
            info!(file = %declared, "playlist download complete");
            return Ok(declared);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let diagnostic = if stderr.trim().is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        Err(HelperError::Failed {
            status: output.status.code(),
            diagnostic,
        })
    }
}

/// Routes one classified job to exactly one backend.
pub struct Router {
    playlist: Box<dyn PlaylistFetcher>,
    daemon: Arc<Aria2Supervisor>,
    download_dir: PathBuf,
    url_prefix: Option<String>,
}

impl Router {
    /// Builds a router over the given backends.
    ///
    /// `url_prefix`, when set, is prepended to the output filename to form
    /// the published `download_url` for http jobs.
    pub fn new(
        playlist: Box<dyn PlaylistFetcher>,
        daemon: Arc<Aria2Supervisor>,
        download_dir: impl Into<PathBuf>,
        url_prefix: Option<String>,
    ) -> Self {
        Self {
            playlist,
            daemon,
            download_dir: download_dir.into(),
            url_prefix: url_prefix.filter(|p| !p.is_empty()),
        }
    }

    /// Dispatches one job and normalizes the result.
    ///
    /// `output_name` is the sanitized target filename derived upstream from
    /// the name hint (or a timestamp fallback). Invalid jobs are filtered
    /// before a job is constructed and never reach this method.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn route(&self, kind: Kind, url: &str, output_name: &str) -> DownloadOutcome {
        match kind {
            Kind::Playlist => self.route_playlist(url, output_name).await,
            Kind::Magnet => self.route_daemon(url, output_name, false).await,
            Kind::Http => {
                let reconciled = reconcile_extension(url, output_name);
                self.route_daemon(url, &reconciled, true).await
            }
            Kind::Invalid => {
                // Filtered upstream; kept total so the dispatch table is closed.
                warn!("invalid job reached the router");
                DownloadOutcome::Error {
                    message: "invalid job".to_string(),
                }
            }
        }
    }

    async fn route_playlist(&self, url: &str, output_name: &str) -> DownloadOutcome {
        // The helper appends its own extension; strip a hint-provided one.
        let stem = output_name
            .strip_suffix(PLAYLIST_OUTPUT_SUFFIX)
            .unwrap_or(output_name);
        match self.playlist.fetch(url, stem, &self.download_dir).await {
            Ok(file_path) => {
                let download_url = self
                    .url_prefix
                    .as_deref()
                    .map(|prefix| format!("{prefix}{file_path}"))
                    .unwrap_or_default();
                DownloadOutcome::Success {
                    file_path,
                    download_url,
                }
            }
            Err(err) => {
                warn!(error = %err, "playlist download failed");
                DownloadOutcome::Error {
                    message: err.to_string(),
                }
            }
        }
    }

    async fn route_daemon(
        &self,
        url: &str,
        output_name: &str,
        with_public_url: bool,
    ) -> DownloadOutcome {
        match self
            .daemon
            .submit(url, Some(&self.download_dir), Some(output_name))
            .await
        {
            Ok(_gid) => {
                let download_url = if with_public_url {
                    self.url_prefix
                        .as_deref()
                        .map(|prefix| format!("{prefix}{output_name}"))
                        .unwrap_or_default()
                } else {
                    // Magnet sources have no deterministic single-file path.
                    String::new()
                };
                DownloadOutcome::Success {
                    file_path: output_name.to_string(),
                    download_url,
                }
            }
            Err(err) => {
                warn!(error = %err, "daemon submission failed");
                DownloadOutcome::Error {
                    message: err.to_string(),
                }
            }
        }
    }
}

/// Reconciles the output name's extension with the one implied by the URL.
///
/// A wrong extension corrupts later delivery over HTTP, so when they differ
/// the URL's extension wins and is appended rather than silently dropped.
fn reconcile_extension(url: &str, output_name: &str) -> String {
    let Some(url_ext) = filename::extension_from_url(url) else {
        return output_name.to_string();
    };
    // Extensions are compared case-insensitively; `.BIN` already matches a
    // `.bin` URL and the hint's own casing is kept.
    if filename::extension_of(output_name)
        .is_some_and(|ext| ext.eq_ignore_ascii_case(&url_ext))
    {
        return output_name.to_string();
    }
    format!("{output_name}{url_ext}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::aria2::{AddUriOptions, Aria2Rpc, RpcError};

    struct FakeFetcher {
        result: Result<(), &'static str>,
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl PlaylistFetcher for FakeFetcher {
        async fn fetch(
            &self,
            url: &str,
            output_stem: &str,
            _save_dir: &Path,
        ) -> Result<String, HelperError> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), output_stem.to_string()));
            match self.result {
                Ok(()) => Ok(format!("{output_stem}.mp4")),
                Err(diag) => Err(HelperError::Failed {
                    status: Some(1),
                    diagnostic: diag.to_string(),
                }),
            }
        }
    }

    struct FakeRpc {
        accept: bool,
        submissions: Mutex<Vec<(Vec<String>, Option<String>)>>,
    }

    #[async_trait]
    impl Aria2Rpc for FakeRpc {
        async fn get_version(&self) -> Result<String, RpcError> {
            Ok("1.37.0".to_string())
        }

        async fn add_uri(
            &self,
            uris: &[String],
            options: AddUriOptions,
        ) -> Result<String, RpcError> {
            self.submissions
                .lock()
                .unwrap()
                .push((uris.to_vec(), options.out));
            if self.accept {
                Ok("gid-42".to_string())
            } else {
                Err(RpcError::Malformed {
                    method: "aria2.addUri",
                })
            }
        }

        async fn shutdown(&self) -> Result<(), RpcError> {
            Ok(())
        }
    }

    fn router_with(
        fetcher_result: Result<(), &'static str>,
        daemon_accepts: bool,
        url_prefix: Option<&str>,
    ) -> Router {
        let daemon = Arc::new(Aria2Supervisor::new(
            Box::new(FakeRpc {
                accept: daemon_accepts,
                submissions: Mutex::new(Vec::new()),
            }),
            6800,
            "",
            "/tmp/dl",
        ));
        Router::new(
            Box::new(FakeFetcher {
                result: fetcher_result,
                calls: Mutex::new(Vec::new()),
            }),
            daemon,
            "/tmp/dl",
            url_prefix.map(str::to_string),
        )
    }

    #[tokio::test]
    async fn test_route_playlist_success_declares_mp4_path() {
        let router = router_with(Ok(()), true, None);
        let outcome = router
            .route(Kind::Playlist, "https://x/a.m3u8", "clip")
            .await;
        assert_eq!(
            outcome,
            DownloadOutcome::Success {
                file_path: "clip.mp4".to_string(),
                download_url: String::new(),
            }
        );
    }

    #[tokio::test]
    async fn test_route_playlist_strips_mp4_suffix_from_hint() {
        // The helper appends .mp4 itself, so a hint ending in .mp4 must be
        // passed through as a bare stem.
        struct StemRecorder(Arc<Mutex<Vec<String>>>);
        #[async_trait]
        impl PlaylistFetcher for StemRecorder {
            async fn fetch(
                &self,
                _url: &str,
                output_stem: &str,
                _save_dir: &Path,
            ) -> Result<String, HelperError> {
                self.0.lock().unwrap().push(output_stem.to_string());
                Ok(format!("{output_stem}.mp4"))
            }
        }

        let stems = Arc::new(Mutex::new(Vec::new()));
        let daemon = Arc::new(Aria2Supervisor::new(
            Box::new(FakeRpc {
                accept: true,
                submissions: Mutex::new(Vec::new()),
            }),
            6800,
            "",
            "/tmp/dl",
        ));
        let router = Router::new(
            Box::new(StemRecorder(Arc::clone(&stems))),
            daemon,
            "/tmp/dl",
            None,
        );
        router
            .route(Kind::Playlist, "https://x/a.m3u8", "clip.mp4")
            .await;
        assert_eq!(stems.lock().unwrap().as_slice(), ["clip".to_string()]);
    }

    #[tokio::test]
    async fn test_route_playlist_failure_carries_diagnostic() {
        let router = router_with(Err("segment 404"), true, None);
        let outcome = router
            .route(Kind::Playlist, "https://x/a.m3u8", "clip")
            .await;
        match outcome {
            DownloadOutcome::Error { message } => assert!(message.contains("segment 404")),
            DownloadOutcome::Success { .. } => panic!("expected error outcome"),
        }
    }

    #[tokio::test]
    async fn test_route_magnet_success_has_empty_download_url() {
        let router = router_with(Ok(()), true, Some("https://cdn/"));
        let outcome = router
            .route(Kind::Magnet, "magnet:?xt=urn:btih:abc", "file_123")
            .await;
        assert_eq!(
            outcome,
            DownloadOutcome::Success {
                file_path: "file_123".to_string(),
                download_url: String::new(),
            }
        );
    }

    #[tokio::test]
    async fn test_route_http_populates_download_url_with_prefix() {
        let router = router_with(Ok(()), true, Some("https://cdn/"));
        let outcome = router
            .route(Kind::Http, "https://host/file.bin", "clip.bin")
            .await;
        assert_eq!(
            outcome,
            DownloadOutcome::Success {
                file_path: "clip.bin".to_string(),
                download_url: "https://cdn/clip.bin".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_route_http_appends_url_extension_when_hint_differs() {
        let router = router_with(Ok(()), true, None);
        let outcome = router
            .route(Kind::Http, "https://host/file.bin", "file_1700000000")
            .await;
        assert_eq!(
            outcome,
            DownloadOutcome::Success {
                file_path: "file_1700000000.bin".to_string(),
                download_url: String::new(),
            }
        );
    }

    #[tokio::test]
    async fn test_route_http_daemon_unreachable_is_error_outcome() {
        let router = router_with(Ok(()), false, None);
        let outcome = router
            .route(Kind::Http, "https://host/file.bin", "clip.bin")
            .await;
        assert!(matches!(outcome, DownloadOutcome::Error { .. }));
    }

    // ───── reconcile_extension ──────────────────────────────────────────────

    #[test]
    fn test_reconcile_extension_appends_when_different() {
        assert_eq!(
            reconcile_extension("https://host/file.bin", "clip.mp4"),
            "clip.mp4.bin"
        );
    }

    #[test]
    fn test_reconcile_extension_keeps_matching_extension() {
        assert_eq!(
            reconcile_extension("https://host/file.bin", "clip.bin"),
            "clip.bin"
        );
    }

    #[test]
    fn test_reconcile_extension_ignores_case_differences() {
        assert_eq!(
            reconcile_extension("https://host/file.bin", "clip.BIN"),
            "clip.BIN"
        );
        assert_eq!(
            reconcile_extension("https://host/file.MP4", "clip.mp4"),
            "clip.mp4"
        );
    }

    #[test]
    fn test_reconcile_extension_no_url_extension_keeps_name() {
        assert_eq!(
            reconcile_extension("https://host/download", "clip.mp4"),
            "clip.mp4"
        );
    }
}
