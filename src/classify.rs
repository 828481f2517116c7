//! URL classification for inbound download requests.
//!
//! Every job is mapped to exactly one [`Kind`] which decides the backend:
//! streaming playlists go through the one-shot helper process, everything
//! else goes to the aria2 daemon. Classification is a total function; there
//! is no error case, only [`Kind::Invalid`].

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Regex pattern for finding URLs in text.
/// Matches http:// and https:// URLs, capturing until whitespace or common delimiters.
#[allow(clippy::expect_used)]
static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    // Match http:// or https:// followed by non-whitespace, non-angle-bracket, non-quote chars
    // This handles URLs embedded in free-text messages.
    Regex::new(r#"https?://[^\s<>"'\]]+"#).expect("URL regex is valid") // Static pattern, safe to panic
});

/// Scheme prefix identifying magnet links.
const MAGNET_PREFIX: &str = "magnet:";

/// Path extension identifying streaming playlists.
const PLAYLIST_EXTENSION: &str = ".m3u8";

/// The backend class of a download request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// HLS streaming playlist, fetched by the one-shot helper process.
    Playlist,
    /// Magnet link, submitted to the aria2 daemon.
    Magnet,
    /// Plain HTTP(S) resource, submitted to the aria2 daemon.
    Http,
    /// No recognizable URL; dropped before a job is constructed.
    Invalid,
}

impl Kind {
    /// Stable lowercase label for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Playlist => "playlist",
            Self::Magnet => "magnet",
            Self::Http => "http",
            Self::Invalid => "invalid",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a raw request string into a [`Kind`].
///
/// Tie-break rules, applied in fixed priority order:
/// 1. URL with scheme + host whose path ends in `.m3u8` -> [`Kind::Playlist`]
/// 2. `magnet:` scheme prefix -> [`Kind::Magnet`]
/// 3. an http(s) URL anywhere in the text (first match wins) -> [`Kind::Http`]
/// 4. otherwise -> [`Kind::Invalid`]
///
/// Deterministic and total; never fails.
#[must_use]
pub fn classify(raw: &str) -> Kind {
    if is_playlist_url(raw) {
        Kind::Playlist
    } else if raw.starts_with(MAGNET_PREFIX) {
        Kind::Magnet
    } else if extract_url(raw).is_some() {
        Kind::Http
    } else {
        Kind::Invalid
    }
}

/// Returns the first http(s) URL embedded anywhere in `text`, if any.
///
/// Free-text messages (non-JSON payloads) are scanned with the same pattern,
/// so `"see https://host/a.bin now"` yields `"https://host/a.bin"`.
#[must_use]
pub fn extract_url(text: &str) -> Option<&str> {
    URL_PATTERN.find(text).map(|m| m.as_str())
}

/// True when `raw` parses as an http(s) URL with a host and a `.m3u8` path.
fn is_playlist_url(raw: &str) -> bool {
    let Ok(parsed) = Url::parse(raw) else {
        return false;
    };
    matches!(parsed.scheme(), "http" | "https")
        && parsed.host().is_some()
        && parsed.path().ends_with(PLAYLIST_EXTENSION)
}
