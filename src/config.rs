//! Layered settings for the orchestrator.
//!
//! Precedence: command line > config file > environment > built-in defaults.
//! The file is TOML with `[mqtt]` and `[aria2]` sections; environment keys
//! carry a `MQFETCH_` prefix. Values are validated once, at resolve time;
//! everything downstream consumes the fixed-field [`Settings`] struct.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Local;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Default config file path, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Configuration errors; all fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// Path that failed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML or has wrong-typed fields.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// Path that failed.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A resolved value is out of range.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// MQTT broker hostname.
    pub broker: String,
    /// MQTT broker port.
    pub port: u16,
    /// QoS level for both subscribe and publish (0..=2).
    pub qos: u8,
    /// MQTT keepalive interval in seconds.
    pub keepalive_secs: u64,
    /// Topic carrying inbound job requests.
    pub topic_subscribe: String,
    /// Topic for outbound completion events.
    pub topic_publish: String,
    /// Client id, already suffixed with a per-process uniquifier.
    pub client_id: String,
    /// Optional MQTT username (applied only together with a password).
    pub username: Option<String>,
    /// Optional MQTT password.
    pub password: Option<String>,
    /// Directory downloads are written to.
    pub download_dir: PathBuf,
    /// Public URL prefix for completed http downloads; `None` disables
    /// `download_url` population.
    pub download_prefix_url: Option<String>,
    /// Whether to launch the aria2 daemon at startup.
    pub aria2_server_enable: bool,
    /// aria2 RPC host (may include an `http://` scheme prefix).
    pub aria2_rpc_host: String,
    /// aria2 RPC port.
    pub aria2_rpc_port: u16,
    /// aria2 RPC shared secret; empty disables token auth.
    pub aria2_rpc_secret: String,
    /// Default download directory handed to the aria2 daemon.
    pub aria2_download_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: "test.mosquitto.org".to_string(),
            port: 1883,
            qos: 0,
            keepalive_secs: 60,
            topic_subscribe: "video/download/request".to_string(),
            topic_publish: "video/download/complete".to_string(),
            client_id: "mqfetch_client".to_string(),
            username: None,
            password: None,
            download_dir: PathBuf::from("downloads"),
            download_prefix_url: None,
            aria2_server_enable: true,
            aria2_rpc_host: "http://localhost".to_string(),
            aria2_rpc_port: 6800,
            aria2_rpc_secret: String::new(),
            aria2_download_dir: PathBuf::from("aria2_downloads"),
        }
    }
}

/// Command-line overrides; every field is optional so absent flags defer to
/// the lower layers.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub broker: Option<String>,
    pub port: Option<u16>,
    pub qos: Option<u8>,
    pub keepalive_secs: Option<u64>,
    pub topic_subscribe: Option<String>,
    pub topic_publish: Option<String>,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub download_dir: Option<PathBuf>,
    pub download_prefix_url: Option<String>,
    pub aria2_server_enable: Option<bool>,
    pub aria2_rpc_host: Option<String>,
    pub aria2_rpc_port: Option<u16>,
    pub aria2_rpc_secret: Option<String>,
    pub aria2_download_dir: Option<PathBuf>,
}

/// TOML file shape: `[mqtt]` and `[aria2]` sections, all fields optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    mqtt: MqttSection,
    aria2: Aria2Section,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MqttSection {
    broker: Option<String>,
    port: Option<u16>,
    qos: Option<u8>,
    keepalive: Option<u64>,
    topic_subscribe: Option<String>,
    topic_publish: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    download_dir: Option<PathBuf>,
    download_prefix_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Aria2Section {
    server_enable: Option<bool>,
    rpc_host: Option<String>,
    rpc_port: Option<u16>,
    rpc_secret: Option<String>,
    download_dir: Option<PathBuf>,
}

impl Settings {
    /// Resolves settings from all four layers and validates the result.
    ///
    /// `config_path` of `None` means the default `config.toml` in the working
    /// directory; a missing default file is not an error, an explicitly named
    /// missing file is.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed, or a
    /// resolved value fails validation.
    pub fn resolve(cli: &CliOverrides, config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        settings.apply_env();

        let (path, required) = match config_path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };
        if path.exists() {
            settings.apply_file(&load_file(&path)?);
        } else if required {
            return Err(ConfigError::Read {
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
                path,
            });
        }

        settings.apply_cli(cli);
        settings.validate()?;
        // Local-time suffix so parallel instances get distinct ids and the
        // id stays human-readable in broker logs.
        settings.client_id = format!(
            "{}_fetcher_{}",
            settings.client_id,
            Local::now().format("%y%m%d%H%M%S")
        );
        Ok(settings)
    }

    /// Environment layer (lowest above defaults), `MQFETCH_*` keys.
    /// Unparseable values are logged and skipped, never fatal.
    fn apply_env(&mut self) {
        apply_env_str("MQFETCH_BROKER", &mut self.broker);
        apply_env_parse("MQFETCH_PORT", &mut self.port);
        apply_env_parse("MQFETCH_QOS", &mut self.qos);
        apply_env_parse("MQFETCH_KEEPALIVE", &mut self.keepalive_secs);
        apply_env_str("MQFETCH_TOPIC_SUBSCRIBE", &mut self.topic_subscribe);
        apply_env_str("MQFETCH_TOPIC_PUBLISH", &mut self.topic_publish);
        apply_env_str("MQFETCH_CLIENT_ID", &mut self.client_id);
        apply_env_opt("MQFETCH_USERNAME", &mut self.username);
        apply_env_opt("MQFETCH_PASSWORD", &mut self.password);
        if let Some(value) = env_var("MQFETCH_DOWNLOAD_DIR") {
            self.download_dir = PathBuf::from(value);
        }
        apply_env_opt("MQFETCH_DOWNLOAD_PREFIX_URL", &mut self.download_prefix_url);
        apply_env_parse("MQFETCH_ARIA2_SERVER_ENABLE", &mut self.aria2_server_enable);
        apply_env_str("MQFETCH_ARIA2_RPC_HOST", &mut self.aria2_rpc_host);
        apply_env_parse("MQFETCH_ARIA2_RPC_PORT", &mut self.aria2_rpc_port);
        apply_env_str("MQFETCH_ARIA2_RPC_SECRET", &mut self.aria2_rpc_secret);
        if let Some(value) = env_var("MQFETCH_ARIA2_DOWNLOAD_DIR") {
            self.aria2_download_dir = PathBuf::from(value);
        }
    }

    /// File layer.
    fn apply_file(&mut self, file: &FileConfig) {
        let mqtt = &file.mqtt;
        apply_opt(&mqtt.broker, &mut self.broker);
        apply_opt_copy(mqtt.port, &mut self.port);
        apply_opt_copy(mqtt.qos, &mut self.qos);
        apply_opt_copy(mqtt.keepalive, &mut self.keepalive_secs);
        apply_opt(&mqtt.topic_subscribe, &mut self.topic_subscribe);
        apply_opt(&mqtt.topic_publish, &mut self.topic_publish);
        apply_opt(&mqtt.client_id, &mut self.client_id);
        if mqtt.username.is_some() {
            self.username.clone_from(&mqtt.username);
        }
        if mqtt.password.is_some() {
            self.password.clone_from(&mqtt.password);
        }
        apply_opt(&mqtt.download_dir, &mut self.download_dir);
        if mqtt.download_prefix_url.is_some() {
            self.download_prefix_url.clone_from(&mqtt.download_prefix_url);
        }

        let aria2 = &file.aria2;
        apply_opt_copy(aria2.server_enable, &mut self.aria2_server_enable);
        apply_opt(&aria2.rpc_host, &mut self.aria2_rpc_host);
        apply_opt_copy(aria2.rpc_port, &mut self.aria2_rpc_port);
        apply_opt(&aria2.rpc_secret, &mut self.aria2_rpc_secret);
        apply_opt(&aria2.download_dir, &mut self.aria2_download_dir);
    }

    /// Command-line layer (highest).
    fn apply_cli(&mut self, cli: &CliOverrides) {
        apply_opt(&cli.broker, &mut self.broker);
        apply_opt_copy(cli.port, &mut self.port);
        apply_opt_copy(cli.qos, &mut self.qos);
        apply_opt_copy(cli.keepalive_secs, &mut self.keepalive_secs);
        apply_opt(&cli.topic_subscribe, &mut self.topic_subscribe);
        apply_opt(&cli.topic_publish, &mut self.topic_publish);
        apply_opt(&cli.client_id, &mut self.client_id);
        if cli.username.is_some() {
            self.username.clone_from(&cli.username);
        }
        if cli.password.is_some() {
            self.password.clone_from(&cli.password);
        }
        apply_opt(&cli.download_dir, &mut self.download_dir);
        if cli.download_prefix_url.is_some() {
            self.download_prefix_url.clone_from(&cli.download_prefix_url);
        }
        apply_opt_copy(cli.aria2_server_enable, &mut self.aria2_server_enable);
        apply_opt(&cli.aria2_rpc_host, &mut self.aria2_rpc_host);
        apply_opt_copy(cli.aria2_rpc_port, &mut self.aria2_rpc_port);
        apply_opt(&cli.aria2_rpc_secret, &mut self.aria2_rpc_secret);
        apply_opt(&cli.aria2_download_dir, &mut self.aria2_download_dir);
    }

    /// Range checks on the merged result.
    fn validate(&mut self) -> Result<(), ConfigError> {
        if self.qos > 2 {
            return Err(ConfigError::Invalid {
                field: "qos",
                reason: format!("{} (expected 0..=2)", self.qos),
            });
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid {
                field: "port",
                reason: "0 (expected 1..=65535)".to_string(),
            });
        }
        if self.aria2_rpc_port == 0 {
            return Err(ConfigError::Invalid {
                field: "aria2_rpc_port",
                reason: "0 (expected 1..=65535)".to_string(),
            });
        }
        if self.download_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "download_dir",
                reason: "empty path".to_string(),
            });
        }
        // An empty prefix means "no public URL", same as absent.
        if self
            .download_prefix_url
            .as_deref()
            .is_some_and(str::is_empty)
        {
            self.download_prefix_url = None;
        }
        Ok(())
    }
}

fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn apply_env_str(key: &str, target: &mut String) {
    if let Some(value) = env_var(key) {
        *target = value;
    }
}

fn apply_env_opt(key: &str, target: &mut Option<String>) {
    if let Some(value) = env_var(key) {
        *target = Some(value);
    }
}

fn apply_env_parse<T: FromStr>(key: &str, target: &mut T) {
    if let Some(value) = env_var(key) {
        match value.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(%key, %value, "ignoring unparseable environment variable"),
        }
    }
}

fn apply_opt<T: Clone>(source: &Option<T>, target: &mut T) {
    if let Some(value) = source {
        *target = value.clone();
    }
}

fn apply_opt_copy<T: Copy>(source: Option<T>, target: &mut T) {
    if let Some(value) = source {
        *target = value;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults_resolve_without_file() {
        let settings = Settings::resolve(&CliOverrides::default(), None).unwrap();
        assert_eq!(settings.broker, "test.mosquitto.org");
        assert_eq!(settings.port, 1883);
        assert_eq!(settings.qos, 0);
        assert!(settings.aria2_server_enable);
        assert!(settings.download_prefix_url.is_none());
    }

    #[test]
    fn test_client_id_gets_timestamp_suffix() {
        let settings = Settings::resolve(&CliOverrides::default(), None).unwrap();
        let suffix = settings
            .client_id
            .strip_prefix("mqfetch_client_fetcher_")
            .unwrap();
        // %y%m%d%H%M%S: twelve digits of local time.
        assert_eq!(suffix.len(), 12);
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_file_layer_overrides_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[mqtt]
broker = "broker.internal"
qos = 1
topic_subscribe = "jobs/in"

[aria2]
rpc_port = 6900
server_enable = false
"#,
        );
        let settings = Settings::resolve(&CliOverrides::default(), Some(&path)).unwrap();
        assert_eq!(settings.broker, "broker.internal");
        assert_eq!(settings.qos, 1);
        assert_eq!(settings.topic_subscribe, "jobs/in");
        assert_eq!(settings.aria2_rpc_port, 6900);
        assert!(!settings.aria2_server_enable);
        // Untouched fields keep their defaults.
        assert_eq!(settings.port, 1883);
    }

    #[test]
    fn test_cli_layer_overrides_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_config(&dir, "[mqtt]\nbroker = \"from-file\"\nport = 1999\n");
        let cli = CliOverrides {
            broker: Some("from-cli".to_string()),
            ..CliOverrides::default()
        };
        let settings = Settings::resolve(&cli, Some(&path)).unwrap();
        assert_eq!(settings.broker, "from-cli");
        // CLI silence defers to the file layer.
        assert_eq!(settings.port, 1999);
    }

    #[test]
    fn test_explicit_missing_config_file_is_error() {
        let err = Settings::resolve(
            &CliOverrides::default(),
            Some(Path::new("/nonexistent/mqfetch.toml")),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_invalid_qos_rejected() {
        let cli = CliOverrides {
            qos: Some(3),
            ..CliOverrides::default()
        };
        let err = Settings::resolve(&cli, None).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "qos", .. }));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_config(&dir, "[mqtt\nbroken");
        let err = Settings::resolve(&CliOverrides::default(), Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_empty_prefix_url_normalized_to_none() {
        let cli = CliOverrides {
            download_prefix_url: Some(String::new()),
            ..CliOverrides::default()
        };
        let settings = Settings::resolve(&cli, None).unwrap();
        assert!(settings.download_prefix_url.is_none());
    }
}
