//! CLI argument definitions using clap derive macros.
//!
//! Every knob is optional: absent flags defer to the config file,
//! environment, and built-in defaults (precedence CLI > file > env >
//! defaults).

use std::path::PathBuf;

use clap::Parser;

use mqfetch::config::CliOverrides;

/// MQTT-driven download orchestrator.
///
/// Subscribes to a request topic, downloads each referenced resource through
/// aria2 or the m3u8 helper, and publishes a completion event per job.
#[derive(Parser, Debug)]
#[command(name = "mqfetch")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Path to the TOML config file (default: ./config.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// MQTT broker address
    #[arg(long)]
    pub broker: Option<String>,

    /// MQTT broker port
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// QoS level for subscribe and publish (0, 1, or 2)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=2))]
    pub qos: Option<u8>,

    /// MQTT keepalive interval in seconds
    #[arg(long)]
    pub keepalive: Option<u64>,

    /// Topic carrying inbound job requests
    #[arg(long)]
    pub topic_subscribe: Option<String>,

    /// Topic for outbound completion events
    #[arg(long)]
    pub topic_publish: Option<String>,

    /// MQTT client id (a per-process suffix is appended)
    #[arg(long)]
    pub client_id: Option<String>,

    /// MQTT username
    #[arg(long)]
    pub username: Option<String>,

    /// MQTT password
    #[arg(long)]
    pub password: Option<String>,

    /// Directory downloads are written to
    #[arg(long)]
    pub download_dir: Option<PathBuf>,

    /// Public URL prefix for completed downloads
    #[arg(long)]
    pub download_prefix_url: Option<String>,

    /// Launch the aria2 daemon at startup
    #[arg(long)]
    pub aria2_server_enable: Option<bool>,

    /// aria2 RPC host
    #[arg(long)]
    pub aria2_rpc_host: Option<String>,

    /// aria2 RPC port
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub aria2_rpc_port: Option<u16>,

    /// aria2 RPC shared secret
    #[arg(long)]
    pub aria2_rpc_secret: Option<String>,

    /// Default download directory for the aria2 daemon
    #[arg(long)]
    pub aria2_download_dir: Option<PathBuf>,
}

impl Args {
    /// Maps parsed flags onto the config layer's override struct.
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            broker: self.broker.clone(),
            port: self.port,
            qos: self.qos,
            keepalive_secs: self.keepalive,
            topic_subscribe: self.topic_subscribe.clone(),
            topic_publish: self.topic_publish.clone(),
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            download_dir: self.download_dir.clone(),
            download_prefix_url: self.download_prefix_url.clone(),
            aria2_server_enable: self.aria2_server_enable,
            aria2_rpc_host: self.aria2_rpc_host.clone(),
            aria2_rpc_port: self.aria2_rpc_port,
            aria2_rpc_secret: self.aria2_rpc_secret.clone(),
            aria2_download_dir: self.aria2_download_dir.clone(),
        }
    }
}
