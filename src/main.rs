//! Service entry point for the mqfetch orchestrator.

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use mqfetch::aria2::Aria2Supervisor;
use mqfetch::bus::{self, MqttPublisher};
use mqfetch::config::Settings;
use mqfetch::ingress::{self, Worker};
use mqfetch::router::{M3u8CommandFetcher, Router};
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = Settings::resolve(&args.overrides(), args.config.as_deref())?;
    debug!(?settings, "configuration resolved");
    info!(
        broker = %settings.broker,
        port = settings.port,
        subscribe = %settings.topic_subscribe,
        publish = %settings.topic_publish,
        client_id = %settings.client_id,
        "mqfetch starting"
    );

    // Ensure the download directory exists before any job arrives.
    if !settings.download_dir.exists() {
        fs::create_dir_all(&settings.download_dir).with_context(|| {
            format!(
                "failed to create download directory '{}'",
                settings.download_dir.display()
            )
        })?;
        info!(dir = %settings.download_dir.display(), "created download directory");
    }

    // Daemon supervisor; the daemon itself is only launched when enabled.
    let daemon = Arc::new(Aria2Supervisor::with_http(
        &settings.aria2_rpc_host,
        settings.aria2_rpc_port,
        &settings.aria2_rpc_secret,
        &settings.aria2_download_dir,
    ));
    if settings.aria2_server_enable {
        if !daemon.start().await {
            warn!("aria2 daemon could not be started; daemon-backed jobs will fail until it is up");
        }
    } else {
        debug!("aria2 daemon launch disabled; submitting to the configured RPC endpoint as-is");
    }

    // Bus transport: the initial connection is the one fatal failure.
    let (client, mut eventloop) = bus::build_client(&settings);
    bus::wait_until_connected(&mut eventloop, &client, &settings)
        .await
        .context("could not establish the initial MQTT connection")?;

    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = ingress::channel();

    let bus_task = bus::spawn_event_loop(
        eventloop,
        client.clone(),
        &settings,
        tx,
        Arc::clone(&stop),
    );

    let router = Router::new(
        Box::new(M3u8CommandFetcher::new()),
        Arc::clone(&daemon),
        settings.download_dir.clone(),
        settings.download_prefix_url.clone(),
    );
    let publisher = MqttPublisher::new(client.clone(), settings.topic_publish.clone(), settings.qos);
    let worker = Worker::new(router, Box::new(publisher), Arc::clone(&stop));
    let worker_task = tokio::spawn(worker.run(rx));

    // Block until a shutdown signal; the worker finishes its current item.
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received, stopping");
    stop.store(true, Ordering::SeqCst);

    // Worker first, so no job is abandoned mid-flight; queued-but-undequeued
    // messages are dropped.
    if let Err(err) = worker_task.await {
        warn!(error = %err, "worker task ended abnormally");
    }

    if settings.aria2_server_enable && daemon.launched_here() && !daemon.stop().await {
        warn!("aria2 daemon did not acknowledge shutdown; leaving it running");
    }

    let _ = client.disconnect().await;
    if let Err(err) = bus_task.await {
        warn!(error = %err, "bus task ended abnormally");
    }

    info!("mqfetch stopped");
    Ok(())
}
