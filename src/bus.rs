//! MQTT transport: subscription, the enqueue-only receive path, and the
//! result publisher.
//!
//! The receive path has exactly one contract: it never blocks and never fails
//! visibly. Every inbound publish is handed to the ingress channel and
//! nothing else happens on the network task, so a slow download can never
//! stall the bus connection into a keepalive timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::event::{CompletionEvent, epoch_seconds_f64};
use crate::ingress::{InboundMessage, IngressSender};

/// Initial backoff between event-loop polls after a connection error.
/// rumqttc reconnects on the next poll; the sleep rate-limits the attempts.
/// Doubles per consecutive error up to [`RECONNECT_BACKOFF_MAX`], resetting
/// on the first successful poll.
const RECONNECT_BACKOFF_MIN: Duration = Duration::from_secs(1);

/// Upper bound for the reconnect backoff.
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(120);

/// How long the initial broker connection may take before startup aborts.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound publish failure. Logged, never retried: the job is terminally
/// processed whether or not its event made it onto the bus.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The client rejected or failed the publish request.
    #[error("bus publish failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// The event could not be serialized (should not occur for well-formed events).
    #[error("event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Initial bus connection failure; fatal at startup.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The broker could not be reached or refused the connection.
    #[error("failed to connect to MQTT broker: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    /// No ConnAck arrived within the startup timeout.
    #[error("timed out connecting to MQTT broker")]
    Timeout,

    /// The request-topic subscription was refused.
    #[error("initial subscribe failed: {0}")]
    Subscribe(#[from] rumqttc::ClientError),
}

/// Sink for completion events; the worker publishes through this seam.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits one completion event to the configured outbound topic.
    async fn publish(&self, event: &CompletionEvent) -> Result<(), PublishError>;
}

/// [`EventSink`] publishing JSON to the completion topic over MQTT.
pub struct MqttPublisher {
    client: AsyncClient,
    topic: String,
    qos: QoS,
}

impl MqttPublisher {
    /// Builds a publisher over an existing client.
    #[must_use]
    pub fn new(client: AsyncClient, topic: impl Into<String>, qos: u8) -> Self {
        Self {
            client,
            topic: topic.into(),
            qos: qos_from_u8(qos),
        }
    }
}

#[async_trait]
impl EventSink for MqttPublisher {
    async fn publish(&self, event: &CompletionEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(event)?;
        self.client
            .publish(&self.topic, self.qos, false, payload)
            .await?;
        debug!(topic = %self.topic, url = %event.url, "completion event published");
        Ok(())
    }
}

/// Builds the MQTT client and its event loop from settings.
#[must_use]
pub fn build_client(settings: &Settings) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(&settings.client_id, &settings.broker, settings.port);
    options.set_keep_alive(Duration::from_secs(settings.keepalive_secs));
    if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
        options.set_credentials(username, password);
        info!(%username, "using MQTT authentication");
    }
    AsyncClient::new(options, 64)
}

/// Polls the event loop until the first `ConnAck`, subscribing to the request
/// topic. Any connection error or timeout here aborts startup - this is the
/// one fatal error in the system.
pub async fn wait_until_connected(
    eventloop: &mut EventLoop,
    client: &AsyncClient,
    settings: &Settings,
) -> Result<(), ConnectError> {
    let deadline = tokio::time::Instant::now() + CONNECT_TIMEOUT;
    loop {
        let event = tokio::time::timeout_at(deadline, eventloop.poll())
            .await
            .map_err(|_| ConnectError::Timeout)??;
        if let Event::Incoming(Packet::ConnAck(_)) = event {
            info!(broker = %settings.broker, port = settings.port, "connected to MQTT broker");
            client
                .subscribe(&settings.topic_subscribe, qos_from_u8(settings.qos))
                .await?;
            info!(topic = %settings.topic_subscribe, qos = settings.qos, "subscribed to request topic");
            return Ok(());
        }
    }
}

/// Spawns the bus network task.
///
/// Inbound publishes are timestamped and forwarded to the ingress channel;
/// reconnects resubscribe on the next `ConnAck`. The task exits when the stop
/// flag is set and the connection drops, or when the event loop is closed by
/// `disconnect`.
pub fn spawn_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    settings: &Settings,
    tx: IngressSender,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    let topic = settings.topic_subscribe.clone();
    let qos = qos_from_u8(settings.qos);
    tokio::spawn(async move {
        let mut backoff = RECONNECT_BACKOFF_MIN;
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    backoff = RECONNECT_BACKOFF_MIN;
                    // Resubscribe after every (re)connect.
                    if let Err(err) = client.subscribe(&topic, qos).await {
                        error!(error = %err, "resubscribe failed");
                    } else {
                        info!(%topic, "subscribed to request topic");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!(topic = %publish.topic, bytes = publish.payload.len(), "message received");
                    let message = InboundMessage {
                        payload: publish.payload.to_vec(),
                        received_at: epoch_seconds_f64(),
                    };
                    // Enqueue only - classification and I/O happen on the
                    // worker task. An error here means the worker is gone
                    // and the process is shutting down.
                    if tx.send(message).is_err() {
                        warn!("ingress queue closed, dropping message");
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    error!(error = %err, delay_secs = backoff.as_secs(), "MQTT connection error, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff);
                }
            }
            if stop.load(Ordering::SeqCst) && tx.is_closed() {
                break;
            }
        }
        debug!("bus event loop stopped");
    })
}

/// Next reconnect delay after a consecutive connection error: doubled,
/// capped at [`RECONNECT_BACKOFF_MAX`].
fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(RECONNECT_BACKOFF_MAX)
}

/// Maps a configured QoS level (0..=2) onto the protocol enum.
#[must_use]
pub fn qos_from_u8(qos: u8) -> QoS {
    match qos {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_backoff_doubles_until_capped() {
        let mut delay = RECONNECT_BACKOFF_MIN;
        let mut observed = vec![delay];
        for _ in 0..8 {
            delay = next_backoff(delay);
            observed.push(delay);
        }
        assert_eq!(
            observed[..5],
            [1, 2, 4, 8, 16].map(Duration::from_secs)
        );
        // 64 doubles past the cap and clamps there.
        assert_eq!(observed[7], RECONNECT_BACKOFF_MAX);
        assert_eq!(observed[8], RECONNECT_BACKOFF_MAX);
    }

    #[test]
    fn test_qos_from_u8_mapping() {
        assert_eq!(qos_from_u8(0), QoS::AtMostOnce);
        assert_eq!(qos_from_u8(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_u8(2), QoS::ExactlyOnce);
        // Out-of-range values degrade to at-most-once.
        assert_eq!(qos_from_u8(9), QoS::AtMostOnce);
    }
}
