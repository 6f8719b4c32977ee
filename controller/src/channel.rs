use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ClientError, Event, EventLoop, Incoming, MqttOptions, QoS, SubscribeFilter,
    Transport,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use roompower_common::{
    command_topic, device_from_status_topic, status_topic, BrokerConfig, PowerState,
};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const MAX_FEEDBACK_PAYLOAD_BYTES: usize = 64;
const REQUEST_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("command channel is disconnected")]
    Disconnected,
    #[error("publish to {topic} failed: {source}")]
    Publish {
        topic: String,
        #[source]
        source: ClientError,
    },
}

/// A power state reported back by a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
    pub device: String,
    pub state: PowerState,
}

/// Outbound side of the relay transport.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Hands a power command to the transport. Success means the command was
    /// accepted for delivery, not that the relay switched.
    async fn publish(&self, device: &str, state: PowerState) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}

#[derive(Clone)]
pub struct MqttChannel {
    client: AsyncClient,
    connected: watch::Receiver<bool>,
}

impl MqttChannel {
    /// Creates the client and spawns the event loop. Feedback for `devices`
    /// is delivered on the returned receiver; subscriptions are renewed on
    /// every (re)connect.
    pub fn spawn(broker: &BrokerConfig, devices: Vec<String>) -> (Self, mpsc::Receiver<Feedback>) {
        let client_id = format!("{}-{}", broker.client_id, std::process::id());
        let mut options = MqttOptions::new(client_id, broker.host.clone(), broker.port);
        options.set_keep_alive(KEEP_ALIVE);
        if let Some(user) = &broker.username {
            options.set_credentials(user.clone(), broker.password.clone().unwrap_or_default());
        }
        if broker.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (connected_tx, connected_rx) = watch::channel(false);
        let (feedback_tx, feedback_rx) = mpsc::channel(REQUEST_CAPACITY);

        tokio::spawn(drive_event_loop(
            eventloop,
            client.clone(),
            devices,
            connected_tx,
            feedback_tx,
        ));

        (
            Self {
                client,
                connected: connected_rx,
            },
            feedback_rx,
        )
    }

    pub fn connection(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }
}

#[async_trait]
impl CommandChannel for MqttChannel {
    async fn publish(&self, device: &str, state: PowerState) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }

        let topic = command_topic(device);
        self.client
            .publish(topic.clone(), QoS::AtLeastOnce, false, state.as_str())
            .await
            .map_err(|source| TransportError::Publish { topic, source })
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }
}

async fn drive_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    devices: Vec<String>,
    connected: watch::Sender<bool>,
    feedback: mpsc::Sender<Feedback>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                info!("mqtt connected");
                connected.send_replace(true);
                // The request queue is drained by this loop, so subscribe from
                // a separate task instead of awaiting here.
                let client = client.clone();
                let devices = devices.clone();
                tokio::spawn(async move {
                    if let Err(err) = subscribe_feedback(&client, &devices).await {
                        warn!("feedback subscription failed: {err}");
                    }
                });
            }
            Ok(Event::Incoming(Incoming::Publish(message))) => {
                let Some(update) = decode_feedback(&message.topic, &message.payload) else {
                    continue;
                };
                debug!("mqtt {} -> {}", message.topic, update.state);
                if feedback.send(update).await.is_err() {
                    warn!("feedback receiver closed, dropping relay state");
                }
            }
            Ok(Event::Incoming(Incoming::Disconnect)) => {
                warn!("mqtt broker closed the session");
                connected.send_replace(false);
            }
            Ok(_) => {}
            Err(err) => {
                if connected.send_replace(false) {
                    warn!("mqtt connection lost: {err}");
                } else {
                    warn!("mqtt poll error: {err}");
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

async fn subscribe_feedback(client: &AsyncClient, devices: &[String]) -> Result<(), ClientError> {
    if devices.is_empty() {
        return Ok(());
    }

    let filters: Vec<SubscribeFilter> = devices
        .iter()
        .map(|device| SubscribeFilter::new(status_topic(device), QoS::AtMostOnce))
        .collect();
    client.subscribe_many(filters).await?;

    for device in devices {
        info!("subscribed {}", status_topic(device));
    }
    Ok(())
}

fn decode_feedback(topic: &str, payload: &[u8]) -> Option<Feedback> {
    let device = device_from_status_topic(topic)?;
    if payload.len() > MAX_FEEDBACK_PAYLOAD_BYTES {
        warn!(
            "dropping oversized feedback on {topic} ({} bytes)",
            payload.len()
        );
        return None;
    }

    let message = std::str::from_utf8(payload).ok()?;
    Some(Feedback {
        device: device.to_string(),
        state: PowerState::from_feedback(message),
    })
}
