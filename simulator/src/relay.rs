//! Stand-in for a bank of relays: every power command is echoed back as the
//! device's retained status, the way the real firmware reports it.

use std::{collections::HashMap, time::Duration};

use anyhow::Context;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS, Transport};
use tracing::{debug, info, warn};

use roompower_common::{
    device_from_command_topic, status_topic, BrokerConfig, PowerState, TOPIC_CMD_POWER_ALL,
};

const CLIENT_ID: &str = "room-power-simulator";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (broker, warnings) =
        BrokerConfig::from_env(CLIENT_ID).context("failed to load broker configuration")?;
    for warning in &warnings {
        warn!("config: {warning}");
    }

    let mut options = MqttOptions::new(broker.client_id.clone(), broker.host.clone(), broker.port);
    options.set_keep_alive(Duration::from_secs(30));
    if let Some(user) = &broker.username {
        options.set_credentials(user.clone(), broker.password.clone().unwrap_or_default());
    }
    if broker.tls {
        options.set_transport(Transport::tls_with_default_config());
    }

    let (mqtt, mut eventloop) = AsyncClient::new(options, 32);
    let mut relays: HashMap<String, PowerState> = HashMap::new();

    info!("relay simulator connecting to {}:{}", broker.host, broker.port);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                info!("mqtt connected, listening on {TOPIC_CMD_POWER_ALL}");
                let mqtt = mqtt.clone();
                tokio::spawn(async move {
                    if let Err(err) = mqtt.subscribe(TOPIC_CMD_POWER_ALL, QoS::AtLeastOnce).await {
                        warn!("command subscription failed: {err}");
                    }
                });
            }
            Ok(Event::Incoming(Incoming::Publish(message))) => {
                let Some((device, state)) = relay_command(&message.topic, &message.payload) else {
                    debug!("ignoring {} ({} bytes)", message.topic, message.payload.len());
                    continue;
                };

                let previous = relays.insert(device.to_string(), state);
                if previous != Some(state) {
                    info!("{device} switched {state}");
                }

                // The poll loop drains the request queue, so never block on it here.
                if let Err(err) =
                    mqtt.try_publish(status_topic(device), QoS::AtLeastOnce, true, state.as_str())
                {
                    warn!("{device}: status publish failed: {err}");
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!("simulator mqtt poll error: {err}");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// Decodes a power command into the device it targets and the state it asks
/// for. Payloads other than `ON`/`OFF` are ignored.
fn relay_command<'a>(topic: &'a str, payload: &[u8]) -> Option<(&'a str, PowerState)> {
    let device = device_from_command_topic(topic)?;
    let state = PowerState::parse_command(std::str::from_utf8(payload).ok()?)?;
    Some((device, state))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn echoes_power_commands() {
        assert_eq!(
            relay_command("cmnd/tasmota_room101/Power", b"ON"),
            Some(("tasmota_room101", PowerState::On))
        );
        assert_eq!(
            relay_command("cmnd/tasmota_room101/Power", b"off"),
            Some(("tasmota_room101", PowerState::Off))
        );
    }

    #[test]
    fn ignores_other_traffic() {
        assert_eq!(relay_command("cmnd/tasmota_room101/Power", b"TOGGLE"), None);
        assert_eq!(relay_command("cmnd/tasmota_room101/Power", &[0xc3, 0x28]), None);
        assert_eq!(relay_command("stat/tasmota_room101/POWER", b"ON"), None);
        assert_eq!(relay_command("cmnd//Power", b"ON"), None);
    }
}
