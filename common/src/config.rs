use std::{str::FromStr, time::Duration};

use crate::{error::ConfigError, registry::RoomRegistry};

pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_EARLY_ALLOWANCE_MIN: u32 = 15;
pub const DEFAULT_COMMAND_COOLDOWN_MS: u64 = 5_000;
pub const DEFAULT_HTTP_PORT: u16 = 3000;
pub const DEFAULT_BROKER_URL: &str = "mqtt://127.0.0.1";
pub const DEFAULT_CLIENT_ID: &str = "room-power-controller";
pub const DEFAULT_DB_NAME: &str = "momay_buu";
pub const DEFAULT_BOOKINGS_COLLECTION: &str = "bookings";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    pub interval_ms: u64,
    pub early_allowance_min: u32,
    pub command_cooldown_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_CHECK_INTERVAL_MS,
            early_allowance_min: DEFAULT_EARLY_ALLOWANCE_MIN,
            command_cooldown_ms: DEFAULT_COMMAND_COOLDOWN_MS,
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn early_allowance_secs(&self) -> u32 {
        self.early_allowance_min.saturating_mul(60)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("username", &self.username)
            .field("password_set", &self.password.is_some())
            .field("client_id", &self.client_id)
            .finish()
    }
}

impl BrokerConfig {
    /// Splits `mqtt[s]://host[:port]` into host, port and whether TLS is on.
    /// A bare `host[:port]` is treated as plain MQTT.
    pub fn parse_url(url: &str) -> Result<(String, u16, bool), ConfigError> {
        let invalid = || ConfigError::InvalidBrokerUrl(url.to_string());
        let trimmed = url.trim();

        let (tls, rest) = match trimmed.split_once("://") {
            Some(("mqtt" | "tcp", rest)) => (false, rest),
            Some(("mqtts" | "ssl" | "tls", rest)) => (true, rest),
            Some(_) => return Err(invalid()),
            None => (false, trimmed),
        };
        let authority = rest.trim_end_matches('/');
        if authority.contains('/') {
            return Err(invalid());
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port.parse::<u16>().map_err(|_| invalid())?)),
            None => (authority, None),
        };
        if host.is_empty() {
            return Err(invalid());
        }

        let port = port.unwrap_or(if tls { 8883 } else { 1883 });
        Ok((host.to_string(), port, tls))
    }

    pub fn from_env(client_id: &str) -> Result<(Self, Vec<ConfigError>), ConfigError> {
        let mut warnings = Vec::new();
        let broker = Self::from_lookup(
            &|key: &str| std::env::var(key).ok(),
            client_id,
            &mut warnings,
        )?;
        Ok((broker, warnings))
    }

    /// Reads the `MQTT_*` variables. `client_id` is used when
    /// `MQTT_CLIENT_ID` is unset.
    pub fn from_lookup<F>(
        lookup: &F,
        client_id: &str,
        warnings: &mut Vec<ConfigError>,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup, key);

        let url = get("MQTT_BROKER").unwrap_or_else(|| DEFAULT_BROKER_URL.to_string());
        let (host, url_port, tls) = Self::parse_url(&url)?;

        Ok(Self {
            host,
            port: parse_or(get("MQTT_PORT"), "MQTT_PORT", url_port, warnings),
            tls: tls || get("MQTT_TLS").is_some_and(|value| is_truthy(&value)),
            username: get("MQTT_USERNAME"),
            password: get("MQTT_PASSWORD"),
            client_id: get("MQTT_CLIENT_ID").unwrap_or_else(|| client_id.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub uri: String,
    pub database: String,
    pub collection: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub broker: BrokerConfig,
    pub store: StoreConfig,
    pub rooms: RoomRegistry,
    pub reconcile: ReconcileConfig,
    pub http_port: u16,
    /// IANA zone name; `None` means the host's local zone.
    pub timezone: Option<String>,
}

impl ControllerConfig {
    pub fn from_env() -> Result<(Self, Vec<ConfigError>), ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from a variable lookup. Hard failures are
    /// returned as `Err`; entries that were skipped or defaulted come back as
    /// warnings.
    pub fn from_lookup<F>(lookup: F) -> Result<(Self, Vec<ConfigError>), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();
        let get = |key: &str| non_empty(&lookup, key);

        let broker = BrokerConfig::from_lookup(&lookup, DEFAULT_CLIENT_ID, &mut warnings)?;

        let store = StoreConfig {
            uri: get("MONGODB_URI").ok_or(ConfigError::Missing("MONGODB_URI"))?,
            database: get("DB_NAME").unwrap_or_else(|| DEFAULT_DB_NAME.to_string()),
            collection: get("BOOKINGS_COLLECTION")
                .unwrap_or_else(|| DEFAULT_BOOKINGS_COLLECTION.to_string()),
        };

        let (rooms, room_errors) = RoomRegistry::parse(&get("ROOM_DEVICE_MAP").unwrap_or_default());
        warnings.extend(room_errors);

        let mut interval_ms = parse_or(
            get("CHECK_INTERVAL"),
            "CHECK_INTERVAL",
            DEFAULT_CHECK_INTERVAL_MS,
            &mut warnings,
        );
        if interval_ms == 0 {
            warnings.push(ConfigError::InvalidNumber {
                key: "CHECK_INTERVAL",
                value: "0".to_string(),
            });
            interval_ms = DEFAULT_CHECK_INTERVAL_MS;
        }

        let reconcile = ReconcileConfig {
            interval_ms,
            early_allowance_min: parse_or(
                get("EARLY_ALLOWANCE_MIN"),
                "EARLY_ALLOWANCE_MIN",
                DEFAULT_EARLY_ALLOWANCE_MIN,
                &mut warnings,
            ),
            command_cooldown_ms: parse_or(
                get("COMMAND_COOLDOWN_MS"),
                "COMMAND_COOLDOWN_MS",
                DEFAULT_COMMAND_COOLDOWN_MS,
                &mut warnings,
            ),
        };

        let http_port = parse_or(get("PORT"), "PORT", DEFAULT_HTTP_PORT, &mut warnings);

        Ok((
            Self {
                broker,
                store,
                rooms,
                reconcile,
                http_port,
                timezone: get("TIMEZONE"),
            },
            warnings,
        ))
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_or<T: FromStr>(
    value: Option<String>,
    key: &'static str,
    default: T,
    warnings: &mut Vec<ConfigError>,
) -> T {
    match value {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warnings.push(ConfigError::InvalidNumber { key, value: raw });
            default
        }),
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<(ControllerConfig, Vec<ConfigError>), ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        ControllerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn applies_defaults() {
        let (config, warnings) = load(&[("MONGODB_URI", "mongodb://localhost")]).unwrap();

        assert!(warnings.is_empty());
        assert_eq!(config.reconcile, ReconcileConfig::default());
        assert_eq!(config.broker.host, "127.0.0.1");
        assert_eq!(config.broker.port, 1883);
        assert!(!config.broker.tls);
        assert_eq!(config.broker.username, None);
        assert_eq!(config.store.database, "momay_buu");
        assert_eq!(config.store.collection, "bookings");
        assert_eq!(config.http_port, 3000);
        assert_eq!(config.timezone, None);
        assert!(config.rooms.is_empty());
    }

    #[test]
    fn reads_overrides() {
        let (config, warnings) = load(&[
            ("MONGODB_URI", "mongodb://db"),
            ("MQTT_BROKER", "mqtts://broker.example.com"),
            ("MQTT_USERNAME", "ops"),
            ("MQTT_PASSWORD", "secret"),
            ("ROOM_DEVICE_MAP", "R1=D1,R2=D2"),
            ("CHECK_INTERVAL", "2000"),
            ("EARLY_ALLOWANCE_MIN", "0"),
            ("COMMAND_COOLDOWN_MS", "1500"),
            ("TIMEZONE", "Asia/Bangkok"),
            ("PORT", "8080"),
        ])
        .unwrap();

        assert!(warnings.is_empty());
        assert_eq!(config.broker.host, "broker.example.com");
        assert_eq!(config.broker.port, 8883);
        assert!(config.broker.tls);
        assert_eq!(config.broker.username.as_deref(), Some("ops"));
        assert_eq!(config.broker.password.as_deref(), Some("secret"));
        assert_eq!(config.rooms.len(), 2);
        assert_eq!(
            config.reconcile,
            ReconcileConfig {
                interval_ms: 2_000,
                early_allowance_min: 0,
                command_cooldown_ms: 1_500,
            }
        );
        assert_eq!(config.timezone.as_deref(), Some("Asia/Bangkok"));
        assert_eq!(config.http_port, 8080);
    }

    #[test]
    fn invalid_numbers_fall_back_with_warning() {
        let (config, warnings) = load(&[
            ("MONGODB_URI", "mongodb://db"),
            ("CHECK_INTERVAL", "0"),
            ("EARLY_ALLOWANCE_MIN", "soon"),
            ("ROOM_DEVICE_MAP", "R1"),
        ])
        .unwrap();

        assert_eq!(config.reconcile, ReconcileConfig::default());
        assert_eq!(
            warnings,
            vec![
                ConfigError::MalformedMapping("R1".to_string()),
                ConfigError::InvalidNumber {
                    key: "CHECK_INTERVAL",
                    value: "0".to_string(),
                },
                ConfigError::InvalidNumber {
                    key: "EARLY_ALLOWANCE_MIN",
                    value: "soon".to_string(),
                },
            ]
        );
    }

    #[test]
    fn store_uri_is_required() {
        assert_eq!(load(&[]).unwrap_err(), ConfigError::Missing("MONGODB_URI"));
    }

    #[test]
    fn parses_broker_urls() {
        assert_eq!(
            BrokerConfig::parse_url("mqtt://10.0.0.5:1884"),
            Ok(("10.0.0.5".to_string(), 1884, false))
        );
        assert_eq!(
            BrokerConfig::parse_url("mqtts://broker.example.com/"),
            Ok(("broker.example.com".to_string(), 8883, true))
        );
        assert_eq!(
            BrokerConfig::parse_url("localhost"),
            Ok(("localhost".to_string(), 1883, false))
        );

        for bad in ["ws://host", "mqtt://", "mqtt://host:port", "mqtt://host/path"] {
            assert_eq!(
                BrokerConfig::parse_url(bad),
                Err(ConfigError::InvalidBrokerUrl(bad.to_string()))
            );
        }
    }

    #[test]
    fn port_override_wins_over_url() {
        let (config, _) = load(&[
            ("MONGODB_URI", "mongodb://db"),
            ("MQTT_BROKER", "mqtts://broker.example.com"),
            ("MQTT_PORT", "443"),
        ])
        .unwrap();

        assert_eq!(config.broker.port, 443);
        assert!(config.broker.tls);
    }

    #[test]
    fn broker_alone_needs_no_store() {
        let vars = HashMap::from([
            ("MQTT_BROKER", "tcp://broker:1999"),
            ("MQTT_TLS", "yes"),
            ("MQTT_PORT", "x"),
        ]);
        let mut warnings = Vec::new();

        let broker = BrokerConfig::from_lookup(
            &|key: &str| vars.get(key).map(|value| value.to_string()),
            "sim",
            &mut warnings,
        )
        .unwrap();

        assert_eq!(broker.host, "broker");
        assert_eq!(broker.port, 1999);
        assert!(broker.tls);
        assert_eq!(broker.client_id, "sim");
        assert_eq!(
            warnings,
            vec![ConfigError::InvalidNumber {
                key: "MQTT_PORT",
                value: "x".to_string(),
            }]
        );
    }

    #[test]
    fn debug_hides_broker_password() {
        let (config, _) =
            load(&[("MONGODB_URI", "mongodb://db"), ("MQTT_PASSWORD", "hunter2")]).unwrap();
        assert!(!format!("{:?}", config.broker).contains("hunter2"));
    }
}
