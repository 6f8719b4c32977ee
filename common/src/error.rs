use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("malformed room mapping entry {0:?}, expected room=device")]
    MalformedMapping(String),
    #[error("room {room:?} mapped more than once, using device {device:?}")]
    DuplicateRoom { room: String, device: String },
    #[error("invalid value {value:?} for {key}, using default")]
    InvalidNumber { key: &'static str, value: String },
    #[error("invalid broker url {0:?}")]
    InvalidBrokerUrl(String),
    #[error("missing required variable {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    #[error("invalid time of day {0:?}")]
    InvalidTime(String),
}
