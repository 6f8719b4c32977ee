use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }

    /// Strict command parsing, case-insensitive.
    pub fn parse_command(payload: &str) -> Option<Self> {
        let trimmed = payload.trim();
        if trimmed.eq_ignore_ascii_case("on") {
            Some(Self::On)
        } else if trimmed.eq_ignore_ascii_case("off") {
            Some(Self::Off)
        } else {
            None
        }
    }

    /// Relay feedback: anything but a literal `ON` reads as off.
    pub fn from_feedback(payload: &str) -> Self {
        if payload == "ON" {
            Self::On
        } else {
            Self::Off
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DesiredState {
    On,
    Off,
    #[default]
    Unknown,
}

impl DesiredState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn is(self, state: PowerState) -> bool {
        self == Self::from(state)
    }
}

impl From<PowerState> for DesiredState {
    fn from(state: PowerState) -> Self {
        match state {
            PowerState::On => Self::On,
            PowerState::Off => Self::Off,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomStatus {
    pub room: String,
    pub device: String,
    pub desired: &'static str,
    pub observed: Option<&'static str>,
    #[serde(rename = "autoOffAt")]
    pub auto_off_at: Option<String>,
}

impl RoomStatus {
    pub fn summary(&self) -> String {
        format!(
            "{}: {} (actual: {})",
            self.room,
            self.desired,
            self.observed.unwrap_or("?")
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub mqtt: &'static str,
    pub db: &'static str,
    pub rooms: Vec<String>,
    #[serde(rename = "roomDetails")]
    pub room_details: Vec<RoomStatus>,
    pub uptime: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomStatePayload {
    pub success: bool,
    #[serde(rename = "roomState")]
    pub room_state: BTreeMap<String, &'static str>,
}
