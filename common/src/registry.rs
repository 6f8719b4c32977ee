use std::collections::BTreeMap;

use crate::error::ConfigError;

/// Static room to relay mapping, fixed for the lifetime of the process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomRegistry {
    rooms: BTreeMap<String, String>,
}

impl RoomRegistry {
    /// Parses `room=device,room=device`. Malformed entries are skipped and
    /// reported back alongside the registry.
    pub fn parse(mapping: &str) -> (Self, Vec<ConfigError>) {
        let mut registry = Self::default();
        let mut errors = Vec::new();

        for entry in mapping.split(',').map(str::trim) {
            if entry.is_empty() {
                continue;
            }

            let Some((room, device)) = entry.split_once('=') else {
                errors.push(ConfigError::MalformedMapping(entry.to_string()));
                continue;
            };
            let (room, device) = (room.trim(), device.trim());
            if room.is_empty() || device.is_empty() || device.contains('=') {
                errors.push(ConfigError::MalformedMapping(entry.to_string()));
                continue;
            }

            if registry
                .rooms
                .insert(room.to_string(), device.to_string())
                .is_some()
            {
                errors.push(ConfigError::DuplicateRoom {
                    room: room.to_string(),
                    device: device.to_string(),
                });
            }
        }

        (registry, errors)
    }

    pub fn from_pairs<R, D>(pairs: impl IntoIterator<Item = (R, D)>) -> Self
    where
        R: Into<String>,
        D: Into<String>,
    {
        Self {
            rooms: pairs
                .into_iter()
                .map(|(room, device)| (room.into(), device.into()))
                .collect(),
        }
    }

    pub fn device_for(&self, room: &str) -> Option<&str> {
        self.rooms.get(room).map(String::as_str)
    }

    /// Rooms driven by `device`; several rooms may share one relay.
    pub fn rooms_for_device<'a>(&'a self, device: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.rooms
            .iter()
            .filter(move |(_, mapped)| mapped.as_str() == device)
            .map(|(room, _)| room.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.rooms
            .iter()
            .map(|(room, device)| (room.as_str(), device.as_str()))
    }

    /// Distinct devices, sorted.
    pub fn devices(&self) -> Vec<&str> {
        let mut devices: Vec<&str> = self.rooms.values().map(String::as_str).collect();
        devices.sort_unstable();
        devices.dedup();
        devices
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
