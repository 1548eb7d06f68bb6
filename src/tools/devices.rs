//! Smart-home device registry

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Kind of controllable device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Light,
    Lock,
    Thermostat,
}

/// A device's current state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceState {
    /// On/off, locked/unlocked
    Switch(bool),
    /// Numeric reading
    Level(f64),
    /// Free-form reading such as "72°F"
    Reading(String),
}

/// A controllable device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartDevice {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    pub state: DeviceState,
    pub location: String,
}

impl SmartDevice {
    /// Whether `query` names this device or its location (case-insensitive)
    #[must_use]
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.location.to_lowercase().contains(&query) || self.name.to_lowercase().contains(&query)
    }
}

/// Device state store used by the smart-home tools
pub trait DeviceRegistry: Send + Sync {
    /// Snapshot of every device
    fn list(&self) -> Vec<SmartDevice>;

    /// Switch every light matching `room`; returns how many changed
    fn update_lights(&self, room: &str, on: bool) -> usize;
}

/// Registry held in memory for the life of the process
#[derive(Debug)]
pub struct InMemoryDeviceRegistry {
    devices: RwLock<Vec<SmartDevice>>,
}

impl Default for InMemoryDeviceRegistry {
    fn default() -> Self {
        Self::new(default_devices())
    }
}

impl InMemoryDeviceRegistry {
    /// Create a registry holding `devices`
    #[must_use]
    pub fn new(devices: Vec<SmartDevice>) -> Self {
        Self {
            devices: RwLock::new(devices),
        }
    }
}

impl DeviceRegistry for InMemoryDeviceRegistry {
    fn list(&self) -> Vec<SmartDevice> {
        self.devices
            .read()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    fn update_lights(&self, room: &str, on: bool) -> usize {
        let Ok(mut devices) = self.devices.write() else {
            return 0;
        };

        let mut updated = 0;
        for device in devices
            .iter_mut()
            .filter(|d| d.kind == DeviceKind::Light && d.matches(room))
        {
            device.state = DeviceState::Switch(on);
            updated += 1;
        }

        tracing::debug!(room, on, updated, "lights updated");
        updated
    }
}

/// The devices a fresh install starts with
#[must_use]
pub fn default_devices() -> Vec<SmartDevice> {
    vec![
        SmartDevice {
            id: "1".to_string(),
            name: "Main Lights".to_string(),
            kind: DeviceKind::Light,
            state: DeviceState::Switch(true),
            location: "Lab".to_string(),
        },
        SmartDevice {
            id: "2".to_string(),
            name: "Door Lock".to_string(),
            kind: DeviceKind::Lock,
            state: DeviceState::Switch(false),
            location: "Front Door".to_string(),
        },
        SmartDevice {
            id: "3".to_string(),
            name: "Climate Control".to_string(),
            kind: DeviceKind::Thermostat,
            state: DeviceState::Reading("72°F".to_string()),
            location: "Office".to_string(),
        },
    ]
}
