use std::collections::HashSet;

use super::{DeviceConfig, DeviceError, Result};

/// Turn a display name into the token used as its state-store key.
///
/// Every character outside `[A-Za-z0-9_]` becomes `_`, then leading and
/// trailing underscores are removed. Not injective: "Living Room" and
/// "Living-Room" share a key.
pub fn sanitize_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    replaced.trim_matches('_').to_string()
}

/// Static list of configured devices, in configuration order
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceConfig>,
}

impl DeviceRegistry {
    /// Build the registry. Name collisions after sanitizing are a
    /// misconfiguration: they are reported and the first device wins lookups.
    pub fn new(devices: Vec<DeviceConfig>) -> Self {
        let mut seen = HashSet::new();
        for device in &devices {
            let key = sanitize_name(&device.name);
            if key.is_empty() {
                log::warn!("Rollershutter name \"{}\" has no usable characters", device.name);
            } else if !seen.insert(key.clone()) {
                log::warn!(
                    "Rollershutter \"{}\" collides with another device on key \"{}\"; only the first one is reachable",
                    device.name,
                    key
                );
            }
        }
        Self { devices }
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceConfig> {
        self.devices.iter()
    }

    /// Devices paired with their keys, skipping shadowed duplicates and
    /// names without a usable key
    pub fn entries(&self) -> Vec<(String, &DeviceConfig)> {
        let mut seen = HashSet::new();
        self.devices
            .iter()
            .filter_map(|device| {
                let key = sanitize_name(&device.name);
                if key.is_empty() || !seen.insert(key.clone()) {
                    None
                } else {
                    Some((key, device))
                }
            })
            .collect()
    }

    /// First device whose sanitized name equals `key`
    pub fn lookup(&self, key: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| sanitize_name(&d.name) == key)
    }

    pub fn get(&self, key: &str) -> Result<&DeviceConfig> {
        self.lookup(key)
            .ok_or_else(|| DeviceError::NotFound(key.to_string()))
    }
}
