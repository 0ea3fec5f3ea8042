use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::DeviceConfig;
use crate::serial::interface::DEFAULT_BAUD_RATE;
use crate::serial::TransportOptions;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Serial path not configured")]
    MissingSerialPath,

    #[error("No rollershutters configured")]
    NoDevices,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    /// An empty device list is a warning; everything else is an error
    pub fn is_warning(&self) -> bool {
        matches!(self, ConfigError::NoDevices)
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Driver configuration, loaded once before start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterConfig {
    #[serde(default)]
    pub serial_path: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Milliseconds between reconnect attempts
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: u64,
    /// Milliseconds to wait before each write
    #[serde(default = "default_open_delay")]
    pub open_delay: u64,
    /// Index of this instance; 0 owns the shared settings
    #[serde(default)]
    pub instance: u32,
    #[serde(default)]
    pub rollershutters: Vec<DeviceConfig>,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_reconnect_interval() -> u64 {
    5000
}

fn default_open_delay() -> u64 {
    100
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            serial_path: String::new(),
            baud_rate: default_baud_rate(),
            reconnect_interval: default_reconnect_interval(),
            open_delay: default_open_delay(),
            instance: 0,
            rollershutters: Vec::new(),
        }
    }
}

impl AdapterConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.serial_path.trim().is_empty() {
            return Err(ConfigError::MissingSerialPath);
        }
        if self.rollershutters.is_empty() {
            return Err(ConfigError::NoDevices);
        }
        Ok(())
    }

    /// Zero is treated as unset and replaced by the default
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            path: self.serial_path.clone(),
            baud_rate: non_zero(self.baud_rate, DEFAULT_BAUD_RATE),
            reconnect_interval: Duration::from_millis(non_zero(self.reconnect_interval, default_reconnect_interval())),
            send_delay: Duration::from_millis(non_zero(self.open_delay, default_open_delay())),
        }
    }
}

fn non_zero<T: Default + PartialEq>(value: T, fallback: T) -> T {
    if value == T::default() {
        fallback
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_applied() {
        let config = AdapterConfig::from_json(r#"{ "serialPath": "/dev/ttyUSB0" }"#).unwrap();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.reconnect_interval, 5000);
        assert_eq!(config.open_delay, 100);
        assert_eq!(config.instance, 0);
        assert!(config.rollershutters.is_empty());

        let options = config.transport_options();
        assert_eq!(options.reconnect_interval, Duration::from_secs(5));
        assert_eq!(options.send_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_zero_values_fall_back_to_defaults() {
        let config = AdapterConfig::from_json(
            r#"{ "serialPath": "/dev/ttyUSB0", "reconnectInterval": 0, "baudRate": 0, "openDelay": 0 }"#,
        )
        .unwrap();

        let options = config.transport_options();
        assert_eq!(options.baud_rate, 9600);
        assert_eq!(options.reconnect_interval, Duration::from_millis(5000));
        assert_eq!(options.send_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_validation() {
        let mut config = AdapterConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::MissingSerialPath)));

        config.serial_path = "/dev/ttyACM0".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.is_warning());

        config.rollershutters.push(DeviceConfig {
            name: "Kitchen".to_string(),
            id: "k".to_string(),
            open_command: "K_OPEN".to_string(),
            close_command: "K_CLOSE".to_string(),
            stop_command: "K_STOP".to_string(),
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "serialPath": "/dev/ttyUSB1",
                "baudRate": 115200,
                "openDelay": 50,
                "instance": 1,
                "rollershutters": [
                    {{ "name": "Living Room", "id": "1", "openCommand": "LR_OPEN",
                       "closeCommand": "LR_CLOSE", "stopCommand": "LR_STOP" }}
                ]
            }}"#
        )
        .unwrap();

        let config = AdapterConfig::load(file.path()).unwrap();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.open_delay, 50);
        assert_eq!(config.instance, 1);
        assert_eq!(config.rollershutters[0].open_command, "LR_OPEN");
    }

    #[test]
    fn test_malformed_file() {
        assert!(matches!(AdapterConfig::from_json("{ not json"), Err(ConfigError::Parse(_))));
    }
}
