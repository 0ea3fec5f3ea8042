use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::DeviceError;

/// One configured rollershutter and the raw strings the controller expects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub name: String,
    #[serde(default)]
    pub id: String,
    pub open_command: String,
    pub close_command: String,
    pub stop_command: String,
}

impl DeviceConfig {
    pub fn command_for(&self, command: ShutterCommand) -> &str {
        match command {
            ShutterCommand::Open => &self.open_command,
            ShutterCommand::Close => &self.close_command,
            ShutterCommand::Stop => &self.stop_command,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutterCommand {
    Open,
    Close,
    Stop,
}

impl ShutterCommand {
    pub const ALL: [ShutterCommand; 3] = [ShutterCommand::Open, ShutterCommand::Close, ShutterCommand::Stop];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShutterCommand::Open => "open",
            ShutterCommand::Close => "close",
            ShutterCommand::Stop => "stop",
        }
    }

    /// Interpret a state value written by the platform
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_str().and_then(|s| s.parse().ok())
    }
}

impl fmt::Display for ShutterCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShutterCommand {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(ShutterCommand::Open),
            "close" => Ok(ShutterCommand::Close),
            "stop" => Ok(ShutterCommand::Stop),
            other => Err(DeviceError::UnknownCommand(other.to_string())),
        }
    }
}
