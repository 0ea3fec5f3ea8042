use std::sync::Arc;

use serde_json::Value;

use crate::device::{DeviceConfig, DeviceError, DeviceRegistry, ShutterCommand};
use crate::serial::CommandTransport;
use crate::state::{Namespace, StateStore};

/// Relative id of a device's command state
pub fn command_path(device_key: &str) -> String {
    format!("{}.command", device_key)
}

/// Relative id of one of a device's one-shot buttons
pub fn button_path(device_key: &str, command: ShutterCommand) -> String {
    format!("{}.{}", device_key, command)
}

/// Sends shutter commands and reflects them in the device's visible state.
/// Shared by manual writes and the automation scheduler.
#[derive(Clone)]
pub struct ShutterController {
    registry: Arc<DeviceRegistry>,
    transport: CommandTransport,
    store: Arc<dyn StateStore>,
    namespace: Namespace,
}

impl ShutterController {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        transport: CommandTransport,
        store: Arc<dyn StateStore>,
        namespace: Namespace,
    ) -> Self {
        Self {
            registry,
            transport,
            store,
            namespace,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &CommandTransport {
        &self.transport
    }

    /// Send the device's command string. On success the command state is
    /// written back with ack; on failure nothing is written.
    pub async fn execute(&self, device_key: &str, device: &DeviceConfig, command: ShutterCommand) -> bool {
        let raw = device.command_for(command);
        log::info!("Sending {} command for {}: {}", command, device.name, raw);

        if !self.transport.send(raw).await {
            return false;
        }

        let id = self.namespace.id(&command_path(device_key));
        if let Err(e) = self
            .store
            .set_state(&id, Value::String(command.as_str().to_string()), true)
            .await
        {
            log::error!("Failed to update state {}: {}", id, e);
        }
        true
    }

    /// Unacknowledged write to `<key>.command`
    pub async fn handle_command_state(&self, device_key: &str, value: &Value) -> Result<bool, DeviceError> {
        let command = ShutterCommand::from_value(value)
            .ok_or_else(|| DeviceError::UnknownCommand(value.to_string()))?;
        let device = self.registry.get(device_key)?;
        Ok(self.execute(device_key, device, command).await)
    }

    /// Unacknowledged write to one of the `<key>.open|close|stop` buttons.
    /// Only truthy values trigger; the button is reset either way.
    pub async fn handle_button(
        &self,
        device_key: &str,
        command: ShutterCommand,
        value: &Value,
    ) -> Result<bool, DeviceError> {
        let device = self.registry.get(device_key)?;
        let sent = if is_truthy(value) {
            self.execute(device_key, device, command).await
        } else {
            false
        };

        let id = self.namespace.id(&button_path(device_key, command));
        if let Err(e) = self.store.set_state(&id, Value::Bool(false), true).await {
            log::error!("Failed to reset button {}: {}", id, e);
        }
        Ok(sent)
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Value::String(s) => s == "true" || s == "1",
        _ => false,
    }
}
