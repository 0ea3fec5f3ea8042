use std::sync::Arc;

use serde_json::Value;

use super::settings::{global_path, individual_path, override_path, AutomationField, AutomationSettings};
use super::{AutomationError, EffectiveSettings, Result, SettingsSource};
use crate::state::{Namespace, StateStore};

/// Resolves the Global / Individual layers of one device into the settings
/// the scheduler acts on.
///
/// The Individual layer replaces the Global layer wholesale when the device's
/// `overrideGlobal` flag is set; there is no per-field fallback. Resolution
/// reads the store every time and keeps no state of its own.
#[derive(Clone)]
pub struct AutomationResolver {
    store: Arc<dyn StateStore>,
    namespace: Namespace,
}

impl AutomationResolver {
    pub fn new(store: Arc<dyn StateStore>, namespace: Namespace) -> Self {
        Self { store, namespace }
    }

    /// Never fails: read errors are logged and answered with
    /// `EffectiveSettings::fallback()` (automation disabled).
    pub async fn effective_settings(&self, device_key: &str) -> EffectiveSettings {
        match self.resolve(device_key).await {
            Ok(effective) => effective,
            Err(e) => {
                log::error!("Error reading automation settings for {}: {}", device_key, e);
                EffectiveSettings::fallback()
            }
        }
    }

    pub async fn resolve(&self, device_key: &str) -> Result<EffectiveSettings> {
        let override_id = self.namespace.id(&override_path(device_key));
        let override_global = match self.store.get_state(&override_id).await? {
            Some(state) => as_bool(&override_id, &state.val)?,
            None => false,
        };

        if override_global {
            let settings = self
                .read_layer(|field| individual_path(device_key, field))
                .await?;
            Ok(EffectiveSettings {
                settings,
                source: SettingsSource::Individual,
            })
        } else {
            let settings = self.read_layer(global_path).await?;
            Ok(EffectiveSettings {
                settings,
                source: SettingsSource::Global,
            })
        }
    }

    async fn read_layer<F>(&self, path: F) -> Result<AutomationSettings>
    where
        F: Fn(AutomationField) -> String,
    {
        Ok(AutomationSettings {
            enabled: self.read_bool(&path(AutomationField::Enabled)).await?,
            workday_open: self.read_string(&path(AutomationField::WorkdayOpen)).await?,
            workday_close: self.read_string(&path(AutomationField::WorkdayClose)).await?,
            weekend_open: self.read_string(&path(AutomationField::WeekendOpen)).await?,
            weekend_close: self.read_string(&path(AutomationField::WeekendClose)).await?,
        })
    }

    async fn read_value(&self, relative: &str) -> Result<(String, Value)> {
        let id = self.namespace.id(relative);
        match self.store.get_state(&id).await? {
            Some(state) => Ok((id, state.val)),
            None => Err(AutomationError::MissingState(id)),
        }
    }

    async fn read_bool(&self, relative: &str) -> Result<bool> {
        let (id, value) = self.read_value(relative).await?;
        as_bool(&id, &value)
    }

    async fn read_string(&self, relative: &str) -> Result<String> {
        let (id, value) = self.read_value(relative).await?;
        match value {
            Value::String(s) => Ok(s),
            _ => Err(AutomationError::InvalidValue {
                id,
                expected: "string",
            }),
        }
    }
}

fn as_bool(id: &str, value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| AutomationError::InvalidValue {
        id: id.to_string(),
        expected: "boolean",
    })
}
