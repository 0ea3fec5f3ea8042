use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::ValueType;

/// 24-hour `H:MM` / `HH:MM`
static TIME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([01]?[0-9]|2[0-3]):[0-5][0-9]$").expect("valid time pattern"));

pub fn is_valid_time(value: &str) -> bool {
    TIME_PATTERN.is_match(value)
}

pub const GLOBAL_FOLDER: &str = "automation.global";
pub const SUPER_GLOBAL_FOLDER: &str = "superGlobal";
pub const OVERRIDE_GLOBAL_KEY: &str = "overrideGlobal";

/// Relative path of a Global-layer field
pub fn global_path(field: AutomationField) -> String {
    format!("{}.{}", GLOBAL_FOLDER, field.key())
}

/// Relative path of a device's Individual-layer field
pub fn individual_path(device_key: &str, field: AutomationField) -> String {
    format!("{}.automation.{}", device_key, field.key())
}

pub fn override_path(device_key: &str) -> String {
    format!("{}.automation.{}", device_key, OVERRIDE_GLOBAL_KEY)
}

/// Relative path (below the owning instance) of a SuperGlobal field
pub fn super_global_path(field: AutomationField) -> String {
    format!("{}.{}", SUPER_GLOBAL_FOLDER, field.key())
}

/// The five fields shared by every settings layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AutomationField {
    Enabled,
    WorkdayOpen,
    WorkdayClose,
    WeekendOpen,
    WeekendClose,
}

impl AutomationField {
    pub const ALL: [AutomationField; 5] = [
        AutomationField::Enabled,
        AutomationField::WorkdayOpen,
        AutomationField::WorkdayClose,
        AutomationField::WeekendOpen,
        AutomationField::WeekendClose,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            AutomationField::Enabled => "enabled",
            AutomationField::WorkdayOpen => "workdayOpen",
            AutomationField::WorkdayClose => "workdayClose",
            AutomationField::WeekendOpen => "weekendOpen",
            AutomationField::WeekendClose => "weekendClose",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }

    pub fn label(&self) -> &'static str {
        match self {
            AutomationField::Enabled => "Automation enabled",
            AutomationField::WorkdayOpen => "Open time (Mon-Fri)",
            AutomationField::WorkdayClose => "Close time (Mon-Fri)",
            AutomationField::WeekendOpen => "Open time (Sat-Sun)",
            AutomationField::WeekendClose => "Close time (Sat-Sun)",
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            AutomationField::Enabled => ValueType::Boolean,
            _ => ValueType::String,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            AutomationField::Enabled => "switch.enable",
            _ => "text",
        }
    }
}

/// One settings layer, as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationSettings {
    pub enabled: bool,
    pub workday_open: String,
    pub workday_close: String,
    pub weekend_open: String,
    pub weekend_close: String,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            workday_open: "07:00".to_string(),
            workday_close: "22:00".to_string(),
            weekend_open: "08:00".to_string(),
            weekend_close: "23:00".to_string(),
        }
    }
}

impl AutomationSettings {
    /// Stored representation of one field
    pub fn value(&self, field: AutomationField) -> Value {
        match field {
            AutomationField::Enabled => Value::Bool(self.enabled),
            AutomationField::WorkdayOpen => Value::String(self.workday_open.clone()),
            AutomationField::WorkdayClose => Value::String(self.workday_close.clone()),
            AutomationField::WeekendOpen => Value::String(self.weekend_open.clone()),
            AutomationField::WeekendClose => Value::String(self.weekend_close.clone()),
        }
    }

    /// (open, close) for the given day type
    pub fn times_for(&self, is_workday: bool) -> (&str, &str) {
        if is_workday {
            (self.workday_open.as_str(), self.workday_close.as_str())
        } else {
            (self.weekend_open.as_str(), self.weekend_close.as_str())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingsSource {
    Global,
    Individual,
    Default,
}

impl fmt::Display for SettingsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsSource::Global => f.write_str("global"),
            SettingsSource::Individual => f.write_str("individual"),
            SettingsSource::Default => f.write_str("default"),
        }
    }
}

/// Settings the evaluator acts on for one device on one tick.
/// `source` is informational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveSettings {
    pub settings: AutomationSettings,
    pub source: SettingsSource,
}

impl EffectiveSettings {
    /// Conservative result used when the stored layers cannot be read
    pub fn fallback() -> Self {
        Self {
            settings: AutomationSettings::default(),
            source: SettingsSource::Default,
        }
    }
}
