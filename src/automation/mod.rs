pub mod propagation;
pub mod resolver;
pub mod scheduler;
pub mod settings;

pub use propagation::SettingsPropagation;
pub use resolver::AutomationResolver;
pub use scheduler::{Clock, ScheduleEvaluator, ScheduleHandle, SystemClock, TriggeredAction};
pub use settings::{AutomationField, AutomationSettings, EffectiveSettings, SettingsSource};

#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    #[error("State store error: {0}")]
    Store(#[from] crate::state::StoreError),

    #[error("Missing state: {0}")]
    MissingState(String),

    #[error("Invalid value for {id}: expected {expected}")]
    InvalidValue { id: String, expected: &'static str },

    #[error("Clock unavailable: {0}")]
    Clock(String),
}

pub type Result<T> = std::result::Result<T, AutomationError>;
