pub mod models;
pub mod registry;

pub use models::*;
pub use registry::{sanitize_name, DeviceRegistry};

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("No configuration found for rollershutter: {0}")]
    NotFound(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
