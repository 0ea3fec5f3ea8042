pub mod interface;
pub mod protocol;
pub mod transport;

pub use interface::{OpenedPort, PortEvent, PortHandle, PortOpener, SerialInterface};
pub use transport::{CommandTransport, ConnectionState, TransportOptions};

use serde::{Deserialize, Serialize};

/// Serial port as reported by the operating system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Serial port not open")]
    NotConnected,

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Transport is shutting down")]
    ShuttingDown,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
