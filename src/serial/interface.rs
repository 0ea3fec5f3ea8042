use async_trait::async_trait;
use serialport::SerialPortType;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::protocol::LineBuffer;
use super::{Result, SerialError, SerialPortInfo};

pub const DEFAULT_BAUD_RATE: u32 = 9600;

const EVENT_CAPACITY: usize = 64;
const READ_CHUNK: usize = 512;

/// Asynchronous notifications from an open port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// A complete line received from the controller
    Data(String),
    /// The port reported an error; a `Closed` usually follows
    Error(String),
    /// The port went away without being asked to
    Closed,
}

/// A freshly opened port together with its event stream
pub struct OpenedPort {
    pub handle: Box<dyn PortHandle>,
    pub events: mpsc::Receiver<PortEvent>,
}

/// Write side of an open port
#[async_trait]
pub trait PortHandle: Send {
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Opens the byte transport. Implemented over tokio-serial for real hardware
/// and by fakes in tests.
#[async_trait]
pub trait PortOpener: Send + Sync {
    async fn open(&self, path: &str, baud_rate: u32) -> Result<OpenedPort>;
}

/// Serial interface backed by tokio-serial
#[derive(Debug, Default, Clone)]
pub struct SerialInterface;

impl SerialInterface {
    pub fn new() -> Self {
        Self
    }

    /// List serial ports known to the operating system
    pub fn available_ports() -> Result<Vec<SerialPortInfo>> {
        let ports = serialport::available_ports()?;
        let mut found = Vec::new();

        for port in ports {
            let info = match port.port_type {
                SerialPortType::UsbPort(usb_info) => SerialPortInfo {
                    port_name: port.port_name,
                    vid: Some(usb_info.vid),
                    pid: Some(usb_info.pid),
                    manufacturer: usb_info.manufacturer,
                    product: usb_info.product,
                },
                _ => SerialPortInfo {
                    port_name: port.port_name,
                    vid: None,
                    pid: None,
                    manufacturer: None,
                    product: None,
                },
            };
            found.push(info);
        }

        Ok(found)
    }

    fn log_available_ports() {
        match Self::available_ports() {
            Ok(ports) if ports.is_empty() => log::debug!("No serial ports available"),
            Ok(ports) => {
                let names: Vec<&str> = ports.iter().map(|p| p.port_name.as_str()).collect();
                log::debug!("Available serial ports: {}", names.join(", "));
            }
            Err(e) => log::debug!("Could not enumerate serial ports: {}", e),
        }
    }
}

#[async_trait]
impl PortOpener for SerialInterface {
    async fn open(&self, path: &str, baud_rate: u32) -> Result<OpenedPort> {
        let stream = tokio_serial::new(path, baud_rate)
            .open_native_async()
            .map_err(|e| {
                Self::log_available_ports();
                SerialError::ConnectionFailed(format!("{}: {}", path, e))
            })?;

        let (reader, writer) = tokio::io::split(stream);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let reader_task = tokio::spawn(read_loop(reader, events_tx));

        Ok(OpenedPort {
            handle: Box::new(SerialHandle {
                writer,
                reader_task,
            }),
            events: events_rx,
        })
    }
}

struct SerialHandle {
    writer: WriteHalf<SerialStream>,
    reader_task: JoinHandle<()>,
}

#[async_trait]
impl PortHandle for SerialHandle {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer
            .write_all(data)
            .await
            .map_err(|e| SerialError::WriteFailed(e.to_string()))?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.reader_task.abort();
        self.writer.shutdown().await?;
        Ok(())
    }
}

impl Drop for SerialHandle {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_loop(mut reader: ReadHalf<SerialStream>, events_tx: mpsc::Sender<PortEvent>) {
    let mut buf = [0u8; READ_CHUNK];
    let mut lines = LineBuffer::new();

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                let _ = events_tx.send(PortEvent::Closed).await;
                break;
            }
            Ok(n) => {
                for line in lines.push(&buf[..n]) {
                    if events_tx.send(PortEvent::Data(line)).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = events_tx.send(PortEvent::Error(e.to_string())).await;
                let _ = events_tx.send(PortEvent::Closed).await;
                break;
            }
        }
    }
}
