use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::interface::{OpenedPort, PortEvent, PortHandle, PortOpener, DEFAULT_BAUD_RATE};
use super::protocol::frame_command;
use super::{Result, SerialError};
use crate::state::StateStore;

pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(5000);
pub const DEFAULT_SEND_DELAY: Duration = Duration::from_millis(100);

/// Upper bound for closing the port during teardown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Write side of the live port, locked separately from the connection state
type SharedHandle = Arc<Mutex<Box<dyn PortHandle>>>;

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub path: String,
    pub baud_rate: u32,
    pub reconnect_interval: Duration,
    /// Settle time before each write
    pub send_delay: Duration,
}

impl TransportOptions {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            send_delay: DEFAULT_SEND_DELAY,
        }
    }
}

struct ActivePort {
    handle: SharedHandle,
    generation: u64,
    event_task: JoinHandle<()>,
}

/// Connection bookkeeping, owned and mutated only by the transport
#[derive(Default)]
pub struct ConnectionState {
    port: Option<ActivePort>,
    connecting: bool,
    reconnect: Option<JoinHandle<()>>,
    generation: u64,
    shutting_down: bool,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.is_some()
    }
}

struct TransportInner {
    options: TransportOptions,
    opener: Arc<dyn PortOpener>,
    store: Arc<dyn StateStore>,
    connection_id: String,
    state: Mutex<ConnectionState>,
}

/// Owns the serial link to the controller and keeps it alive.
///
/// Every entry point (connect, port error, port close, reconnect timer) is
/// idempotent: at most one open is in flight, at most one reconnect timer is
/// pending and at most one port handle is live.
#[derive(Clone)]
pub struct CommandTransport {
    inner: Arc<TransportInner>,
}

impl CommandTransport {
    /// `connection_id` is the full id of the boolean "connected" indicator
    pub fn new(
        options: TransportOptions,
        opener: Arc<dyn PortOpener>,
        store: Arc<dyn StateStore>,
        connection_id: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                options,
                opener,
                store,
                connection_id: connection_id.into(),
                state: Mutex::new(ConnectionState::default()),
            }),
        }
    }

    pub fn options(&self) -> &TransportOptions {
        &self.inner.options
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.state.lock().await.is_open()
    }

    pub async fn is_connecting(&self) -> bool {
        self.inner.state.lock().await.is_connecting()
    }

    pub async fn reconnect_pending(&self) -> bool {
        self.inner.state.lock().await.reconnect_pending()
    }

    /// Open the configured port. No-op while an attempt is in flight or a
    /// port is already open.
    pub async fn connect(&self) {
        {
            let mut state = self.inner.state.lock().await;
            if state.shutting_down {
                log::debug!("Ignoring connect request during shutdown");
                return;
            }
            if state.connecting {
                log::debug!("Connect already in progress");
                return;
            }
            if state.is_open() {
                log::debug!("Serial port already open");
                return;
            }
            state.connecting = true;
        }

        let options = &self.inner.options;
        log::info!("Initializing serial connection to {}", options.path);

        match self.inner.opener.open(&options.path, options.baud_rate).await {
            Ok(opened) => self.on_open(opened).await,
            Err(e) => {
                log::error!("Error opening serial port: {}", e);
                self.on_failure(None).await;
            }
        }
    }

    async fn on_open(&self, opened: OpenedPort) {
        let OpenedPort { mut handle, events } = opened;

        let mut state = self.inner.state.lock().await;
        state.connecting = false;

        if state.shutting_down {
            drop(state);
            log::info!("Closing port opened during shutdown");
            if let Err(e) = handle.close().await {
                log::error!("Error closing serial port: {}", e);
            }
            return;
        }

        if let Some(timer) = state.reconnect.take() {
            timer.abort();
        }

        state.generation += 1;
        let generation = state.generation;
        let event_task = tokio::spawn(self.clone().pump_events(generation, events));
        state.port = Some(ActivePort {
            handle: Arc::new(Mutex::new(handle)),
            generation,
            event_task,
        });
        drop(state);

        log::info!("Serial port opened: {}", self.inner.options.path);
        self.set_connected(true).await;
    }

    async fn pump_events(self, generation: u64, mut events: mpsc::Receiver<PortEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                PortEvent::Data(line) => {
                    log::debug!("Received data: {}", line);
                }
                PortEvent::Error(message) => {
                    log::error!("Serial port error: {}", message);
                    self.on_failure(Some(generation)).await;
                    return;
                }
                PortEvent::Closed => {
                    log::info!("Serial port closed");
                    self.on_failure(Some(generation)).await;
                    return;
                }
            }
        }
        log::debug!("Serial event stream ended");
    }

    /// Common path for open errors, port errors and unsolicited closes.
    /// Events from a port that has already been replaced are ignored.
    async fn on_failure(&self, generation: Option<u64>) {
        let mut state = self.inner.state.lock().await;

        if let Some(generation) = generation {
            let current = state.port.as_ref().map(|p| p.generation);
            if current != Some(generation) {
                log::debug!("Ignoring event from stale port (generation {})", generation);
                return;
            }
        }

        state.connecting = false;
        let dead_port = state.port.take();
        let shutting_down = state.shutting_down;
        if !shutting_down {
            self.schedule_reconnect(&mut state);
        }
        drop(state);
        // Dropping the handle releases the device; the event task exits on its own.
        drop(dead_port);

        if !shutting_down {
            self.set_connected(false).await;
        }
    }

    fn schedule_reconnect(&self, state: &mut ConnectionState) {
        if state.reconnect.is_some() {
            log::debug!("Reconnect already scheduled");
            return;
        }

        let interval = self.inner.options.reconnect_interval;
        log::info!("Scheduling reconnect in {}ms", interval.as_millis());
        state.reconnect = Some(tokio::spawn(self.reconnect_after(interval)));
    }

    fn reconnect_after(&self, interval: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let transport = self.clone();
        Box::pin(async move {
            tokio::time::sleep(interval).await;
            transport.inner.state.lock().await.reconnect = None;
            transport.connect().await;
        })
    }

    /// Frame and write one command. Returns false (and logs) on any failure;
    /// nothing is queued while the port is closed.
    pub async fn send(&self, command: &str) -> bool {
        match self.try_send(command).await {
            Ok(()) => {
                log::info!("Command sent: {}", command);
                true
            }
            Err(SerialError::NotConnected) => {
                log::warn!("Cannot send command \"{}\" - serial port not open", command);
                false
            }
            Err(e) => {
                log::error!("Error sending command \"{}\": {}", command, e);
                false
            }
        }
    }

    pub async fn try_send(&self, command: &str) -> Result<()> {
        {
            let state = self.inner.state.lock().await;
            if state.shutting_down {
                return Err(SerialError::ShuttingDown);
            }
            if !state.is_open() {
                return Err(SerialError::NotConnected);
            }
        }

        let message = frame_command(command);
        tokio::time::sleep(self.inner.options.send_delay).await;

        // The state lock is released before writing so a stalled write
        // cannot hold up events, queries or teardown.
        let handle = {
            let state = self.inner.state.lock().await;
            let port = state.port.as_ref().ok_or(SerialError::NotConnected)?;
            port.handle.clone()
        };
        let mut handle = handle.lock().await;
        handle.write(message.as_bytes()).await?;
        Ok(())
    }

    /// Cancel the reconnect timer, then close the port and wait for it,
    /// at most `CLOSE_TIMEOUT`. The transport stays inert afterwards.
    pub async fn disconnect(&self) {
        let (timer, port) = {
            let mut state = self.inner.state.lock().await;
            state.shutting_down = true;
            state.connecting = false;
            (state.reconnect.take(), state.port.take())
        };

        if let Some(timer) = timer {
            timer.abort();
            log::debug!("Reconnect timer cancelled");
        }

        if let Some(port) = port {
            port.event_task.abort();
            let close = async {
                let mut handle = port.handle.lock().await;
                handle.close().await?;
                Ok::<_, SerialError>(())
            };
            match timeout(CLOSE_TIMEOUT, close).await {
                Ok(Ok(())) => log::info!("Serial port closed successfully"),
                Ok(Err(e)) => log::error!("Error closing serial port: {}", e),
                Err(_) => log::warn!("Serial port did not close in time, releasing it"),
            }
        }

        self.set_connected(false).await;
    }

    async fn set_connected(&self, connected: bool) {
        if let Err(e) = self
            .inner
            .store
            .set_state(&self.inner.connection_id, Value::Bool(connected), true)
            .await
        {
            log::error!("Failed to update connection indicator: {}", e);
        }
    }
}
