#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use tokio::sync::mpsc;

use rollershutter_arduino_lib::adapter::RollershutterAdapter;
use rollershutter_arduino_lib::automation::{AutomationError, Clock};
use rollershutter_arduino_lib::config::AdapterConfig;
use rollershutter_arduino_lib::device::DeviceConfig;
use rollershutter_arduino_lib::serial::interface::{OpenedPort, PortEvent, PortHandle, PortOpener};
use rollershutter_arduino_lib::serial::SerialError;
use rollershutter_arduino_lib::state::{MemoryStateStore, Namespace, StateChange, StateStore, StoreClient, ADAPTER_KIND};

#[derive(Default)]
struct FakePortState {
    opens: usize,
    closes: usize,
    /// Number of upcoming opens that fail
    failing_opens: usize,
    fail_writes: bool,
    /// Writes never complete, like a controller that stopped draining its input
    stall_writes: bool,
    open_delay: Duration,
    writes: Vec<String>,
    events: Option<mpsc::Sender<PortEvent>>,
}

/// In-memory stand-in for the serial link
#[derive(Clone, Default)]
pub struct FakePortOpener {
    state: Arc<Mutex<FakePortState>>,
}

impl FakePortOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every open fails until told otherwise
    pub fn unreachable() -> Self {
        let opener = Self::new();
        opener.fail_opens(usize::MAX);
        opener
    }

    pub fn fail_opens(&self, count: usize) {
        self.state.lock().unwrap().failing_opens = count;
    }

    pub fn set_open_delay(&self, delay: Duration) {
        self.state.lock().unwrap().open_delay = delay;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    pub fn stall_writes(&self, stall: bool) {
        self.state.lock().unwrap().stall_writes = stall;
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn writes(&self) -> Vec<String> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Push an event into the most recently opened port
    pub async fn emit(&self, event: PortEvent) {
        let sender = self.state.lock().unwrap().events.clone();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }
}

#[async_trait]
impl PortOpener for FakePortOpener {
    async fn open(&self, path: &str, _baud_rate: u32) -> Result<OpenedPort, SerialError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.opens += 1;
            state.open_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if state.failing_opens > 0 {
            if state.failing_opens != usize::MAX {
                state.failing_opens -= 1;
            }
            return Err(SerialError::ConnectionFailed(format!("{}: no such device", path)));
        }

        let (tx, rx) = mpsc::channel(16);
        state.events = Some(tx);
        Ok(OpenedPort {
            handle: Box::new(FakeHandle {
                state: self.state.clone(),
            }),
            events: rx,
        })
    }
}

struct FakeHandle {
    state: Arc<Mutex<FakePortState>>,
}

#[async_trait]
impl PortHandle for FakeHandle {
    async fn write(&mut self, data: &[u8]) -> Result<(), SerialError> {
        let stall = self.state.lock().unwrap().stall_writes;
        if stall {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(SerialError::WriteFailed("device unplugged".to_string()));
        }
        state.writes.push(String::from_utf8_lossy(data).into_owned());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SerialError> {
        self.state.lock().unwrap().closes += 1;
        Ok(())
    }
}

/// Clock that only moves when told to
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Arc<Self> {
        Arc::new(Self { now: Mutex::new(now) })
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Result<NaiveDateTime, AutomationError> {
        Ok(*self.now.lock().unwrap())
    }
}

/// Clock that always fails and counts how often it was asked
#[derive(Default)]
pub struct BrokenClock {
    pub calls: AtomicUsize,
}

impl Clock for BrokenClock {
    fn now(&self) -> Result<NaiveDateTime, AutomationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AutomationError::Clock("rtc offline".to_string()))
    }
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, 0)
        .unwrap()
}

/// 2024-05-15 is a Wednesday
pub fn wednesday(h: u32, min: u32) -> NaiveDateTime {
    at(2024, 5, 15, h, min)
}

pub fn saturday(h: u32, min: u32) -> NaiveDateTime {
    at(2024, 5, 18, h, min)
}

/// A time no default schedule matches
pub fn quiet_hour() -> NaiveDateTime {
    wednesday(3, 33)
}

pub fn device(name: &str, prefix: &str) -> DeviceConfig {
    DeviceConfig {
        name: name.to_string(),
        id: String::new(),
        open_command: format!("{}_OPEN", prefix),
        close_command: format!("{}_CLOSE", prefix),
        stop_command: format!("{}_STOP", prefix),
    }
}

pub fn config(instance: u32, devices: Vec<DeviceConfig>) -> AdapterConfig {
    AdapterConfig {
        serial_path: "/dev/ttyFAKE0".to_string(),
        reconnect_interval: 50,
        open_delay: 1,
        instance,
        rollershutters: devices,
        ..AdapterConfig::default()
    }
}

/// Poll `check` until it holds or about two seconds have passed
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// One started driver instance wired to fakes
pub struct Harness {
    pub store: MemoryStateStore,
    pub namespace: Namespace,
    pub adapter: RollershutterAdapter,
    pub opener: FakePortOpener,
    pub clock: Arc<FixedClock>,
    pub console: StoreClient,
    events: mpsc::UnboundedReceiver<StateChange>,
}

impl Harness {
    pub async fn start(store: &MemoryStateStore, config: AdapterConfig) -> Self {
        let namespace = Namespace::new(ADAPTER_KIND, config.instance);
        store.register_instance(&namespace).await;

        let (client, events) = store.client().await;
        let (console, _console_events) = store.client().await;
        let opener = FakePortOpener::new();
        let clock = FixedClock::new(quiet_hour());

        let adapter = RollershutterAdapter::new(config, Arc::new(client), Arc::new(opener.clone()), clock.clone());
        assert!(adapter.start().await.unwrap());
        // The scheduler evaluates once right away; let that pass at the quiet hour
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            store: store.clone(),
            namespace,
            adapter,
            opener,
            clock,
            console,
            events,
        }
    }

    /// Write an unacknowledged value, as a user would
    pub async fn write(&self, relative: &str, value: Value) {
        self.console
            .set_state(&self.namespace.id(relative), value, false)
            .await
            .unwrap();
    }

    /// Feed every queued change to the adapter
    pub async fn process(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(change) = self.events.try_recv() {
            self.adapter.on_state_change(&change).await;
            handled += 1;
        }
        handled
    }

    pub async fn value(&self, relative: &str) -> Option<Value> {
        self.store.state(&self.namespace.id(relative)).await.map(|s| s.val)
    }

    pub async fn acked(&self, relative: &str) -> bool {
        self.store
            .state(&self.namespace.id(relative))
            .await
            .map(|s| s.ack)
            .unwrap_or(false)
    }
}
