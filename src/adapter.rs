//! Core driver object and its lifecycle entry points.
//!
//! The host calls `start()` once, forwards every subscribed state change to
//! `on_state_change()`, and awaits `stop()` before tearing down. Store,
//! byte transport and clock are injected so the whole driver runs against
//! fakes in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::automation::scheduler::SCHEDULE_PERIOD;
use crate::automation::settings::{
    global_path, individual_path, is_valid_time, override_path, AutomationField, AutomationSettings, GLOBAL_FOLDER,
    OVERRIDE_GLOBAL_KEY,
};
use crate::automation::{
    AutomationError, AutomationResolver, Clock, ScheduleEvaluator, ScheduleHandle, SettingsPropagation,
};
use crate::commands::{button_path, command_path, ShutterController};
use crate::config::AdapterConfig;
use crate::device::{DeviceConfig, DeviceRegistry, ShutterCommand};
use crate::serial::{CommandTransport, PortOpener};
use crate::state::{Namespace, StateChange, StateObject, StateStore, StoreError, ValueType, ADAPTER_KIND};

pub const CONNECTION_PATH: &str = "info.connection";

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Automation error: {0}")]
    Automation(#[from] AutomationError),
}

pub type Result<T> = std::result::Result<T, AdapterError>;

/// Where an incoming state change belongs
#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
    AutomationSetting(Option<AutomationField>),
    Command(&'a str),
    Button(&'a str, ShutterCommand),
    Ignored,
}

fn route(relative: &str) -> Route<'_> {
    if let Some(key) = relative
        .strip_prefix(GLOBAL_FOLDER)
        .and_then(|rest| rest.strip_prefix('.'))
    {
        return match AutomationField::from_key(key) {
            Some(field) => Route::AutomationSetting(Some(field)),
            None => Route::Ignored,
        };
    }

    let (device_key, rest) = match relative.split_once('.') {
        Some(parts) => parts,
        None => return Route::Ignored,
    };

    if rest == "command" {
        return Route::Command(device_key);
    }
    if let Some(setting) = rest.strip_prefix("automation.") {
        if setting == OVERRIDE_GLOBAL_KEY {
            return Route::AutomationSetting(None);
        }
        return match AutomationField::from_key(setting) {
            Some(field) => Route::AutomationSetting(Some(field)),
            None => Route::Ignored,
        };
    }
    match rest {
        "open" => Route::Button(device_key, ShutterCommand::Open),
        "close" => Route::Button(device_key, ShutterCommand::Close),
        "stop" => Route::Button(device_key, ShutterCommand::Stop),
        _ => Route::Ignored,
    }
}

pub struct RollershutterAdapter {
    config: AdapterConfig,
    namespace: Namespace,
    store: Arc<dyn StateStore>,
    controller: ShutterController,
    resolver: AutomationResolver,
    propagation: SettingsPropagation,
    evaluator: Arc<ScheduleEvaluator>,
    schedule_period: Duration,
    schedule: Mutex<Option<ScheduleHandle>>,
    running: AtomicBool,
}

impl RollershutterAdapter {
    pub fn new(
        config: AdapterConfig,
        store: Arc<dyn StateStore>,
        opener: Arc<dyn PortOpener>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let namespace = Namespace::new(ADAPTER_KIND, config.instance);
        let registry = Arc::new(DeviceRegistry::new(config.rollershutters.clone()));
        let transport = CommandTransport::new(
            config.transport_options(),
            opener,
            store.clone(),
            namespace.id(CONNECTION_PATH),
        );
        let controller = ShutterController::new(registry, transport, store.clone(), namespace.clone());
        let resolver = AutomationResolver::new(store.clone(), namespace.clone());
        let propagation = SettingsPropagation::new(store.clone(), namespace.clone());
        let evaluator = Arc::new(ScheduleEvaluator::new(controller.clone(), resolver.clone(), clock));

        Self {
            config,
            namespace,
            store,
            controller,
            resolver,
            propagation,
            evaluator,
            schedule_period: SCHEDULE_PERIOD,
            schedule: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Override the evaluation period (one minute by default)
    pub fn with_schedule_period(mut self, period: Duration) -> Self {
        self.schedule_period = period;
        self
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn transport(&self) -> &CommandTransport {
        self.controller.transport()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        self.controller.registry()
    }

    pub fn resolver(&self) -> &AutomationResolver {
        &self.resolver
    }

    pub fn evaluator(&self) -> &Arc<ScheduleEvaluator> {
        &self.evaluator
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Create objects, subscribe, open the serial link and start the
    /// scheduler. Configuration faults are logged and leave the driver idle;
    /// the return value tells whether it started.
    pub async fn start(&self) -> Result<bool> {
        self.create_info_objects().await?;

        if let Err(e) = self.config.validate() {
            if e.is_warning() {
                log::warn!("{}", e);
            } else {
                log::error!("{}", e);
            }
            return Ok(false);
        }

        self.create_device_objects().await?;
        self.create_global_objects().await?;
        self.propagation.create_objects().await?;
        self.subscribe().await?;

        self.controller.transport().connect().await;

        let handle = self.evaluator.clone().spawn(self.schedule_period);
        *self.schedule.lock().await = Some(handle);
        self.running.store(true, Ordering::SeqCst);

        log::info!(
            "Adapter {} started with {} rollershutter(s)",
            self.namespace.prefix(),
            self.registry().len()
        );
        Ok(true)
    }

    /// Stop the scheduler, cancel reconnects and close the port
    pub async fn stop(&self) {
        if let Some(handle) = self.schedule.lock().await.take() {
            handle.stop().await;
        }
        self.controller.transport().disconnect().await;
        self.running.store(false, Ordering::SeqCst);
        log::info!("Adapter {} stopped", self.namespace.prefix());
    }

    /// Entry point for every subscribed state change, local or foreign.
    /// Acknowledged updates are the driver's own writes and are ignored.
    pub async fn on_state_change(&self, change: &StateChange) {
        if change.state.ack {
            return;
        }

        if self.propagation.field_for(&change.id).is_some() {
            if let Err(e) = self.propagation.handle_change(&change.id, &change.state).await {
                log::error!("Failed to handle super-global change {}: {}", change.id, e);
            }
            return;
        }

        let relative = match self.namespace.relative(&change.id) {
            Some(relative) => relative,
            None => {
                log::debug!("Ignoring foreign state {}", change.id);
                return;
            }
        };

        let value = &change.state.val;
        match route(relative) {
            Route::AutomationSetting(field) => self.acknowledge_setting(&change.id, field, value).await,
            Route::Command(device_key) => match self.controller.handle_command_state(device_key, value).await {
                Ok(true) => {}
                Ok(false) => log::warn!("Command {} for {} was not delivered", value, device_key),
                Err(e) => log::warn!("{}", e),
            },
            Route::Button(device_key, command) => {
                if let Err(e) = self.controller.handle_button(device_key, command, value).await {
                    log::warn!("{}", e);
                }
            }
            Route::Ignored => log::debug!("Ignoring state {}", change.id),
        }
    }

    async fn acknowledge_setting(&self, id: &str, field: Option<AutomationField>, value: &Value) {
        if let Some(field) = field {
            if field != AutomationField::Enabled && !value.as_str().map(is_valid_time).unwrap_or(false) {
                log::warn!("Invalid time format for {}: {} (expected HH:MM)", id, value);
            }
        }
        log::info!("Automation setting {} changed to {}", id, value);
        if let Err(e) = self.store.set_state(id, value.clone(), true).await {
            log::error!("Failed to acknowledge {}: {}", id, e);
        }
    }

    async fn subscribe(&self) -> Result<()> {
        for (key, _) in self.registry().entries() {
            self.store.subscribe(&format!("{}.*", self.namespace.id(&key))).await?;
        }
        self.store
            .subscribe(&format!("{}.*", self.namespace.id(GLOBAL_FOLDER)))
            .await?;
        self.propagation.subscribe().await?;
        Ok(())
    }

    /// Create the object if needed and seed a value if none is stored yet
    async fn ensure_state(&self, relative: &str, object: StateObject, initial: Option<Value>) -> Result<()> {
        let id = self.namespace.id(relative);
        self.store.set_object_not_exists(&id, object).await?;
        if let Some(initial) = initial {
            if self.store.get_state(&id).await?.is_none() {
                self.store.set_state(&id, initial, true).await?;
            }
        }
        Ok(())
    }

    async fn create_info_objects(&self) -> Result<()> {
        self.store
            .set_object_not_exists(&self.namespace.id("info"), StateObject::folder("Information"))
            .await?;
        let object = StateObject::state("Device connected", "indicator.connected", ValueType::Boolean)
            .read_only()
            .with_default(false);
        self.store
            .set_object_not_exists(&self.namespace.id(CONNECTION_PATH), object)
            .await?;
        self.store
            .set_state(&self.namespace.id(CONNECTION_PATH), Value::Bool(false), true)
            .await?;
        Ok(())
    }

    async fn create_device_objects(&self) -> Result<()> {
        log::info!("Creating rollershutter objects...");
        let defaults = AutomationSettings::default();

        for (key, device) in self.registry().entries() {
            self.create_device_channel(&key, device).await?;

            let command = StateObject::state(format!("{} Command", device.name), "level.blind", ValueType::String)
                .with_states(&["open", "close", "stop"]);
            self.ensure_state(&command_path(&key), command, None).await?;

            for button in ShutterCommand::ALL {
                let label = match button {
                    ShutterCommand::Open => "Open",
                    ShutterCommand::Close => "Close",
                    ShutterCommand::Stop => "Stop",
                };
                let object = StateObject::state(format!("{} {}", device.name, label), "button", ValueType::Boolean)
                    .write_only()
                    .with_default(false);
                self.ensure_state(&button_path(&key, button), object, None).await?;
            }

            self.store
                .set_object_not_exists(
                    &self.namespace.id(&format!("{}.automation", key)),
                    StateObject::folder(format!("{} Automation", device.name)),
                )
                .await?;
            let override_object =
                StateObject::state("Override global settings", "switch", ValueType::Boolean).with_default(false);
            self.ensure_state(&override_path(&key), override_object, Some(Value::Bool(false)))
                .await?;

            for field in AutomationField::ALL {
                let object = StateObject::state(field.label(), field.role(), field.value_type())
                    .with_default(defaults.value(field));
                self.ensure_state(&individual_path(&key, field), object, Some(defaults.value(field)))
                    .await?;
            }
        }
        Ok(())
    }

    async fn create_device_channel(&self, key: &str, device: &DeviceConfig) -> Result<()> {
        let native = json!({
            "id": device.id,
            "openCommand": device.open_command,
            "closeCommand": device.close_command,
            "stopCommand": device.stop_command,
        });
        self.store
            .set_object_not_exists(
                &self.namespace.id(key),
                StateObject::channel(device.name.clone(), "blind").with_native(native),
            )
            .await?;
        Ok(())
    }

    async fn create_global_objects(&self) -> Result<()> {
        self.store
            .set_object_not_exists(&self.namespace.id("automation"), StateObject::folder("Automation"))
            .await?;
        self.store
            .set_object_not_exists(
                &self.namespace.id(GLOBAL_FOLDER),
                StateObject::folder("Global automation settings"),
            )
            .await?;

        let defaults = AutomationSettings::default();
        for field in AutomationField::ALL {
            let object = StateObject::state(field.label(), field.role(), field.value_type())
                .with_default(defaults.value(field));
            self.ensure_state(&global_path(field), object, Some(defaults.value(field)))
                .await?;
        }
        Ok(())
    }
}
