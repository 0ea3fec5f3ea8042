use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Local, NaiveDateTime, Weekday};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};

use super::settings::is_valid_time;
use super::{AutomationResolver, Result, SettingsSource};
use crate::commands::ShutterController;
use crate::device::{DeviceConfig, ShutterCommand};

pub const SCHEDULE_PERIOD: Duration = Duration::from_secs(60);

const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Source of local wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> Result<NaiveDateTime>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Result<NaiveDateTime> {
        Ok(Local::now().naive_local())
    }
}

/// Zero-padded `HH:MM` and whether the date falls on Monday to Friday
pub fn time_of_day(now: &NaiveDateTime) -> (String, bool) {
    let current_time = now.format("%H:%M").to_string();
    let is_workday = !matches!(now.weekday(), Weekday::Sat | Weekday::Sun);
    (current_time, is_workday)
}

/// One automation action fired during a tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggeredAction {
    pub device: String,
    pub command: ShutterCommand,
    pub time: String,
    pub source: SettingsSource,
    /// Whether the transport accepted the command
    pub sent: bool,
}

/// Compares the clock against every device's effective open/close times
pub struct ScheduleEvaluator {
    controller: ShutterController,
    resolver: AutomationResolver,
    clock: Arc<dyn Clock>,
}

impl ScheduleEvaluator {
    pub fn new(controller: ShutterController, resolver: AutomationResolver, clock: Arc<dyn Clock>) -> Self {
        Self {
            controller,
            resolver,
            clock,
        }
    }

    pub fn controller(&self) -> &ShutterController {
        &self.controller
    }

    /// Run one tick. Only a clock failure aborts the tick; problems with a
    /// single device are logged and that device is skipped.
    pub async fn evaluate(&self) -> Result<Vec<TriggeredAction>> {
        let now = self.clock.now()?;
        let (current_time, is_workday) = time_of_day(&now);
        log::debug!(
            "Automation check at {} ({})",
            current_time,
            if is_workday { "workday" } else { "weekend" }
        );

        let mut actions = Vec::new();
        for (key, device) in self.controller.registry().entries() {
            let mut fired = self.evaluate_device(&key, device, &current_time, is_workday).await;
            actions.append(&mut fired);
        }
        Ok(actions)
    }

    async fn evaluate_device(
        &self,
        key: &str,
        device: &DeviceConfig,
        current_time: &str,
        is_workday: bool,
    ) -> Vec<TriggeredAction> {
        let effective = self.resolver.effective_settings(key).await;
        if !effective.settings.enabled {
            return Vec::new();
        }

        let (open_time, close_time) = effective.settings.times_for(is_workday);
        if !is_valid_time(open_time) || !is_valid_time(close_time) {
            log::warn!(
                "Invalid automation times for {} (open \"{}\", close \"{}\", {} settings), skipping",
                device.name,
                open_time,
                close_time,
                effective.source
            );
            return Vec::new();
        }

        let mut fired = Vec::new();
        for (target, command) in [(open_time, ShutterCommand::Open), (close_time, ShutterCommand::Close)] {
            if current_time != target {
                continue;
            }
            log::info!(
                "Automation: {} {} at {} ({} settings)",
                command,
                device.name,
                current_time,
                effective.source
            );
            let sent = self.controller.execute(key, device, command).await;
            fired.push(TriggeredAction {
                device: key.to_string(),
                command,
                time: current_time.to_string(),
                source: effective.source,
                sent,
            });
        }
        fired
    }

    /// Evaluate once immediately, then every `period` until stopped
    pub fn spawn(self: Arc<Self>, period: Duration) -> ScheduleHandle {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.evaluate().await {
                            log::error!("Automation check failed: {}", e);
                        }
                    }
                }
            }
            log::debug!("Automation scheduler stopped");
        });

        ScheduleHandle { stop_tx, task }
    }
}

/// Running per-minute loop
pub struct ScheduleHandle {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ScheduleHandle {
    pub async fn stop(self) {
        let ScheduleHandle { stop_tx, mut task } = self;
        let _ = stop_tx.send(()).await;
        if timeout(STOP_TIMEOUT, &mut task).await.is_err() {
            log::warn!("Automation scheduler did not stop in time, aborting");
            task.abort();
        }
    }
}
