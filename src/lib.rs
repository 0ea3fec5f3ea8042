pub mod adapter;
pub mod automation;
pub mod commands;
pub mod config;
pub mod device;
pub mod serial;
pub mod state;

use std::sync::Arc;

use adapter::RollershutterAdapter;
use automation::SystemClock;
use config::AdapterConfig;
use serde_json::Value;
use serial::SerialInterface;
use state::{MemoryStateStore, Namespace, StateStore, ADAPTER_KIND};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Run one driver instance against the in-process state store until Ctrl-C.
///
/// Lines of the form `<relative id>=<value>` on stdin are written to the store
/// as unacknowledged updates, e.g. `Living_Room.command=open`.
pub async fn run(config: AdapterConfig) -> anyhow::Result<()> {
    let store = MemoryStateStore::new();
    let namespace = Namespace::new(ADAPTER_KIND, config.instance);
    store.register_instance(&namespace).await;

    let (client, mut events) = store.client().await;
    let (console, _console_events) = store.client().await;

    let adapter = RollershutterAdapter::new(
        config,
        Arc::new(client),
        Arc::new(SerialInterface::new()),
        Arc::new(SystemClock),
    );

    if !adapter.start().await? {
        log::warn!("Adapter not started, waiting for shutdown");
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                log::info!("Shutdown requested");
                break;
            }
            change = events.recv() => match change {
                Some(change) => adapter.on_state_change(&change).await,
                None => break,
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if let Some((relative, value)) = parse_console_line(&line) {
                        let id = namespace.id(relative);
                        if let Err(e) = console.set_state(&id, value, false).await {
                            log::warn!("Cannot write {}: {}", id, e);
                        }
                    } else if !line.trim().is_empty() {
                        log::warn!("Expected <id>=<value>, got \"{}\"", line.trim());
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    log::warn!("Console input closed: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    adapter.stop().await;
    Ok(())
}

/// Split `id=value`; the value is read as JSON and falls back to a plain string
fn parse_console_line(line: &str) -> Option<(&str, Value)> {
    let (id, raw) = line.trim().split_once('=')?;
    let (id, raw) = (id.trim(), raw.trim());
    if id.is_empty() {
        return None;
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Some((id, value))
}
