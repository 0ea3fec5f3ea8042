use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};

use super::{Namespace, Result, State, StateChange, StateObject, StateStore, StoreError};

/// In-process object and state store.
///
/// Several clients can share one store; each client receives change events
/// for the patterns it subscribed to. Used by the standalone host and tests.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    db: Arc<RwLock<Db>>,
    next_client: Arc<AtomicU64>,
}

#[derive(Default)]
struct Db {
    objects: HashMap<String, StateObject>,
    states: HashMap<String, State>,
    subscribers: HashMap<u64, Subscriber>,
}

struct Subscriber {
    patterns: Vec<Regex>,
    tx: mpsc::UnboundedSender<StateChange>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// New client view with its own event stream
    pub async fn client(&self) -> (StoreClient, mpsc::UnboundedReceiver<StateChange>) {
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.db.write().await.subscribers.insert(
            id,
            Subscriber {
                patterns: Vec::new(),
                tx,
            },
        );

        (
            StoreClient {
                db: self.db.clone(),
                id,
            },
            rx,
        )
    }

    /// Register an instance object so that `instances()` can discover it
    pub async fn register_instance(&self, namespace: &Namespace) {
        let id = namespace.instance_object_id();
        let mut db = self.db.write().await;
        db.objects
            .entry(id)
            .or_insert_with(|| StateObject::instance(namespace.prefix()));
    }

    pub async fn remove_instance(&self, namespace: &Namespace) {
        self.db
            .write()
            .await
            .objects
            .remove(&namespace.instance_object_id());
    }

    pub async fn object(&self, id: &str) -> Option<StateObject> {
        self.db.read().await.objects.get(id).cloned()
    }

    pub async fn state(&self, id: &str) -> Option<State> {
        self.db.read().await.states.get(id).cloned()
    }
}

/// One connection to a `MemoryStateStore`
pub struct StoreClient {
    db: Arc<RwLock<Db>>,
    id: u64,
}

impl Drop for StoreClient {
    fn drop(&mut self) {
        if let Ok(mut db) = self.db.try_write() {
            db.subscribers.remove(&self.id);
            return;
        }
        // Lock is busy: finish the removal once it is free
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let db = self.db.clone();
            let id = self.id;
            runtime.spawn(async move {
                db.write().await.subscribers.remove(&id);
            });
        }
    }
}

#[async_trait]
impl StateStore for StoreClient {
    async fn set_object_not_exists(&self, id: &str, object: StateObject) -> Result<bool> {
        let mut db = self.db.write().await;
        if db.objects.contains_key(id) {
            return Ok(false);
        }
        db.objects.insert(id.to_string(), object);
        Ok(true)
    }

    async fn get_state(&self, id: &str) -> Result<Option<State>> {
        Ok(self.db.read().await.states.get(id).cloned())
    }

    async fn set_state(&self, id: &str, val: Value, ack: bool) -> Result<()> {
        let mut db = self.db.write().await;
        if !db.objects.contains_key(id) {
            return Err(StoreError::ObjectNotFound(id.to_string()));
        }

        let state = State::new(val, ack);
        db.states.insert(id.to_string(), state.clone());

        let mut closed = Vec::new();
        for (client, subscriber) in &db.subscribers {
            if subscriber.patterns.iter().any(|p| p.is_match(id)) {
                let change = StateChange {
                    id: id.to_string(),
                    state: state.clone(),
                };
                if subscriber.tx.send(change).is_err() {
                    closed.push(*client);
                }
            }
        }
        for client in closed {
            log::debug!("Dropping subscriber {} with closed event stream", client);
            db.subscribers.remove(&client);
        }

        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<()> {
        let regex = glob_to_regex(pattern)?;
        let mut db = self.db.write().await;
        let subscriber = db
            .subscribers
            .get_mut(&self.id)
            .ok_or_else(|| StoreError::Unavailable("client disconnected".to_string()))?;
        if !subscriber.patterns.iter().any(|p| p.as_str() == regex.as_str()) {
            subscriber.patterns.push(regex);
        }
        Ok(())
    }

    async fn instances(&self, kind: &str) -> Result<Vec<u32>> {
        let prefix = format!("system.adapter.{}.", kind);
        let db = self.db.read().await;
        let mut found: Vec<u32> = db
            .objects
            .keys()
            .filter_map(|id| id.strip_prefix(prefix.as_str()))
            .filter_map(|rest| rest.parse().ok())
            .collect();
        found.sort_unstable();
        Ok(found)
    }
}

fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    Regex::new(&format!("^{}$", escaped.join(".*")))
        .map_err(|_| StoreError::InvalidPattern(pattern.to_string()))
}
