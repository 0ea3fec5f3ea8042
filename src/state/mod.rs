//! Boundary to the host platform's object and state store.
//!
//! Ids are dotted paths. Every instance of the driver owns the subtree below
//! its namespace `rollershutter-arduino.<index>`; anything outside of it is a
//! foreign id.

pub mod memory;

pub use memory::{MemoryStateStore, StoreClient};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ADAPTER_KIND: &str = "rollershutter-arduino";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Invalid subscription pattern '{0}'")]
    InvalidPattern(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Current value of a state plus whether the driver has confirmed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub val: Value,
    pub ack: bool,
    pub ts: DateTime<Utc>,
}

impl State {
    pub fn new(val: Value, ack: bool) -> Self {
        Self {
            val,
            ack,
            ts: Utc::now(),
        }
    }
}

/// Delivered for every write to a subscribed id
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub id: String,
    pub state: State,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Instance,
    Channel,
    Folder,
    State,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Boolean,
    String,
    Number,
    Object,
}

/// Descriptor passed to `set_object_not_exists`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateObject {
    pub kind: ObjectKind,
    pub name: String,
    pub role: String,
    pub value_type: Option<ValueType>,
    pub read: bool,
    pub write: bool,
    pub def: Option<Value>,
    pub states: Option<Vec<String>>,
    pub native: Value,
}

impl StateObject {
    pub fn channel(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            kind: ObjectKind::Channel,
            name: name.into(),
            role: role.into(),
            value_type: None,
            read: false,
            write: false,
            def: None,
            states: None,
            native: Value::Null,
        }
    }

    pub fn folder(name: impl Into<String>) -> Self {
        Self {
            kind: ObjectKind::Folder,
            ..Self::channel(name, "")
        }
    }

    pub fn instance(name: impl Into<String>) -> Self {
        Self {
            kind: ObjectKind::Instance,
            ..Self::channel(name, "")
        }
    }

    pub fn state(name: impl Into<String>, role: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            kind: ObjectKind::State,
            name: name.into(),
            role: role.into(),
            value_type: Some(value_type),
            read: true,
            write: true,
            def: None,
            states: None,
            native: Value::Null,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.write = false;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.read = false;
        self
    }

    pub fn with_default(mut self, def: impl Into<Value>) -> Self {
        self.def = Some(def.into());
        self
    }

    pub fn with_states(mut self, states: &[&str]) -> Self {
        self.states = Some(states.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_native(mut self, native: Value) -> Self {
        self.native = native;
        self
    }
}

/// Capabilities the driver consumes from the host
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Create the object unless one already exists. Returns true if created.
    async fn set_object_not_exists(&self, id: &str, object: StateObject) -> Result<bool>;

    async fn get_state(&self, id: &str) -> Result<Option<State>>;

    async fn set_state(&self, id: &str, val: Value, ack: bool) -> Result<()>;

    /// Register interest in ids matching a glob pattern (`*` wildcard)
    async fn subscribe(&self, pattern: &str) -> Result<()>;

    /// Indices of all configured instances of the given adapter kind
    async fn instances(&self, kind: &str) -> Result<Vec<u32>>;
}

/// Id builder for one instance's subtree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    kind: String,
    index: u32,
    prefix: String,
}

impl Namespace {
    pub fn new(kind: impl Into<String>, index: u32) -> Self {
        let kind = kind.into();
        let prefix = format!("{}.{}", kind, index);
        Self {
            kind,
            index,
            prefix,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full id for a path relative to this namespace
    pub fn id(&self, relative: &str) -> String {
        format!("{}.{}", self.prefix, relative)
    }

    /// Relative path if `id` lives below this namespace
    pub fn relative<'a>(&self, id: &'a str) -> Option<&'a str> {
        id.strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
    }

    /// Object id under which the host registers this instance
    pub fn instance_object_id(&self) -> String {
        format!("system.adapter.{}", self.prefix)
    }
}
