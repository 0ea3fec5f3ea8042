use std::sync::Arc;

use serde_json::Value;

use super::settings::{global_path, super_global_path, AutomationField, AutomationSettings, SUPER_GLOBAL_FOLDER};
use super::Result;
use crate::state::{Namespace, State, StateObject, StateStore};

/// Instance that owns the SuperGlobal set
pub const OWNER_INSTANCE: u32 = 0;

/// Mirrors the SuperGlobal settings into the Global layer of every instance.
///
/// Fan-out is push-only and last-write-wins; two instances writing the
/// SuperGlobal set at nearly the same time race without resolution.
#[derive(Clone)]
pub struct SettingsPropagation {
    store: Arc<dyn StateStore>,
    namespace: Namespace,
    owner: Namespace,
}

impl SettingsPropagation {
    pub fn new(store: Arc<dyn StateStore>, namespace: Namespace) -> Self {
        let owner = Namespace::new(namespace.kind(), OWNER_INSTANCE);
        Self {
            store,
            namespace,
            owner,
        }
    }

    pub fn is_owner(&self) -> bool {
        self.namespace.index() == OWNER_INSTANCE
    }

    pub fn super_global_id(&self, field: AutomationField) -> String {
        self.owner.id(&super_global_path(field))
    }

    /// SuperGlobal field addressed by `id`, if any
    pub fn field_for(&self, id: &str) -> Option<AutomationField> {
        self.owner
            .relative(id)
            .and_then(|rel| rel.strip_prefix(SUPER_GLOBAL_FOLDER))
            .and_then(|rest| rest.strip_prefix('.'))
            .and_then(AutomationField::from_key)
    }

    /// Create the SuperGlobal objects with defaults. Only the owner does this.
    pub async fn create_objects(&self) -> Result<()> {
        if !self.is_owner() {
            return Ok(());
        }

        self.store
            .set_object_not_exists(
                &self.owner.id(SUPER_GLOBAL_FOLDER),
                StateObject::folder("Settings shared by all instances"),
            )
            .await?;

        let defaults = AutomationSettings::default();
        for field in AutomationField::ALL {
            let id = self.super_global_id(field);
            let object = StateObject::state(field.label(), field.role(), field.value_type())
                .with_default(defaults.value(field));
            if self.store.set_object_not_exists(&id, object).await? {
                self.store.set_state(&id, defaults.value(field), true).await?;
            }
        }
        Ok(())
    }

    /// Every instance listens to the owner's SuperGlobal set
    pub async fn subscribe(&self) -> Result<()> {
        let pattern = format!("{}.*", self.owner.id(SUPER_GLOBAL_FOLDER));
        self.store.subscribe(&pattern).await?;
        Ok(())
    }

    /// Persist an unacknowledged SuperGlobal change, then write it into the
    /// Global layer of every instance currently configured. Returns the number
    /// of instances updated; failures for one instance do not stop the others.
    pub async fn handle_change(&self, id: &str, state: &State) -> Result<usize> {
        let field = match self.field_for(id) {
            Some(field) => field,
            None => return Ok(0),
        };
        if state.ack {
            return Ok(0);
        }

        self.store.set_state(id, state.val.clone(), true).await?;
        log::info!("Super-global {} changed to {}", field.key(), state.val);

        Ok(self.fan_out(field, &state.val).await)
    }

    async fn fan_out(&self, field: AutomationField, value: &Value) -> usize {
        let instances = match self.store.instances(self.namespace.kind()).await {
            Ok(instances) => instances,
            Err(e) => {
                log::error!("Could not enumerate instances: {}", e);
                return 0;
            }
        };

        let mut updated = 0;
        for index in instances {
            let target = Namespace::new(self.namespace.kind(), index).id(&global_path(field));
            match self.store.set_state(&target, value.clone(), true).await {
                Ok(()) => {
                    log::debug!("Propagated {} to {}", field.key(), target);
                    updated += 1;
                }
                Err(e) => log::error!("Failed to propagate {} to {}: {}", field.key(), target, e),
            }
        }
        log::info!("Propagated super-global {} to {} instance(s)", field.key(), updated);
        updated
    }
}
