//! Reference in-memory `TriggerStore` implementation.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use trigger_core::TriggerStore;
use trigger_types::{Trigger, TriggerError, TriggerKind, TriggerUpdate};
use uuid::Uuid;

/// `Arc<RwLock<HashMap<..>>>`-backed store, sufficient for single-process
/// deployments and tests. Durable backends implement the same trait.
#[derive(Debug, Default, Clone)]
pub struct InMemoryTriggerStore {
    inner: Arc<RwLock<HashMap<Uuid, Trigger>>>,
}

impl InMemoryTriggerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TriggerStore for InMemoryTriggerStore {
    async fn save(&self, trigger: &Trigger) -> Result<(), TriggerError> {
        self.inner.write().await.insert(trigger.id, trigger.clone());
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Trigger>, TriggerError> {
        Ok(self.inner.read().await.get(id).cloned())
    }

    async fn update(&self, id: &Uuid, update: TriggerUpdate) -> Result<(), TriggerError> {
        let mut guard = self.inner.write().await;
        let trigger = guard
            .get_mut(id)
            .ok_or_else(|| TriggerError::NotFound(id.to_string()))?;

        if let Some(enabled) = update.enabled {
            trigger.enabled = enabled;
        }
        if let Some(last_triggered) = update.last_triggered {
            trigger.last_triggered = Some(last_triggered);
        }
        if let Some(next_trigger) = update.next_trigger {
            trigger.next_trigger = next_trigger;
        }
        if update.increment_trigger_count {
            trigger.trigger_count += 1;
        }
        if update.increment_error_count {
            trigger.error_count += 1;
        }
        if let Some(last_error) = update.last_error {
            trigger.last_error = last_error;
        }
        Ok(())
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, TriggerError> {
        Ok(self.inner.write().await.remove(id).is_some())
    }

    async fn list(&self, workflow_name: Option<&str>) -> Result<Vec<Trigger>, TriggerError> {
        let guard = self.inner.read().await;
        Ok(guard
            .values()
            .filter(|trigger| workflow_name.is_none_or(|name| trigger.workflow_name == name))
            .cloned()
            .collect())
    }

    async fn list_enabled(&self) -> Result<Vec<Trigger>, TriggerError> {
        let guard = self.inner.read().await;
        Ok(guard.values().filter(|trigger| trigger.enabled).cloned().collect())
    }

    async fn list_by_type(&self, kind: TriggerKind) -> Result<Vec<Trigger>, TriggerError> {
        let guard = self.inner.read().await;
        Ok(guard.values().filter(|trigger| trigger.kind() == kind).cloned().collect())
    }
}
