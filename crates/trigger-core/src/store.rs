//! Trigger persistence trait.
//!
//! The reference implementation (`trigger-infra::InMemoryTriggerStore`) keeps
//! everything in an `Arc<RwLock<HashMap<..>>>`; any backing store must
//! satisfy read-your-writes for the same logical trigger within a single
//! process (spec §6).

use trigger_types::{Trigger, TriggerError, TriggerKind, TriggerUpdate};
use uuid::Uuid;

/// Storage interface for trigger records.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait TriggerStore: Send + Sync {
    /// Insert a new trigger record.
    fn save(&self, trigger: &Trigger) -> impl std::future::Future<Output = Result<(), TriggerError>> + Send;

    /// Fetch a trigger by id.
    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Trigger>, TriggerError>> + Send;

    /// Apply a partial update (counters, enabled flag, next_trigger, ...).
    fn update(
        &self,
        id: &Uuid,
        update: TriggerUpdate,
    ) -> impl std::future::Future<Output = Result<(), TriggerError>> + Send;

    /// Delete a trigger record. Returns `true` if it existed.
    fn delete(&self, id: &Uuid) -> impl std::future::Future<Output = Result<bool, TriggerError>> + Send;

    /// List triggers, optionally filtered by workflow name.
    fn list(
        &self,
        workflow_name: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Vec<Trigger>, TriggerError>> + Send;

    /// List only enabled triggers.
    fn list_enabled(&self) -> impl std::future::Future<Output = Result<Vec<Trigger>, TriggerError>> + Send;

    /// List triggers of a given kind.
    fn list_by_type(
        &self,
        kind: TriggerKind,
    ) -> impl std::future::Future<Output = Result<Vec<Trigger>, TriggerError>> + Send;
}
