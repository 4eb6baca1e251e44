//! Notifier collaborator for human/approval triggers.
//!
//! The core treats this as fire-and-forget (spec §6): failures are logged by
//! the caller but never propagate into `errorCount` bookkeeping, since the
//! notifier is outside the trigger's own firing contract.

use serde_json::Value;

/// Abstract notification sink. The approval/human-in-the-loop node consumes
/// this; its own interfaces are out of scope here.
pub trait Notifier: Send + Sync {
    fn notify(&self, request: &Value) -> impl std::future::Future<Output = ()> + Send;

    fn notify_timeout(&self, request: &Value) -> impl std::future::Future<Output = ()> + Send;

    fn notify_escalation(
        &self,
        request: &Value,
        reason: &str,
    ) -> impl std::future::Future<Output = ()> + Send;
}
