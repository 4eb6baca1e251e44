//! Shared domain types for the workflow trigger subsystem.
//!
//! This crate contains the trigger data model (`Trigger`, `TriggerConfig` and
//! its per-kind variants, `TriggerContext`) and the flat `TriggerError` error
//! enum used across the `trigger-core` and `trigger-infra` crates.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror,
//! secrecy.

pub mod error;
pub mod trigger;

pub use error::TriggerError;
pub use trigger::{
    CronConfig, DynamicValue, EventConfig, HmacAlgorithm, RateLimitConfig, RateLimitDiscipline,
    Trigger, TriggerConfig, TriggerContext, TriggerKind, TriggerStats, TriggerUpdate,
    WebhookAuth, WebhookConfig, WebhookMethod,
};
