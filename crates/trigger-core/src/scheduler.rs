//! Per-trigger cron scheduling tasks (spec §4.4).
//!
//! One `tokio::spawn` task per registered cron trigger, sleeping until the
//! precomputed `nextTrigger` and racing that sleep against a cancellation
//! token child of the manager's root token. The actual "what time comes
//! next" computation is delegated entirely to `CronParser`; this module only
//! owns task lifecycle, the concurrency cap, condition gating, and catch-up
//! replay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use trigger_types::{CronConfig, TriggerContext, TriggerKind};

use crate::cron_parser::{parse_timezone, CronError, ParsedCron};
use crate::expression::TriggerEvaluator;

/// Invoked once per fire attempt that passes condition/concurrency gating.
/// Returns the downstream run id on success.
pub type FireHook = Arc<dyn Fn(Uuid, TriggerContext) -> BoxFuture<'static, Result<String, String>> + Send + Sync>;

/// Invoked whenever `nextTrigger` is (re)computed, so the manager can persist
/// it via its `TriggerStore`.
pub type NextTriggerHook = Arc<dyn Fn(Uuid, Option<DateTime<Utc>>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Invoked when a fire was skipped (concurrency cap or condition gating).
pub type SkipHook = Arc<dyn Fn(Uuid, String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Invoked when `on_fire` returned an error.
pub type ErrorHook = Arc<dyn Fn(Uuid, String) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Clone)]
pub struct CronHooks {
    pub on_fire: FireHook,
    pub on_next_trigger: NextTriggerHook,
    pub on_skip: SkipHook,
    pub on_error: ErrorHook,
}

struct CronEntry {
    workflow_name: String,
    config: CronConfig,
    parsed: ParsedCron,
    tz: Tz,
    evaluator: Arc<TriggerEvaluator>,
    hooks: CronHooks,
    active_runs: Arc<AtomicU32>,
    cancel: CancellationToken,
}

/// Owns one scheduling task per registered cron trigger.
pub struct CronScheduler {
    root_cancel: CancellationToken,
    entries: DashMap<Uuid, Arc<CronEntry>>,
    /// `next_trigger` cache, read by `register`'s `run_immediately` check and
    /// by tests; the authoritative copy lives in the `TriggerStore` via
    /// `NextTriggerHook`.
    next_cache: RwLock<HashMap<Uuid, DateTime<Utc>>>,
}

impl CronScheduler {
    pub fn new() -> Self {
        Self {
            root_cancel: CancellationToken::new(),
            entries: DashMap::new(),
            next_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Register a cron trigger: compute its first `nextTrigger`, optionally
    /// fire immediately, and spawn the sleep/fire task.
    pub async fn register(
        &self,
        trigger_id: Uuid,
        workflow_name: String,
        config: CronConfig,
        evaluator: Arc<TriggerEvaluator>,
        hooks: CronHooks,
    ) -> Result<(), CronError> {
        let parsed = ParsedCron::parse(&config.expression)?;
        let tz = parse_timezone(config.timezone.as_deref())?;
        let now = Utc::now();
        let next = parsed.next_occurrence(now, tz)?;

        // Re-registering an already-enrolled trigger (e.g. a duplicate
        // `start()` call) must cancel the old task before spawning a new
        // one, or both would fire independently until `stop_all`.
        self.unregister(trigger_id);

        self.next_cache.write().await.insert(trigger_id, next);
        (hooks.on_next_trigger)(trigger_id, Some(next)).await;

        let entry = Arc::new(CronEntry {
            workflow_name,
            config: config.clone(),
            parsed,
            tz,
            evaluator,
            hooks,
            active_runs: Arc::new(AtomicU32::new(0)),
            cancel: self.root_cancel.child_token(),
        });
        self.entries.insert(trigger_id, Arc::clone(&entry));

        if config.run_immediately {
            // Fired once without advancing `nextTrigger` (spec §4.4).
            Self::attempt_fire(trigger_id, &entry, now).await;
        }

        let scheduler_entry = Arc::clone(&entry);
        tokio::spawn(Self::run_loop(trigger_id, scheduler_entry, next));

        Ok(())
    }

    async fn run_loop(trigger_id: Uuid, entry: Arc<CronEntry>, mut next: DateTime<Utc>) {
        loop {
            let deadline = tokio_instant_for(next);
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                _ = entry.cancel.cancelled() => {
                    tracing::debug!(%trigger_id, "cron task cancelled");
                    return;
                }
            }

            let now = Utc::now();
            Self::attempt_fire(trigger_id, &entry, now).await;

            match entry.parsed.next_occurrence(now, entry.tz) {
                Ok(computed_next) => {
                    next = computed_next;
                    (entry.hooks.on_next_trigger)(trigger_id, Some(next)).await;
                }
                Err(error) => {
                    tracing::warn!(%trigger_id, %error, "failed to compute next cron occurrence, stopping task");
                    (entry.hooks.on_next_trigger)(trigger_id, None).await;
                    return;
                }
            }
        }
    }

    async fn attempt_fire(trigger_id: Uuid, entry: &Arc<CronEntry>, now: DateTime<Utc>) {
        let mut metadata = serde_json::json!({
            "expression": entry.config.expression,
            "timezone": entry.tz.to_string(),
            "scheduled": now.to_rfc3339(),
        });

        if let Some(condition) = &entry.config.condition {
            let mut probe_ctx = TriggerContext::new(trigger_id, TriggerKind::Cron, None);
            probe_ctx.metadata = metadata.clone();
            match entry.evaluator.evaluate_predicate(condition, &probe_ctx) {
                Ok(false) => {
                    (entry.hooks.on_skip)(trigger_id, "condition evaluated to false".to_string()).await;
                    return;
                }
                Err(error) => {
                    tracing::warn!(%trigger_id, %error, "cron condition evaluation failed, skipping fire");
                    (entry.hooks.on_skip)(trigger_id, format!("condition error: {error}")).await;
                    return;
                }
                Ok(true) => {}
            }
        }

        if let Some(max_concurrent) = entry.config.max_concurrent {
            if entry.active_runs.load(Ordering::SeqCst) >= max_concurrent {
                (entry.hooks.on_skip)(
                    trigger_id,
                    format!("concurrency cap of {max_concurrent} reached"),
                )
                .await;
                return;
            }
        }

        let payload = match &entry.config.input {
            Some(dynamic) => {
                let ctx = serde_json::json!({ "trigger": metadata.clone() });
                match entry.evaluator.resolve_dynamic(dynamic, &ctx) {
                    Ok(value) => Some(value),
                    Err(error) => {
                        tracing::warn!(%trigger_id, %error, "cron input evaluation failed");
                        None
                    }
                }
            }
            None => None,
        };

        let mut context = TriggerContext::new(trigger_id, TriggerKind::Cron, payload);
        metadata["workflowName"] = serde_json::Value::String(entry.workflow_name.clone());
        context.metadata = metadata;

        entry.active_runs.fetch_add(1, Ordering::SeqCst);
        let result = (entry.hooks.on_fire)(trigger_id, context).await;
        entry.active_runs.fetch_sub(1, Ordering::SeqCst);

        if let Err(error) = result {
            (entry.hooks.on_error)(trigger_id, error).await;
        }
    }

    /// Replay occurrences in `(since, now)`, firing each synchronously in
    /// scheduled order. Called by the manager at startup for triggers with
    /// `catchUp = true`.
    pub async fn catch_up(&self, trigger_id: Uuid, since: DateTime<Utc>) -> Result<u32, CronError> {
        let Some(entry) = self.entries.get(&trigger_id).map(|e| Arc::clone(&e)) else {
            return Ok(0);
        };

        let now = Utc::now();
        let mut cursor = since;
        let mut fired = 0u32;
        loop {
            let next = entry.parsed.next_occurrence(cursor, entry.tz)?;
            if next >= now {
                break;
            }
            Self::attempt_fire(trigger_id, &entry, next).await;
            cursor = next;
            fired += 1;
        }
        Ok(fired)
    }

    /// Tear down the task and state for a single trigger.
    pub fn unregister(&self, trigger_id: Uuid) {
        if let Some((_, entry)) = self.entries.remove(&trigger_id) {
            entry.cancel.cancel();
        }
    }

    /// Cancel every scheduling task (spec §4.7 `stop()`).
    pub fn stop_all(&self) {
        self.root_cancel.cancel();
        self.entries.clear();
    }

    pub async fn next_trigger(&self, trigger_id: Uuid) -> Option<DateTime<Utc>> {
        self.next_cache.read().await.get(&trigger_id).copied()
    }
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn tokio_instant_for(target: DateTime<Utc>) -> tokio::time::Instant {
    let now_utc = Utc::now();
    let delta = target - now_utc;
    let std_delta = delta.to_std().unwrap_or(std::time::Duration::ZERO);
    tokio::time::Instant::now() + std_delta
}
