//! `TriggerManager` — single owner of trigger lifecycle, persistence, and
//! subscriber fan-out (spec §4.7).
//!
//! Generic over `TriggerStore` so embedders can swap the reference in-memory
//! implementation (`trigger-infra::InMemoryTriggerStore`) for a durable one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use trigger_types::{
    CronConfig, Trigger, TriggerConfig, TriggerContext, TriggerError, TriggerKind, TriggerStats,
    TriggerUpdate, WebhookMethod,
};

use crate::config::ManagerConfig;
use crate::dedup::DeduplicationCache;
use crate::event::EventBus;
use crate::expression::TriggerEvaluator;
use crate::rate_limiter::RateLimiter;
use crate::scheduler::{CronHooks, CronScheduler};
use crate::store::TriggerStore;
use crate::validate::{validate_cron_config, validate_event_config, validate_webhook_config};

/// Downstream collaborator the manager invokes on every fire (spec §6).
/// Synchronous-returning from the manager's point of view: the manager
/// awaits it and maps success to a run id, failure to `FireFailure`.
pub type OnFireFn =
    Arc<dyn Fn(Trigger, TriggerContext) -> BoxFuture<'static, Result<String, String>> + Send + Sync>;

/// Subscriber installed via `on_trigger`. Exceptions (`Err`) are logged and
/// never prevent other subscribers or the counter update from applying.
pub type SubscriberFn =
    Arc<dyn Fn(Trigger, TriggerContext) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Handle returned from `on_trigger`; call `unsubscribe` to detach.
pub struct TriggerSubscription {
    id: u64,
    subscribers: Arc<DashMap<u64, SubscriberFn>>,
}

impl TriggerSubscription {
    pub fn unsubscribe(self) {
        self.subscribers.remove(&self.id);
    }
}

struct WebhookEntry {
    trigger_id: Uuid,
    registered_at: u64,
}

pub struct TriggerManager<S: TriggerStore> {
    store: Arc<S>,
    evaluator: Arc<TriggerEvaluator>,
    scheduler: Arc<CronScheduler>,
    event_bus: Arc<EventBus<Value>>,
    rate_limiter: Arc<RateLimiter>,
    dedup: Arc<DeduplicationCache>,
    on_fire: OnFireFn,
    subscribers: Arc<DashMap<u64, SubscriberFn>>,
    next_subscriber_id: AtomicU64,
    path_index: DashMap<(WebhookMethod, String), Vec<WebhookEntry>>,
    event_unsubscribes: RwLock<HashMap<Uuid, crate::event::UnsubscribeHandle<Value>>>,
    registration_seq: AtomicU64,
    running: AtomicBool,
    sweep_tasks: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl<S: TriggerStore + 'static> TriggerManager<S> {
    pub fn new(store: S, on_fire: OnFireFn) -> Arc<Self> {
        Self::with_config(store, on_fire, ManagerConfig::default())
    }

    /// Construct with explicit sweep intervals (spec §1 ambient
    /// `ManagerConfig`). Spawns the dedup and rate-limiter sweep tasks
    /// immediately; they run for the lifetime of the returned `Arc` and are
    /// aborted by `stop()`.
    pub fn with_config(store: S, on_fire: OnFireFn, config: ManagerConfig) -> Arc<Self> {
        let manager = Arc::new(Self {
            store: Arc::new(store),
            evaluator: Arc::new(TriggerEvaluator::new()),
            scheduler: Arc::new(CronScheduler::new()),
            event_bus: EventBus::new(),
            rate_limiter: Arc::new(RateLimiter::new()),
            dedup: Arc::new(DeduplicationCache::new()),
            on_fire,
            subscribers: Arc::new(DashMap::new()),
            next_subscriber_id: AtomicU64::new(0),
            path_index: DashMap::new(),
            event_unsubscribes: RwLock::new(HashMap::new()),
            registration_seq: AtomicU64::new(0),
            running: AtomicBool::new(false),
            sweep_tasks: std::sync::Mutex::new(Vec::new()),
        });

        let dedup = Arc::clone(&manager.dedup);
        let dedup_interval = config.dedup_sweep_interval_ms.max(1);
        let dedup_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(dedup_interval));
            loop {
                ticker.tick().await;
                dedup.sweep(dedup_interval);
            }
        });

        let rate_limiter = Arc::clone(&manager.rate_limiter);
        let rate_limiter_interval = config.rate_limiter_sweep_interval_ms.max(1);
        let rate_limiter_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(rate_limiter_interval));
            loop {
                ticker.tick().await;
                rate_limiter.token_bucket.sweep();
                rate_limiter.sliding_window.sweep(rate_limiter_interval);
            }
        });

        manager.sweep_tasks.lock().unwrap().extend([dedup_task, rate_limiter_task]);
        manager
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn dedup_cache(&self) -> &Arc<DeduplicationCache> {
        &self.dedup
    }

    pub fn evaluator(&self) -> &Arc<TriggerEvaluator> {
        &self.evaluator
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------

    /// Validate, persist, and enroll a new trigger. Returns its id.
    pub async fn register(
        self: &Arc<Self>,
        workflow_name: impl Into<String>,
        config: TriggerConfig,
    ) -> Result<Uuid, TriggerError> {
        let errors = match &config {
            TriggerConfig::Cron(c) => validate_cron_config(c),
            TriggerConfig::Webhook(c) => validate_webhook_config(c),
            TriggerConfig::Event(c) => validate_event_config(c),
        };
        if !errors.is_empty() {
            return Err(TriggerError::InvalidConfig(errors.join("; ")));
        }

        let registered_at = self.registration_seq.fetch_add(1, Ordering::SeqCst);
        let trigger = Trigger::new(workflow_name, config, registered_at);
        let trigger_id = trigger.id;

        self.store.save(&trigger).await?;
        self.enroll(&trigger).await?;

        tracing::info!(%trigger_id, workflow_name = %trigger.workflow_name, kind = %trigger.kind(), "registered trigger");
        Ok(trigger_id)
    }

    /// Enroll a persisted, enabled trigger with its sub-component. Used by
    /// `register`, `enable`, and `start`.
    async fn enroll(self: &Arc<Self>, trigger: &Trigger) -> Result<(), TriggerError> {
        if !trigger.enabled {
            return Ok(());
        }
        match &trigger.config {
            TriggerConfig::Cron(config) => self.enroll_cron(trigger.id, trigger, config).await?,
            TriggerConfig::Webhook(_) => self.enroll_webhook(trigger),
            TriggerConfig::Event(config) => self.enroll_event(trigger, config).await,
        }
        Ok(())
    }

    async fn enroll_cron(
        self: &Arc<Self>,
        trigger_id: Uuid,
        trigger: &Trigger,
        config: &CronConfig,
    ) -> Result<(), TriggerError> {
        let hooks = self.cron_hooks();
        self.scheduler
            .register(
                trigger_id,
                trigger.workflow_name.clone(),
                config.clone(),
                Arc::clone(&self.evaluator),
                hooks,
            )
            .await
            .map_err(|error| TriggerError::InternalError(error.to_string()))?;

        if config.catch_up {
            let since = trigger.last_triggered.unwrap_or(trigger.created_at);
            let scheduler = Arc::clone(&self.scheduler);
            let fired = scheduler
                .catch_up(trigger_id, since)
                .await
                .map_err(|error| TriggerError::InternalError(error.to_string()))?;
            if fired > 0 {
                tracing::info!(%trigger_id, fired, "replayed missed cron occurrences");
            }
        }
        Ok(())
    }

    fn cron_hooks(self: &Arc<Self>) -> CronHooks {
        let manager = Arc::clone(self);
        let on_fire: crate::scheduler::FireHook = Arc::new(move |trigger_id, context| {
            let manager = Arc::clone(&manager);
            Box::pin(async move {
                manager
                    .do_fire(trigger_id, context)
                    .await
                    .map_err(|error| error.to_string())
            })
        });

        let manager = Arc::clone(self);
        let on_next_trigger: crate::scheduler::NextTriggerHook = Arc::new(move |trigger_id, next| {
            let manager = Arc::clone(&manager);
            Box::pin(async move {
                let _ = manager
                    .store
                    .update(
                        &trigger_id,
                        TriggerUpdate {
                            next_trigger: Some(next),
                            ..Default::default()
                        },
                    )
                    .await;
            })
        });

        let on_skip: crate::scheduler::SkipHook = Arc::new(move |trigger_id, reason| {
            Box::pin(async move {
                tracing::debug!(%trigger_id, reason, "cron fire skipped");
            })
        });

        let manager = Arc::clone(self);
        let on_error: crate::scheduler::ErrorHook = Arc::new(move |trigger_id, error| {
            let manager = Arc::clone(&manager);
            Box::pin(async move {
                let _ = manager
                    .store
                    .update(
                        &trigger_id,
                        TriggerUpdate {
                            increment_error_count: true,
                            last_error: Some(Some(error)),
                            ..Default::default()
                        },
                    )
                    .await;
            })
        });

        CronHooks {
            on_fire,
            on_next_trigger,
            on_skip,
            on_error,
        }
    }

    fn enroll_webhook(&self, trigger: &Trigger) {
        let TriggerConfig::Webhook(config) = &trigger.config else {
            return;
        };
        let key = (config.method, config.path.to_ascii_lowercase());
        self.path_index.entry(key).or_default().push(WebhookEntry {
            trigger_id: trigger.id,
            registered_at: trigger.registered_at,
        });
    }

    async fn enroll_event(self: &Arc<Self>, trigger: &Trigger, config: &trigger_types::EventConfig) {
        let trigger_id = trigger.id;
        let event_source_filter = config.source.clone();
        let manager = Arc::clone(self);

        let handle = self.event_bus.on(config.event_type.clone(), move |envelope| {
            let manager = Arc::clone(&manager);
            let event_source_filter = event_source_filter.clone();
            Box::pin(async move {
                if let Some(expected_source) = &event_source_filter {
                    if envelope.source.as_deref() != Some(expected_source.as_str()) {
                        return Ok(());
                    }
                }

                let Ok(Some(trigger)) = manager.store.get(&trigger_id).await else {
                    return Ok(());
                };
                let TriggerConfig::Event(config) = &trigger.config else {
                    return Ok(());
                };

                if let Some(filter) = &config.filter {
                    let filter_context = serde_json::json!({
                        "source": envelope.source,
                        "payload": envelope.payload,
                    });
                    match manager.evaluator.evaluate_bool(filter, &filter_context) {
                        Ok(false) => return Ok(()),
                        Err(error) => {
                            tracing::warn!(%trigger_id, %error, "event filter evaluation failed");
                            return Ok(());
                        }
                        Ok(true) => {}
                    }
                }

                let payload = match &config.transform {
                    Some(dynamic) => manager
                        .evaluator
                        .resolve_dynamic(dynamic, &envelope.payload)
                        .unwrap_or_else(|_| envelope.payload.clone()),
                    None => envelope.payload.clone(),
                };

                let mut context = TriggerContext::new(trigger_id, TriggerKind::Event, Some(payload));
                context.metadata = serde_json::json!({
                    "eventType": envelope.event_type,
                    "source": envelope.source,
                });

                manager
                    .do_fire(trigger_id, context)
                    .await
                    .map_err(|error| error.to_string())
            })
        });

        // Re-enrolling an already-subscribed trigger must unsubscribe the
        // old handle first: dropping an `UnsubscribeHandle` without calling
        // `unsubscribe()` leaves the old subscription permanently active,
        // so the event would fire twice forever with no way to reach it.
        let previous = self.event_unsubscribes.write().await.insert(trigger_id, handle);
        if let Some(previous) = previous {
            previous.unsubscribe();
        }
    }

    /// Tear down sub-component state and delete the record.
    pub async fn unregister(self: &Arc<Self>, trigger_id: Uuid) -> Result<(), TriggerError> {
        self.teardown(trigger_id).await;
        let existed = self.store.delete(&trigger_id).await?;
        if !existed {
            return Err(TriggerError::NotFound(trigger_id.to_string()));
        }
        tracing::info!(%trigger_id, "unregistered trigger");
        Ok(())
    }

    async fn teardown(&self, trigger_id: Uuid) {
        self.scheduler.unregister(trigger_id);
        self.path_index.retain(|_, entries| {
            entries.retain(|entry| entry.trigger_id != trigger_id);
            !entries.is_empty()
        });
        if let Some(handle) = self.event_unsubscribes.write().await.remove(&trigger_id) {
            handle.unsubscribe();
        }
        self.rate_limiter.remove_trigger(trigger_id);
        self.dedup.remove_trigger(trigger_id);
    }

    pub async fn enable(self: &Arc<Self>, trigger_id: Uuid) -> Result<(), TriggerError> {
        self.store
            .update(
                &trigger_id,
                TriggerUpdate {
                    enabled: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        let trigger = self
            .store
            .get(&trigger_id)
            .await?
            .ok_or_else(|| TriggerError::NotFound(trigger_id.to_string()))?;
        self.enroll(&trigger).await?;
        tracing::info!(%trigger_id, "enabled trigger");
        Ok(())
    }

    pub async fn disable(self: &Arc<Self>, trigger_id: Uuid) -> Result<(), TriggerError> {
        self.store
            .update(
                &trigger_id,
                TriggerUpdate {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await?;
        self.teardown(trigger_id).await;
        tracing::info!(%trigger_id, "disabled trigger");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Firing
    // -----------------------------------------------------------------

    /// Manual fire bypassing filters and rate limits.
    pub async fn fire(
        self: &Arc<Self>,
        trigger_id: Uuid,
        payload: Option<Value>,
    ) -> Result<String, TriggerError> {
        let context = TriggerContext::new(trigger_id, TriggerKind::Manual, payload);
        self.do_fire(trigger_id, context).await
    }

    /// Core fire path shared by cron, webhook step 6, event dispatch, and
    /// manual `fire`. Applies counters and fans out subscribers.
    pub async fn do_fire(
        self: &Arc<Self>,
        trigger_id: Uuid,
        context: TriggerContext,
    ) -> Result<String, TriggerError> {
        let trigger = self
            .store
            .get(&trigger_id)
            .await?
            .ok_or_else(|| TriggerError::NotFound(trigger_id.to_string()))?;

        if !trigger.enabled {
            return Err(TriggerError::NotFound(format!(
                "trigger {trigger_id} is disabled"
            )));
        }

        match (self.on_fire)(trigger.clone(), context.clone()).await {
            Ok(run_id) => {
                self.store
                    .update(
                        &trigger_id,
                        TriggerUpdate {
                            last_triggered: Some(context.timestamp),
                            increment_trigger_count: true,
                            ..Default::default()
                        },
                    )
                    .await?;
                self.fan_out(&trigger, &context).await;
                Ok(run_id)
            }
            Err(message) => {
                self.store
                    .update(
                        &trigger_id,
                        TriggerUpdate {
                            increment_error_count: true,
                            last_error: Some(Some(message.clone())),
                            ..Default::default()
                        },
                    )
                    .await?;
                Err(TriggerError::FireFailure(message))
            }
        }
    }

    async fn fan_out(&self, trigger: &Trigger, context: &TriggerContext) {
        let subscribers: Vec<_> = self
            .subscribers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for subscriber in subscribers {
            if let Err(error) = subscriber(trigger.clone(), context.clone()).await {
                tracing::warn!(trigger_id = %trigger.id, %error, "trigger subscriber failed");
            }
        }
    }

    /// Register a subscriber invoked on every successful fire, regardless
    /// of kind.
    pub fn on_trigger<F, Fut>(&self, callback: F) -> TriggerSubscription
    where
        F: Fn(Trigger, TriggerContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), String>> + Send + 'static,
    {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let boxed: SubscriberFn = Arc::new(move |trigger, context| Box::pin(callback(trigger, context)));
        self.subscribers.insert(id, boxed);
        TriggerSubscription {
            id,
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    // -----------------------------------------------------------------
    // Webhook matching (the dispatcher in trigger-infra performs the
    // remaining pipeline steps using these primitives)
    // -----------------------------------------------------------------

    /// First enabled trigger registered for `(method, path)`, matching
    /// case-insensitively on path and breaking ties by registration order
    /// (spec §9 open question (a)).
    pub async fn find_webhook_trigger(
        &self,
        method: WebhookMethod,
        path: &str,
    ) -> Option<Trigger> {
        let key = (method, path.to_ascii_lowercase());
        let entries = self.path_index.get(&key)?;
        let mut candidates: Vec<&WebhookEntry> = entries.value().iter().collect();
        candidates.sort_by_key(|entry| entry.registered_at);

        for candidate in candidates {
            if let Ok(Some(trigger)) = self.store.get(&candidate.trigger_id).await {
                if trigger.enabled {
                    return Some(trigger);
                }
            }
        }
        None
    }

    /// Increment `errorCount` without firing (webhook pipeline steps 1/7).
    pub async fn record_webhook_error(&self, trigger_id: Uuid, message: String) {
        let _ = self
            .store
            .update(
                &trigger_id,
                TriggerUpdate {
                    increment_error_count: true,
                    last_error: Some(Some(message)),
                    ..Default::default()
                },
            )
            .await;
    }

    // -----------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------

    pub async fn emit_event(&self, event_type: impl Into<String>, source: Option<String>, payload: Value) {
        self.event_bus.emit(&event_type.into(), source, payload).await;
    }

    // -----------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------

    pub async fn start(self: &Arc<Self>) -> Result<(), TriggerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("trigger manager already started, ignoring");
            return Ok(());
        }
        for trigger in self.store.list_enabled().await? {
            self.enroll(&trigger).await?;
        }
        tracing::info!("trigger manager started");
        Ok(())
    }

    pub async fn stop(self: &Arc<Self>) {
        self.scheduler.stop_all();
        self.path_index.clear();
        let mut unsubs = self.event_unsubscribes.write().await;
        for (_, handle) in unsubs.drain() {
            handle.unsubscribe();
        }
        for task in self.sweep_tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("trigger manager stopped");
    }

    pub async fn get_stats(&self) -> Result<TriggerStats, TriggerError> {
        let all = self.store.list(None).await?;
        let mut by_type: HashMap<String, u64> = HashMap::new();
        let mut enabled = 0u64;
        let mut total_fired = 0u64;
        let mut total_errors = 0u64;

        for trigger in &all {
            *by_type.entry(trigger.kind().to_string()).or_insert(0) += 1;
            if trigger.enabled {
                enabled += 1;
            }
            total_fired += trigger.trigger_count;
            total_errors += trigger.error_count;
        }

        Ok(TriggerStats {
            total: all.len() as u64,
            enabled,
            by_type,
            total_fired,
            total_errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use trigger_types::{EventConfig, WebhookConfig, WebhookMethod};

    #[derive(Default)]
    struct MemoryStore {
        inner: StdMutex<HashMap<Uuid, Trigger>>,
    }

    impl TriggerStore for MemoryStore {
        async fn save(&self, trigger: &Trigger) -> Result<(), TriggerError> {
            self.inner.lock().unwrap().insert(trigger.id, trigger.clone());
            Ok(())
        }

        async fn get(&self, id: &Uuid) -> Result<Option<Trigger>, TriggerError> {
            Ok(self.inner.lock().unwrap().get(id).cloned())
        }

        async fn update(&self, id: &Uuid, update: TriggerUpdate) -> Result<(), TriggerError> {
            let mut guard = self.inner.lock().unwrap();
            let trigger = guard.get_mut(id).ok_or_else(|| TriggerError::NotFound(id.to_string()))?;
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
            Ok(self.inner.lock().unwrap().remove(id).is_some())
        }

        async fn list(&self, workflow_name: Option<&str>) -> Result<Vec<Trigger>, TriggerError> {
            let guard = self.inner.lock().unwrap();
            Ok(guard
                .values()
                .filter(|t| workflow_name.is_none_or(|name| t.workflow_name == name))
                .cloned()
                .collect())
        }

        async fn list_enabled(&self) -> Result<Vec<Trigger>, TriggerError> {
            Ok(self.inner.lock().unwrap().values().filter(|t| t.enabled).cloned().collect())
        }

        async fn list_by_type(&self, kind: TriggerKind) -> Result<Vec<Trigger>, TriggerError> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.kind() == kind)
                .cloned()
                .collect())
        }
    }

    fn echo_on_fire() -> OnFireFn {
        Arc::new(|_trigger, _context| Box::pin(async { Ok(Uuid::now_v7().to_string()) }))
    }

    #[tokio::test]
    async fn test_register_manual_fire_updates_counters() {
        let manager = TriggerManager::new(MemoryStore::default(), echo_on_fire());
        let config = TriggerConfig::Event(EventConfig {
            event_type: "order.placed".to_string(),
            source: None,
            filter: None,
            transform: None,
        });
        let trigger_id = manager.register("wf", config).await.unwrap();

        manager.fire(trigger_id, Some(serde_json::json!({"x": 1}))).await.unwrap();

        let trigger = manager.store.get(&trigger_id).await.unwrap().unwrap();
        assert_eq!(trigger.trigger_count, 1);
        assert_eq!(trigger.error_count, 0);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_at_register() {
        let manager = TriggerManager::new(MemoryStore::default(), echo_on_fire());
        let config = TriggerConfig::Webhook(WebhookConfig {
            path: "no-leading-slash".to_string(),
            method: WebhookMethod::Post,
            auth: None,
            rate_limit: None,
            deduplication_key: None,
            deduplication_window_ms: None,
            validate_payload: None,
            transform_payload: None,
        });
        let result = manager.register("wf", config).await;
        assert!(matches!(result, Err(TriggerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_fire_failure_increments_error_count() {
        let failing_on_fire: OnFireFn = Arc::new(|_t, _c| Box::pin(async { Err("boom".to_string()) }));
        let manager = TriggerManager::new(MemoryStore::default(), failing_on_fire);
        let config = TriggerConfig::Event(EventConfig {
            event_type: "x".to_string(),
            source: None,
            filter: None,
            transform: None,
        });
        let trigger_id = manager.register("wf", config).await.unwrap();

        let result = manager.fire(trigger_id, None).await;
        assert!(matches!(result, Err(TriggerError::FireFailure(_))));

        let trigger = manager.store.get(&trigger_id).await.unwrap().unwrap();
        assert_eq!(trigger.error_count, 1);
        assert_eq!(trigger.trigger_count, 0);
    }

    #[tokio::test]
    async fn test_disable_then_fire_is_rejected() {
        let manager = TriggerManager::new(MemoryStore::default(), echo_on_fire());
        let config = TriggerConfig::Event(EventConfig {
            event_type: "x".to_string(),
            source: None,
            filter: None,
            transform: None,
        });
        let trigger_id = manager.register("wf", config).await.unwrap();
        manager.disable(trigger_id).await.unwrap();

        let result = manager.fire(trigger_id, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unregister_removes_record() {
        let manager = TriggerManager::new(MemoryStore::default(), echo_on_fire());
        let config = TriggerConfig::Event(EventConfig {
            event_type: "x".to_string(),
            source: None,
            filter: None,
            transform: None,
        });
        let trigger_id = manager.register("wf", config).await.unwrap();
        manager.unregister(trigger_id).await.unwrap();
        assert!(manager.store.get(&trigger_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_event_filter_gates_fire() {
        let fired = Arc::new(StdMutex::new(Vec::new()));
        let fired_clone = Arc::clone(&fired);
        let on_fire: OnFireFn = Arc::new(move |_trigger, context| {
            let fired = Arc::clone(&fired_clone);
            Box::pin(async move {
                fired.lock().unwrap().push(context.payload.clone());
                Ok(Uuid::now_v7().to_string())
            })
        });
        let manager = TriggerManager::new(MemoryStore::default(), on_fire);
        let config = TriggerConfig::Event(EventConfig {
            event_type: "order.placed".to_string(),
            source: Some("api".to_string()),
            filter: Some("payload.total > 100".to_string()),
            transform: None,
        });
        manager.register("wf", config).await.unwrap();

        manager
            .emit_event("order.placed", Some("api".to_string()), serde_json::json!({"total": 50}))
            .await;
        manager
            .emit_event("order.placed", Some("api".to_string()), serde_json::json!({"total": 500}))
            .await;
        manager
            .emit_event("order.placed", Some("cron".to_string()), serde_json::json!({"total": 500}))
            .await;

        let fired = fired.lock().unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].as_ref().unwrap()["total"], serde_json::json!(500));
    }

    #[tokio::test]
    async fn test_webhook_path_matching_is_case_insensitive_and_first_registered_wins() {
        let manager = TriggerManager::new(MemoryStore::default(), echo_on_fire());
        let make_config = || {
            TriggerConfig::Webhook(WebhookConfig {
                path: "/Hooks/A".to_string(),
                method: WebhookMethod::Post,
                auth: None,
                rate_limit: None,
                deduplication_key: None,
                deduplication_window_ms: None,
                validate_payload: None,
                transform_payload: None,
            })
        };
        let first = manager.register("wf-1", make_config()).await.unwrap();
        let _second = manager.register("wf-2", make_config()).await.unwrap();

        let matched = manager
            .find_webhook_trigger(WebhookMethod::Post, "/hooks/a")
            .await
            .unwrap();
        assert_eq!(matched.id, first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_config_spawns_and_stop_aborts_sweep_tasks() {
        let manager = TriggerManager::with_config(
            MemoryStore::default(),
            echo_on_fire(),
            crate::config::ManagerConfig {
                dedup_sweep_interval_ms: 100,
                rate_limiter_sweep_interval_ms: 100,
                ..Default::default()
            },
        );
        assert_eq!(manager.sweep_tasks.lock().unwrap().len(), 2);
        tokio::time::advance(std::time::Duration::from_millis(250)).await;
        manager.stop().await;
        assert!(manager.sweep_tasks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_stats_counts_by_type() {
        let manager = TriggerManager::new(MemoryStore::default(), echo_on_fire());
        manager
            .register(
                "wf",
                TriggerConfig::Event(EventConfig {
                    event_type: "a".to_string(),
                    source: None,
                    filter: None,
                    transform: None,
                }),
            )
            .await
            .unwrap();
        manager
            .register(
                "wf",
                TriggerConfig::Webhook(WebhookConfig {
                    path: "/h".to_string(),
                    method: WebhookMethod::Post,
                    auth: None,
                    rate_limit: None,
                    deduplication_key: None,
                    deduplication_window_ms: None,
                    validate_payload: None,
                    transform_payload: None,
                }),
            )
            .await
            .unwrap();

        let stats = manager.get_stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.enabled, 2);
        assert_eq!(stats.by_type.get("event"), Some(&1));
        assert_eq!(stats.by_type.get("webhook"), Some(&1));
    }
}
