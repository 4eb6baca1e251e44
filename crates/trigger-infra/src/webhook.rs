//! Normalized webhook request/response shapes and the dispatch pipeline
//! (spec §4.5/§4.6), layered on top of `trigger-core::TriggerManager`.
//!
//! `WebhookDispatcher` holds an `Arc<TriggerManager<S>>` rather than living
//! inside `trigger-core` itself: HTTP-facing concerns (auth byte
//! verification, status-code mapping) belong in this crate, but the manager
//! already owns the `(method, path)` index and the shared fire path, so the
//! dispatcher just drives that state through the seven pipeline steps.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use trigger_core::TriggerManager;
use trigger_types::{RateLimitDiscipline, TriggerConfig, TriggerContext, TriggerKind, WebhookConfig, WebhookMethod};
use uuid::Uuid;

use crate::auth;

/// A normalized inbound webhook request. Web-framework adapters construct
/// this from their own request type.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub method: WebhookMethod,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Value,
    pub query: HashMap<String, String>,
    pub ip: Option<String>,
}

/// A normalized response. Web-framework adapters translate this back into
/// their own response type.
#[derive(Debug, Clone)]
pub struct WebhookResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

impl WebhookResponse {
    fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Some(body),
        }
    }

    fn empty(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: None,
        }
    }
}

pub struct WebhookDispatcher<S: trigger_core::TriggerStore + 'static> {
    manager: Arc<TriggerManager<S>>,
}

impl<S: trigger_core::TriggerStore + 'static> WebhookDispatcher<S> {
    pub fn new(manager: Arc<TriggerManager<S>>) -> Self {
        Self { manager }
    }

    /// Drive the request through auth, rate-limit, dedup, validate,
    /// transform, and fire. Every rejection path records an error against
    /// the matched trigger before returning, except a 404 (no trigger
    /// matched, nothing to record against) and a 200 dedup hit (not an
    /// error -- a successful no-op).
    pub async fn dispatch(&self, request: WebhookRequest) -> WebhookResponse {
        let Some(trigger) = self
            .manager
            .find_webhook_trigger(request.method, &request.path)
            .await
        else {
            return WebhookResponse::json(
                404,
                serde_json::json!({ "error": "no webhook registered for this method and path" }),
            );
        };

        let TriggerConfig::Webhook(config) = &trigger.config else {
            // `find_webhook_trigger` only ever returns webhook-kind triggers
            // because only those are inserted into the path index.
            return WebhookResponse::json(500, serde_json::json!({ "error": "internal" }));
        };
        let trigger_id = trigger.id;

        if let Some(response) = self.authenticate(trigger_id, config, &request).await {
            return response;
        }
        if let Some(response) = self.check_rate_limit(trigger_id, config, &request).await {
            return response;
        }
        if let Some(response) = self.check_duplicate(trigger_id, config, &request).await {
            return response;
        }
        if let Some(response) = self.validate(trigger_id, config, &request).await {
            return response;
        }

        let payload = self.transform(config, &request);
        let mut context = TriggerContext::new(trigger_id, TriggerKind::Webhook, Some(payload));
        context.headers = Some(request.headers.clone());
        context.metadata = serde_json::json!({
            "path": request.path,
            "method": request.method.to_string(),
            "query": request.query,
            "ip": request.ip,
        });

        match self.manager.do_fire(trigger_id, context).await {
            Ok(run_id) => WebhookResponse::json(202, serde_json::json!({ "runId": run_id })),
            Err(error) => {
                // `do_fire` already recorded the error count; just map the
                // outcome to a status code.
                tracing::warn!(%trigger_id, %error, "webhook fire failed");
                WebhookResponse::json(500, serde_json::json!({ "error": error.to_string() }))
            }
        }
    }

    async fn authenticate(
        &self,
        trigger_id: Uuid,
        config: &WebhookConfig,
        request: &WebhookRequest,
    ) -> Option<WebhookResponse> {
        let scheme = config.auth.as_ref()?;
        let body_bytes = serde_json::to_vec(&request.body).unwrap_or_default();
        match auth::verify(scheme, &request.headers, &body_bytes) {
            Ok(()) => None,
            Err(error) => {
                self.manager.record_webhook_error(trigger_id, error.to_string()).await;
                Some(WebhookResponse::json(401, serde_json::json!({ "error": error.to_string() })))
            }
        }
    }

    async fn check_rate_limit(
        &self,
        trigger_id: Uuid,
        config: &WebhookConfig,
        request: &WebhookRequest,
    ) -> Option<WebhookResponse> {
        let limits = config.rate_limit.as_ref()?;
        let client_key = request.ip.as_deref().unwrap_or("unknown");

        let result = match limits.discipline {
            RateLimitDiscipline::TokenBucket => self.manager.rate_limiter().token_bucket.consume(
                trigger_id,
                client_key,
                1,
                limits.requests,
                limits.window_ms,
                limits.burst_limit,
            ),
            RateLimitDiscipline::SlidingWindow => self.manager.rate_limiter().sliding_window.consume(
                trigger_id,
                client_key,
                limits.requests,
                limits.window_ms,
            ),
        };

        if result.allowed {
            return None;
        }

        self.manager
            .record_webhook_error(trigger_id, "rate limit exceeded".to_string())
            .await;

        let retry_after_ms = result.retry_after_ms.unwrap_or(limits.window_ms);
        let mut response = WebhookResponse::json(
            429,
            serde_json::json!({ "error": "rate limit exceeded", "retryAfterMs": retry_after_ms }),
        );
        response
            .headers
            .insert("Retry-After".to_string(), (retry_after_ms / 1000).max(1).to_string());
        response
            .headers
            .insert("X-RateLimit-Remaining".to_string(), "0".to_string());
        response
            .headers
            .insert("X-RateLimit-Reset".to_string(), result.reset_at.to_rfc3339());
        Some(response)
    }

    async fn check_duplicate(
        &self,
        trigger_id: Uuid,
        config: &WebhookConfig,
        request: &WebhookRequest,
    ) -> Option<WebhookResponse> {
        let dedup_key_spec = config.deduplication_key.as_ref()?;
        let window_ms = config.deduplication_window_ms.unwrap_or(0);

        let resolved = self
            .manager
            .evaluator()
            .resolve_dynamic(dedup_key_spec, &eval_context(&request.body))
            .unwrap_or(Value::Null);
        let key = value_as_dedup_key(&resolved);

        if self.manager.dedup_cache().is_duplicate(trigger_id, &key, window_ms) {
            Some(WebhookResponse::json(
                200,
                serde_json::json!({ "status": "duplicate", "deduplicationKey": key }),
            ))
        } else {
            None
        }
    }

    async fn validate(
        &self,
        trigger_id: Uuid,
        config: &WebhookConfig,
        request: &WebhookRequest,
    ) -> Option<WebhookResponse> {
        let expr = config.validate_payload.as_ref()?;
        match self.manager.evaluator().evaluate_bool(expr, &eval_context(&request.body)) {
            Ok(true) => None,
            // A clean `false` is a soft rejection (spec: 400, not an error
            // count increment) -- only a malformed/un-evaluable expression
            // below counts as a real error.
            Ok(false) => Some(WebhookResponse::json(
                400,
                serde_json::json!({ "error": "payload failed validation" }),
            )),
            Err(error) => {
                self.manager.record_webhook_error(trigger_id, error.to_string()).await;
                Some(WebhookResponse::json(400, serde_json::json!({ "error": error.to_string() })))
            }
        }
    }

    fn transform(&self, config: &WebhookConfig, request: &WebhookRequest) -> Value {
        match &config.transform_payload {
            Some(dynamic) => self
                .manager
                .evaluator()
                .resolve_dynamic(dynamic, &eval_context(&request.body))
                .unwrap_or_else(|_| request.body.clone()),
            None => request.body.clone(),
        }
    }
}

/// Wrap a parsed body the same way `TriggerContext::to_eval_context` does,
/// so webhook `validatePayload` / `deduplicationKey` / `transformPayload`
/// expressions address `event.*` just like cron and event triggers do.
fn eval_context(body: &Value) -> Value {
    serde_json::json!({ "event": body })
}

fn value_as_dedup_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
