//! Trigger data model: `Trigger`, its per-kind `TriggerConfig` variants, and
//! the normalized `TriggerContext` handed to subscribers on fire.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TriggerKind
// ---------------------------------------------------------------------------

/// The kind of stimulus a trigger watches for.
///
/// `Manual` only ever appears as a `TriggerContext::trigger_type` (set by
/// `TriggerManager::fire`) -- it is not a valid `Trigger::kind`, since there
/// is no registrable `TriggerConfig::Manual` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Cron,
    Webhook,
    Event,
    Manual,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerKind::Cron => "cron",
            TriggerKind::Webhook => "webhook",
            TriggerKind::Event => "event",
            TriggerKind::Manual => "manual",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Dynamic values (closures-as-data)
// ---------------------------------------------------------------------------

/// A config field that is "a static value or a function of context" in the
/// source design (cron `input`, webhook `transformPayload` /
/// `deduplicationKey`, event `transform`). Represented as either a literal
/// JSON value or a JEXL expression evaluated against the firing context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DynamicValue {
    Literal { value: Value },
    Expression { expr: String },
}

impl DynamicValue {
    pub fn literal(value: Value) -> Self {
        Self::Literal { value }
    }

    pub fn expression(expr: impl Into<String>) -> Self {
        Self::Expression { expr: expr.into() }
    }
}

// ---------------------------------------------------------------------------
// CronConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    /// 5, 6, or 7 field cron expression.
    pub expression: String,
    /// IANA timezone name. Defaults to UTC if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Cap on in-flight fires for this trigger. Unbounded if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<u32>,
    /// Fire once immediately on registration, without advancing `nextTrigger`.
    #[serde(default)]
    pub run_immediately: bool,
    /// Replay missed occurrences on manager startup.
    #[serde(default)]
    pub catch_up: bool,
    /// Static or context-derived value passed as `TriggerContext::payload`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<DynamicValue>,
    /// JEXL predicate over the firing context; a false result skips the fire
    /// without counting it as an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

// ---------------------------------------------------------------------------
// WebhookConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WebhookMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl std::str::FromStr for WebhookMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for WebhookMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// HMAC digest algorithm for `WebhookAuth::Hmac`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HmacAlgorithm {
    Sha256,
    Sha512,
}

impl Default for HmacAlgorithm {
    fn default() -> Self {
        Self::Sha256
    }
}

/// Authentication configuration for a webhook trigger (spec §4.6). Secrets
/// are wrapped in `SecretString` so they are never incidentally logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookAuth {
    /// `Authorization: Bearer <secret>`, constant-time compare.
    Bearer { secret: SecretString },
    /// `Authorization: Basic <b64(creds)>`, decoded string compared to `secret`.
    Basic { secret: SecretString },
    /// HMAC signature over the raw body, read from a configurable header.
    Hmac {
        secret: SecretString,
        #[serde(default)]
        algorithm: HmacAlgorithm,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        header_name: Option<String>,
    },
    /// Static API key read from a configurable header.
    ApiKey {
        secret: SecretString,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        header_name: Option<String>,
    },
}

impl WebhookAuth {
    /// Human-readable discriminant, used in log lines (never the secret).
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bearer { .. } => "bearer",
            Self::Basic { .. } => "basic",
            Self::Hmac { .. } => "hmac",
            Self::ApiKey { .. } => "api_key",
        }
    }
}

/// Rate limiting discipline selector for `RateLimitConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitDiscipline {
    TokenBucket,
    SlidingWindow,
}

impl Default for RateLimitDiscipline {
    fn default() -> Self {
        Self::TokenBucket
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Token bucket capacity, or sliding-window `maxRequests`.
    pub requests: u32,
    /// Refill/window period in milliseconds.
    pub window_ms: u64,
    /// Token-bucket-only: max tokens a single `consume` may request,
    /// independent of the bucket's current fill level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_limit: Option<u32>,
    #[serde(default)]
    pub discipline: RateLimitDiscipline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Must begin with `/`. Matched case-insensitively.
    pub path: String,
    pub method: WebhookMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<WebhookAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
    /// Function of the parsed body producing a dedup fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deduplication_key: Option<DynamicValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deduplication_window_ms: Option<u64>,
    /// JEXL predicate over the parsed body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate_payload: Option<String>,
    /// Function of the parsed body producing the fired payload. Identity if
    /// absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_payload: Option<DynamicValue>,
}

// ---------------------------------------------------------------------------
// EventConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// JEXL predicate over `{ source, payload }`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<DynamicValue>,
}

// ---------------------------------------------------------------------------
// TriggerConfig
// ---------------------------------------------------------------------------

/// Tagged union of per-kind trigger configuration. The tag determines the
/// shape of the config; dispatch is always a single match on the tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerConfig {
    Cron(CronConfig),
    Webhook(WebhookConfig),
    Event(EventConfig),
}

impl TriggerConfig {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::Cron(_) => TriggerKind::Cron,
            Self::Webhook(_) => TriggerKind::Webhook,
            Self::Event(_) => TriggerKind::Event,
        }
    }
}

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// Persistent record describing what to watch and where to dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: Uuid,
    pub workflow_name: String,
    pub config: TriggerConfig,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_trigger: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trigger_count: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Monotonic registration sequence number, used to break ties when
    /// several enabled webhook triggers share `(method, path)`: the lowest
    /// `registered_at` wins (see SPEC_FULL.md §9 open question (a)).
    pub registered_at: u64,
}

impl Trigger {
    pub fn kind(&self) -> TriggerKind {
        self.config.kind()
    }

    pub fn new(workflow_name: impl Into<String>, config: TriggerConfig, registered_at: u64) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_name: workflow_name.into(),
            config,
            enabled: true,
            created_at: Utc::now(),
            last_triggered: None,
            next_trigger: None,
            trigger_count: 0,
            error_count: 0,
            last_error: None,
            registered_at,
        }
    }
}

/// Partial update applied to a persisted `Trigger` by the manager. Only
/// `Some` fields are written; this is the shape `TriggerStore::update`
/// accepts.
#[derive(Debug, Clone, Default)]
pub struct TriggerUpdate {
    pub enabled: Option<bool>,
    pub last_triggered: Option<DateTime<Utc>>,
    pub next_trigger: Option<Option<DateTime<Utc>>>,
    pub increment_trigger_count: bool,
    pub increment_error_count: bool,
    pub last_error: Option<Option<String>>,
}

// ---------------------------------------------------------------------------
// TriggerContext
// ---------------------------------------------------------------------------

/// Normalized dispatch payload handed to subscribers and the `onFire`
/// collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerContext {
    pub trigger_id: Uuid,
    pub trigger_type: TriggerKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Lowercased header map, webhook triggers only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Kind-specific metadata bag (expression/timezone/scheduled for cron;
    /// path/method/query/ip for webhook; event_type/source for event).
    #[serde(default)]
    pub metadata: Value,
}

impl TriggerContext {
    pub fn new(trigger_id: Uuid, trigger_type: TriggerKind, payload: Option<Value>) -> Self {
        Self {
            trigger_id,
            trigger_type,
            timestamp: Utc::now(),
            payload,
            headers: None,
            metadata: Value::Null,
        }
    }

    /// Build a JSON object suitable for JEXL evaluation of `condition` /
    /// `validatePayload` / `filter` expressions.
    ///
    /// Shape: `{ "trigger": { "id", "type", "timestamp", "metadata" },
    /// "event": <payload> }`.
    pub fn to_eval_context(&self) -> Value {
        serde_json::json!({
            "trigger": {
                "id": self.trigger_id.to_string(),
                "type": self.trigger_type.to_string(),
                "timestamp": self.timestamp.to_rfc3339(),
                "metadata": self.metadata,
            },
            "event": self.payload.clone().unwrap_or(Value::Null),
        })
    }
}

// ---------------------------------------------------------------------------
// TriggerStats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerStats {
    pub total: u64,
    pub enabled: u64,
    pub by_type: HashMap<String, u64>,
    pub total_fired: u64,
    pub total_errors: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
