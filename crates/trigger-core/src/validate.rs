//! Register-time config validators (spec §6 `validate*TriggerConfig`).
//!
//! Each validator returns the human-readable reasons a config is invalid;
//! an empty vec means the config may be registered.

use trigger_types::{CronConfig, EventConfig, WebhookConfig};

use crate::cron_parser::{parse_timezone, ParsedCron};

pub fn validate_cron_config(config: &CronConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if let Err(error) = ParsedCron::parse(&config.expression) {
        errors.push(format!("invalid cron expression: {error}"));
    }

    if let Some(timezone) = &config.timezone {
        if let Err(error) = parse_timezone(Some(timezone)) {
            errors.push(format!("invalid timezone: {error}"));
        }
    }

    if let Some(max_concurrent) = config.max_concurrent {
        if max_concurrent == 0 {
            errors.push("maxConcurrent must be >= 1 when set".to_string());
        }
    }

    errors
}

pub fn validate_webhook_config(config: &WebhookConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if !config.path.starts_with('/') {
        errors.push("path must begin with '/'".to_string());
    }

    if let Some(rate_limit) = &config.rate_limit {
        if rate_limit.requests == 0 {
            errors.push("rateLimit.requests must be >= 1".to_string());
        }
        if rate_limit.window_ms == 0 {
            errors.push("rateLimit.window must be >= 1ms".to_string());
        }
        if let Some(burst_limit) = rate_limit.burst_limit {
            if burst_limit == 0 {
                errors.push("rateLimit.burstLimit must be >= 1 when set".to_string());
            }
        }
    }

    if config.deduplication_key.is_some() != config.deduplication_window_ms.is_some() {
        errors.push(
            "deduplicationKey and deduplicationWindow must be set together".to_string(),
        );
    }

    if let Some(window_ms) = config.deduplication_window_ms {
        if window_ms == 0 {
            errors.push("deduplicationWindow must be >= 1ms".to_string());
        }
    }

    errors
}

pub fn validate_event_config(config: &EventConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if config.event_type.trim().is_empty() {
        errors.push("eventType must not be empty".to_string());
    }

    errors
}
