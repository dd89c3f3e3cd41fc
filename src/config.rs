//! Configuration for the event sync engine.
//!
//! The config is built once at startup, validated, and handed to each
//! component. Target URLs are usually not written into the config directly:
//! a target names an environment key (e.g. `ERROR_ALERTS_WEBHOOK`) that is
//! resolved when the orchestrator is constructed.
//!
//! # Example
//!
//! ```
//! use event_sync_engine::SyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.batch_size_limit, 10);
//! assert_eq!(config.max_retries, 3);
//!
//! // Loaded from JSON
//! let config = SyncConfig::from_json_str(r#"{
//!     "batch_size_limit": 25,
//!     "default_target": "main",
//!     "targets": [
//!         {"name": "main", "url": "https://hooks.example.com/main"},
//!         {"name": "error_alerts", "url_env": "ERROR_ALERTS_WEBHOOK", "use_compression": true}
//!     ],
//!     "routing_rules": [
//!         {"id": "crit", "severity": "critical", "target": "error_alerts"}
//!     ]
//! }"#).unwrap();
//! assert_eq!(config.batch_size_limit, 25);
//! assert_eq!(config.routing_rules[0].source, "*");
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::event::{EventKind, Severity};
use crate::optimizer::DEFAULT_ALLOWED_FIELDS;
use crate::resilience::retry::MAX_RETRY_DELAY;

/// Invalid configuration. Always fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("duplicate target name '{0}'")]
    DuplicateTarget(String),
    #[error("duplicate routing rule id '{0}'")]
    DuplicateRule(String),
    #[error("routing rule '{rule}' references unknown target '{target}'")]
    UnknownRuleTarget { rule: String, target: String },
    #[error("default target '{0}' is not configured")]
    UnknownDefaultTarget(String),
    #[error("target '{0}' must set exactly one of `url` or `url_env`")]
    AmbiguousUrl(String),
    #[error("target '{target}': environment key '{key}' is not set")]
    UnresolvedUrl { target: String, key: String },
    #[error("target '{target}': invalid URL '{url}': {reason}")]
    InvalidUrl { target: String, url: String, reason: String },
}

/// Target entry as written in config.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetSpec {
    pub name: String,
    /// Literal URL
    #[serde(default)]
    pub url: Option<String>,
    /// Name of the environment key holding the URL
    #[serde(default)]
    pub url_env: Option<String>,
    #[serde(default)]
    pub use_compression: bool,
    /// Passed through verbatim on every request (e.g. auth tokens)
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// A delivery target with its URL resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    pub name: String,
    pub url: String,
    pub use_compression: bool,
    pub headers: HashMap<String, String>,
}

impl TargetConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            use_compression: false,
            headers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn compressed(mut self) -> Self {
        self.use_compression = true;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Routing rule entry as written in config.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingRuleSpec {
    pub id: String,
    /// Exact source name, or `*` for any
    #[serde(default = "default_source_match")]
    pub source: String,
    /// Empty matches every type
    #[serde(default)]
    pub types: Vec<EventKind>,
    #[serde(default)]
    pub severity: Option<Severity>,
    pub target: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_source_match() -> String { "*".to_string() }
fn default_enabled() -> bool { true }

/// Configuration for the event sync engine.
///
/// All fields have sensible defaults. At minimum, configure `targets` and
/// point `default_target` at one of them.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Flush a batch once it holds this many events
    #[serde(default = "default_batch_size_limit")]
    pub batch_size_limit: usize,

    /// Flush a batch after this long without a new append
    #[serde(default = "default_batch_idle_timeout_secs")]
    pub batch_idle_timeout_secs: u64,

    /// Retry budget for events that don't carry their own
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Retry backoff: first delay, growth factor, and cap
    #[serde(default = "default_initial_retry_delay_secs")]
    pub initial_retry_delay_secs: f64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: f64,
    #[serde(default = "default_max_retry_delay_secs")]
    pub max_retry_delay_secs: f64,

    /// Per-request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Bodies smaller than this are never compressed
    #[serde(default = "default_compression_threshold_bytes")]
    pub compression_threshold_bytes: usize,

    /// Payload minimization
    #[serde(default = "default_max_field_size")]
    pub max_field_size: usize,
    #[serde(default = "default_payload_allowed_fields")]
    pub payload_allowed_fields: Vec<String>,

    /// Event types that are batched rather than sent immediately
    #[serde(default = "default_batchable_types")]
    pub batchable_types: Vec<EventKind>,

    /// Upper bound on concurrent outbound requests
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,

    /// Permanently failed deliveries kept for inspection
    #[serde(default = "default_dead_letter_capacity")]
    pub dead_letter_capacity: usize,

    /// Target used when no routing rule matches
    #[serde(default = "default_default_target")]
    pub default_target: String,

    #[serde(default)]
    pub targets: Vec<TargetSpec>,

    #[serde(default)]
    pub routing_rules: Vec<RoutingRuleSpec>,
}

fn default_batch_size_limit() -> usize { 10 }
fn default_batch_idle_timeout_secs() -> u64 { 60 }
fn default_max_retries() -> u32 { 3 }
fn default_initial_retry_delay_secs() -> f64 { 1.0 }
fn default_retry_backoff_multiplier() -> f64 { 2.0 }
fn default_max_retry_delay_secs() -> f64 { 60.0 }
fn default_request_timeout_secs() -> u64 { 10 }
fn default_compression_threshold_bytes() -> usize { 1024 }
fn default_max_field_size() -> usize { 1000 }
fn default_payload_allowed_fields() -> Vec<String> {
    DEFAULT_ALLOWED_FIELDS.iter().map(|f| (*f).to_string()).collect()
}
fn default_batchable_types() -> Vec<EventKind> {
    vec![EventKind::Metric, EventKind::Status, EventKind::Report]
}
fn default_max_concurrent_sends() -> usize { 16 }
fn default_dead_letter_capacity() -> usize { 1000 }
fn default_default_target() -> String { "default".to_string() }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size_limit: default_batch_size_limit(),
            batch_idle_timeout_secs: default_batch_idle_timeout_secs(),
            max_retries: default_max_retries(),
            initial_retry_delay_secs: default_initial_retry_delay_secs(),
            retry_backoff_multiplier: default_retry_backoff_multiplier(),
            max_retry_delay_secs: default_max_retry_delay_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            compression_threshold_bytes: default_compression_threshold_bytes(),
            max_field_size: default_max_field_size(),
            payload_allowed_fields: default_payload_allowed_fields(),
            batchable_types: default_batchable_types(),
            max_concurrent_sends: default_max_concurrent_sends(),
            dead_letter_capacity: default_dead_letter_capacity(),
            default_target: default_default_target(),
            targets: Vec::new(),
            routing_rules: Vec::new(),
        }
    }
}

impl SyncConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    #[must_use]
    pub fn batch_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_idle_timeout_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn is_batchable(&self, kind: &EventKind) -> bool {
        self.batchable_types.contains(kind)
    }

    /// Check scalar limits and cross references between rules and targets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_limits()?;

        let mut names = HashSet::new();
        for target in &self.targets {
            if !names.insert(target.name.as_str()) {
                return Err(ConfigError::DuplicateTarget(target.name.clone()));
            }
            if target.url.is_some() == target.url_env.is_some() {
                return Err(ConfigError::AmbiguousUrl(target.name.clone()));
            }
        }
        self.validate_references(|name| names.contains(name))
    }

    /// Check numeric fields only.
    pub fn validate_limits(&self) -> Result<(), ConfigError> {
        if self.batch_size_limit == 0 {
            return Err(invalid("batch_size_limit", "must be at least 1"));
        }
        let max_secs = MAX_RETRY_DELAY.as_secs();
        if self.batch_idle_timeout_secs == 0 || self.batch_idle_timeout_secs > max_secs {
            return Err(invalid("batch_idle_timeout_secs", "must be between 1 and 86400"));
        }
        if self.request_timeout_secs == 0 || self.request_timeout_secs > max_secs {
            return Err(invalid("request_timeout_secs", "must be between 1 and 86400"));
        }
        if self.max_concurrent_sends == 0 {
            return Err(invalid("max_concurrent_sends", "must be at least 1"));
        }
        if !self.initial_retry_delay_secs.is_finite() || self.initial_retry_delay_secs < 0.0 {
            return Err(invalid("initial_retry_delay_secs", "must be a non-negative number"));
        }
        if !self.max_retry_delay_secs.is_finite() || self.max_retry_delay_secs < self.initial_retry_delay_secs {
            return Err(invalid("max_retry_delay_secs", "must be at least initial_retry_delay_secs"));
        }
        if self.max_retry_delay_secs > MAX_RETRY_DELAY.as_secs_f64() {
            return Err(invalid("max_retry_delay_secs", "must be at most 86400"));
        }
        if !self.retry_backoff_multiplier.is_finite() || self.retry_backoff_multiplier < 1.0 {
            return Err(invalid("retry_backoff_multiplier", "must be at least 1.0"));
        }
        Ok(())
    }

    /// Check that the default target and every rule target are known.
    pub fn validate_references<F>(&self, is_known: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> bool,
    {
        if !is_known(&self.default_target) {
            return Err(ConfigError::UnknownDefaultTarget(self.default_target.clone()));
        }

        let mut rule_ids = HashSet::new();
        for rule in &self.routing_rules {
            if !rule_ids.insert(rule.id.as_str()) {
                return Err(ConfigError::DuplicateRule(rule.id.clone()));
            }
            if !is_known(&rule.target) {
                return Err(ConfigError::UnknownRuleTarget {
                    rule: rule.id.clone(),
                    target: rule.target.clone(),
                });
            }
        }
        Ok(())
    }

    /// Resolve every target URL, looking up `url_env` keys through `lookup`.
    pub fn resolve_targets<F>(&self, lookup: F) -> Result<HashMap<String, TargetConfig>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut resolved = HashMap::with_capacity(self.targets.len());
        for spec in &self.targets {
            let url = match (&spec.url, &spec.url_env) {
                (Some(url), None) => url.clone(),
                (None, Some(key)) => lookup(key).ok_or_else(|| ConfigError::UnresolvedUrl {
                    target: spec.name.clone(),
                    key: key.clone(),
                })?,
                _ => return Err(ConfigError::AmbiguousUrl(spec.name.clone())),
            };
            if let Err(e) = reqwest::Url::parse(&url) {
                return Err(ConfigError::InvalidUrl {
                    target: spec.name.clone(),
                    url,
                    reason: e.to_string(),
                });
            }
            resolved.insert(
                spec.name.clone(),
                TargetConfig {
                    name: spec.name.clone(),
                    url,
                    use_compression: spec.use_compression,
                    headers: spec.headers.clone(),
                },
            );
        }
        Ok(resolved)
    }

    /// Resolve target URLs from the process environment.
    pub fn resolve_targets_from_env(&self) -> Result<HashMap<String, TargetConfig>, ConfigError> {
        self.resolve_targets(|key| std::env::var(key).ok())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue { field, reason: reason.to_string() }
}
