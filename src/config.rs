//! Gateway configuration.
//!
//! Loaded from YAML, then overridden by `AGENT_GATEWAY_*` environment
//! variables, then validated. Every section has defaults, so an empty file
//! (or no file) is a complete configuration apart from the backends.
//!
//! ```yaml
//! rate_limit:
//!   capacity: 10
//!   refill_per_sec: 1.0
//! cache:
//!   max_entries: 10000
//!   price_sensitive_ttl_secs: 30
//! retry:
//!   max_retries: 2
//!   min_delay: 200   # ms
//!   max_delay: 5000  # ms
//! conversational:
//!   base_url: https://agents.internal.example.com
//!   agent_id: SHOPPING
//!   agent_alias_id: PROD
//!   api_key_env: SHOPPING_AGENT_KEY
//! direct_model:
//!   base_url: https://models.internal.example.com
//!   model_id: anthropic.claude-3-haiku
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::cache::{CacheBackend, CacheConfig, MemoryCache, NullCache};
use crate::fingerprint::FingerprintGenerator;
use crate::gateway::RetryPolicy;
use crate::invoker::{ConversationalConfig, DirectModelConfig};
use crate::resilience::RateLimiterConfig;
use crate::types::BackendVariant;
use crate::{Error, ErrorContext, Result};

const ENV_PREFIX: &str = "AGENT_GATEWAY_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub rate_limit: RateLimitSection,
    pub cache: CacheSection,
    pub retry: RetryPolicy,
    pub fingerprint: FingerprintSection,
    pub maintenance: MaintenanceSection,
    pub server: ServerSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversational: Option<ConversationalSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_model: Option<DirectModelSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub enabled: bool,
    pub capacity: u32,
    pub refill_per_sec: f64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 10,
            refill_per_sec: 1.0,
        }
    }
}

impl RateLimitSection {
    pub fn to_limiter_config(&self) -> RateLimiterConfig {
        let cfg = RateLimiterConfig::new()
            .with_capacity(self.capacity)
            .with_refill_rate(self.refill_per_sec);
        if self.enabled {
            cfg
        } else {
            RateLimiterConfig {
                enabled: false,
                ..cfg
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub enabled: bool,
    /// 0 = unbounded.
    pub max_entries: usize,
    pub conversational_ttl_secs: u64,
    pub direct_model_ttl_secs: u64,
    pub price_sensitive_ttl_secs: u64,
    pub max_entry_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
}

impl Default for CacheSection {
    fn default() -> Self {
        let d = CacheConfig::default();
        Self {
            enabled: d.enabled,
            max_entries: 0,
            conversational_ttl_secs: d.conversational_ttl.as_secs(),
            direct_model_ttl_secs: d.direct_model_ttl.as_secs(),
            price_sensitive_ttl_secs: d.price_sensitive_ttl.as_secs(),
            max_entry_size: d.max_entry_size,
            key_prefix: None,
        }
    }
}

impl CacheSection {
    pub fn to_cache_config(&self) -> CacheConfig {
        let mut cfg = CacheConfig::new()
            .with_enabled(self.enabled)
            .with_ttl(
                BackendVariant::Conversational,
                Duration::from_secs(self.conversational_ttl_secs),
            )
            .with_ttl(
                BackendVariant::DirectModel,
                Duration::from_secs(self.direct_model_ttl_secs),
            )
            .with_price_sensitive_ttl(Duration::from_secs(self.price_sensitive_ttl_secs));
        cfg.max_entry_size = self.max_entry_size;
        if let Some(ref prefix) = self.key_prefix {
            cfg = cfg.with_key_prefix(prefix.clone());
        }
        cfg
    }

    pub fn build_backend(&self) -> Box<dyn CacheBackend> {
        if self.enabled {
            Box::new(MemoryCache::new(self.max_entries))
        } else {
            Box::new(NullCache::new())
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

impl FingerprintSection {
    pub fn generator(&self) -> FingerprintGenerator {
        let g = FingerprintGenerator::new();
        match self.salt {
            Some(ref salt) => g.with_salt(salt.clone()),
            None => g,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceSection {
    pub interval_secs: u64,
    /// Rate buckets untouched this long (and full) are dropped.
    pub bucket_idle_secs: u64,
}

impl Default for MaintenanceSection {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            bucket_idle_secs: 600,
        }
    }
}

impl MaintenanceSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
    pub fn bucket_idle(&self) -> Duration {
        Duration::from_secs(self.bucket_idle_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationalSection {
    pub base_url: String,
    pub agent_id: String,
    pub agent_alias_id: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Name of the environment variable holding the bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub enable_trace: bool,
}

impl ConversationalSection {
    pub fn to_invoker_config(&self) -> Result<ConversationalConfig> {
        let mut cfg = ConversationalConfig::new(&self.base_url, &self.agent_id, &self.agent_alias_id)
            .with_timeout(Duration::from_secs(self.timeout_secs));
        cfg.enable_trace = self.enable_trace;
        if let Some(key) = resolve_api_key(self.api_key_env.as_deref(), "conversational.api_key_env")? {
            cfg = cfg.with_api_key(key);
        }
        Ok(cfg)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectModelSection {
    pub base_url: String,
    pub model_id: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic_version: Option<String>,
}

impl DirectModelSection {
    pub fn to_invoker_config(&self) -> Result<DirectModelConfig> {
        let mut cfg = DirectModelConfig::new(&self.base_url, &self.model_id)
            .with_timeout(Duration::from_secs(self.timeout_secs));
        cfg.max_tokens = self.max_tokens;
        cfg.temperature = self.temperature;
        if let Some(ref prompt) = self.system_prompt {
            cfg = cfg.with_system_prompt(prompt.clone());
        }
        if let Some(ref version) = self.anthropic_version {
            cfg.anthropic_version = version.clone();
        }
        if let Some(key) = resolve_api_key(self.api_key_env.as_deref(), "direct_model.api_key_env")? {
            cfg = cfg.with_api_key(key);
        }
        Ok(cfg)
    }
}

fn default_timeout_secs() -> u64 {
    20
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f64 {
    0.7
}

fn resolve_api_key(var: Option<&str>, field: &str) -> Result<Option<String>> {
    let Some(var) = var else {
        return Ok(None);
    };
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(Some(v)),
        _ => Err(Error::configuration_with_context(
            format!("environment variable {} is not set", var),
            ErrorContext::new()
                .with_field_path(field)
                .with_source("config_loader"),
        )),
    }
}

fn config_error(msg: impl Into<String>, field: &str) -> Error {
    Error::configuration_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("config_loader"),
    )
}

impl GatewayConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid gateway config: {}", e),
                ErrorContext::new().with_source("config_loader"),
            )
        })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot read {}: {}", path.display(), e),
                ErrorContext::new().with_source("config_loader"),
            )
        })?;
        Self::from_yaml_str(&content)
    }

    /// File (or defaults), then environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::from_yaml_file(p)?,
            None => Self::default(),
        };
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| env::var(key).ok())
    }

    /// Apply `AGENT_GATEWAY_*` overrides read through `lookup`.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `AGENT_GATEWAY_RATE_CAPACITY` | `rate_limit.capacity` |
    /// | `AGENT_GATEWAY_RATE_REFILL_PER_SEC` | `rate_limit.refill_per_sec` |
    /// | `AGENT_GATEWAY_RATE_ENABLED` | `rate_limit.enabled` |
    /// | `AGENT_GATEWAY_CACHE_ENABLED` | `cache.enabled` |
    /// | `AGENT_GATEWAY_CACHE_MAX_ENTRIES` | `cache.max_entries` |
    /// | `AGENT_GATEWAY_RETRY_MAX` | `retry.max_retries` |
    /// | `AGENT_GATEWAY_MAINTENANCE_INTERVAL_SECS` | `maintenance.interval_secs` |
    /// | `AGENT_GATEWAY_HOST` / `AGENT_GATEWAY_PORT` | `server.*` |
    /// | `AGENT_GATEWAY_CONVERSATIONAL_URL` | `conversational.base_url` |
    /// | `AGENT_GATEWAY_DIRECT_MODEL_URL` | `direct_model.base_url` |
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("RATE_CAPACITY") {
            self.rate_limit.capacity = parse_env("RATE_CAPACITY", &v)?;
        }
        if let Some(v) = get("RATE_REFILL_PER_SEC") {
            self.rate_limit.refill_per_sec = parse_env("RATE_REFILL_PER_SEC", &v)?;
        }
        if let Some(v) = get("RATE_ENABLED") {
            self.rate_limit.enabled = parse_flag("RATE_ENABLED", &v)?;
        }
        if let Some(v) = get("CACHE_ENABLED") {
            self.cache.enabled = parse_flag("CACHE_ENABLED", &v)?;
        }
        if let Some(v) = get("CACHE_MAX_ENTRIES") {
            self.cache.max_entries = parse_env("CACHE_MAX_ENTRIES", &v)?;
        }
        if let Some(v) = get("RETRY_MAX") {
            self.retry.max_retries = parse_env("RETRY_MAX", &v)?;
        }
        if let Some(v) = get("MAINTENANCE_INTERVAL_SECS") {
            self.maintenance.interval_secs = parse_env("MAINTENANCE_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("HOST") {
            self.server.host = v;
        }
        if let Some(v) = get("PORT") {
            self.server.port = parse_env("PORT", &v)?;
        }
        if let Some(v) = get("CONVERSATIONAL_URL") {
            match self.conversational {
                Some(ref mut c) => c.base_url = v,
                None => return Err(config_error(
                    "AGENT_GATEWAY_CONVERSATIONAL_URL set but no conversational backend is configured",
                    "conversational",
                )),
            }
        }
        if let Some(v) = get("DIRECT_MODEL_URL") {
            match self.direct_model {
                Some(ref mut d) => d.base_url = v,
                None => return Err(config_error(
                    "AGENT_GATEWAY_DIRECT_MODEL_URL set but no direct model backend is configured",
                    "direct_model",
                )),
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.rate_limit.to_limiter_config().validate()?;
        if self.retry.max_delay < self.retry.min_delay {
            return Err(config_error("max_delay is below min_delay", "retry.max_delay"));
        }
        if self.maintenance.interval_secs == 0 {
            return Err(config_error("interval must be positive", "maintenance.interval_secs"));
        }
        if let Some(ref c) = self.conversational {
            validate_base_url(&c.base_url, "conversational.base_url")?;
            require_non_empty(&c.agent_id, "conversational.agent_id")?;
            require_non_empty(&c.agent_alias_id, "conversational.agent_alias_id")?;
            if c.timeout_secs == 0 {
                return Err(config_error("timeout must be positive", "conversational.timeout_secs"));
            }
        }
        if let Some(ref d) = self.direct_model {
            validate_base_url(&d.base_url, "direct_model.base_url")?;
            require_non_empty(&d.model_id, "direct_model.model_id")?;
            if d.timeout_secs == 0 {
                return Err(config_error("timeout must be positive", "direct_model.timeout_secs"));
            }
            if !(0.0..=1.0).contains(&d.temperature) {
                return Err(config_error(
                    format!("temperature must be within 0..=1, got {}", d.temperature),
                    "direct_model.temperature",
                ));
            }
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.parse::<T>().map_err(|_| {
        config_error(
            format!("cannot parse {}{}={:?}", ENV_PREFIX, name, raw),
            "environment",
        )
    })
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(config_error(
            format!("{}{} expects a boolean, got {:?}", ENV_PREFIX, name, raw),
            "environment",
        )),
    }
}

fn validate_base_url(raw: &str, field: &str) -> Result<()> {
    let url = Url::parse(raw).map_err(|e| config_error(format!("invalid URL {:?}: {}", raw, e), field))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(config_error(format!("unsupported scheme {:?}", other), field)),
    }
}

fn require_non_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(config_error("must not be empty", field))
    } else {
        Ok(())
    }
}
