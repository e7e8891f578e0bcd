//! Resolver configuration: defaults, validation, environment overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const MINUTE_MS: u64 = 60 * 1000;
const DAY_MS: u64 = 24 * 60 * MINUTE_MS;

/// Prefix for environment overrides, e.g. `HANDLE_RESTORE_MAX_CONCURRENCY`.
pub const ENV_PREFIX: &str = "HANDLE_RESTORE_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tunables for the resolver and the DOM-side restorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolverConfig {
    pub cache_capacity: usize,
    pub persist_capacity: usize,
    pub positive_ttl_ms: u64,
    pub negative_ttl_ms: u64,
    pub max_concurrency: usize,
    pub min_request_spacing_ms: u64,
    pub fetch_timeout_ms: u64,
    pub scan_debounce_ms: u64,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub persist_debounce_ms: u64,
    pub container_poll_ms: u64,
    /// Titles that mean "no real name" (the bare site name).
    pub placeholder_names: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 20_000,
            persist_capacity: 3_000,
            positive_ttl_ms: 7 * DAY_MS,
            negative_ttl_ms: 10 * MINUTE_MS,
            max_concurrency: 4,
            min_request_spacing_ms: 250,
            fetch_timeout_ms: 15_000,
            scan_debounce_ms: 16,
            retry_count: 2,
            retry_delay_ms: 400,
            persist_debounce_ms: 1_000,
            container_poll_ms: 800,
            placeholder_names: vec!["YouTube".into()],
        }
    }
}

impl ResolverConfig {
    /// Parse a JSON options object; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with `HANDLE_RESTORE_*` environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut c = Self::default();
        let g = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        override_num(&mut c.cache_capacity, g("CACHE_CAPACITY"), "CACHE_CAPACITY");
        override_num(&mut c.persist_capacity, g("PERSIST_CAPACITY"), "PERSIST_CAPACITY");
        override_num(&mut c.positive_ttl_ms, g("POSITIVE_TTL_MS"), "POSITIVE_TTL_MS");
        override_num(&mut c.negative_ttl_ms, g("NEGATIVE_TTL_MS"), "NEGATIVE_TTL_MS");
        override_num(&mut c.max_concurrency, g("MAX_CONCURRENCY"), "MAX_CONCURRENCY");
        override_num(
            &mut c.min_request_spacing_ms,
            g("MIN_REQUEST_SPACING_MS"),
            "MIN_REQUEST_SPACING_MS",
        );
        override_num(&mut c.fetch_timeout_ms, g("FETCH_TIMEOUT_MS"), "FETCH_TIMEOUT_MS");
        override_num(&mut c.scan_debounce_ms, g("SCAN_DEBOUNCE_MS"), "SCAN_DEBOUNCE_MS");
        override_num(&mut c.retry_count, g("RETRY_COUNT"), "RETRY_COUNT");
        override_num(&mut c.retry_delay_ms, g("RETRY_DELAY_MS"), "RETRY_DELAY_MS");
        override_num(
            &mut c.persist_debounce_ms,
            g("PERSIST_DEBOUNCE_MS"),
            "PERSIST_DEBOUNCE_MS",
        );
        override_num(&mut c.container_poll_ms, g("CONTAINER_POLL_MS"), "CONTAINER_POLL_MS");

        if let Some(v) = g("PLACEHOLDER_NAMES") {
            c.placeholder_names = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect();
        }

        c.validate()?;
        Ok(c)
    }

    /// Range-check every value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("cacheCapacity", self.cache_capacity as u64, 1, 1_000_000)?;
        check_range("persistCapacity", self.persist_capacity as u64, 1, 1_000_000)?;
        check_range("positiveTtlMs", self.positive_ttl_ms, 1, 365 * DAY_MS)?;
        check_range("negativeTtlMs", self.negative_ttl_ms, 1, 30 * DAY_MS)?;
        check_range("maxConcurrency", self.max_concurrency as u64, 1, 32)?;
        check_range("minRequestSpacingMs", self.min_request_spacing_ms, 0, 60_000)?;
        check_range("fetchTimeoutMs", self.fetch_timeout_ms, 1, 300_000)?;
        check_range("scanDebounceMs", self.scan_debounce_ms, 0, 10_000)?;
        check_range("retryCount", u64::from(self.retry_count), 0, 10)?;
        check_range("retryDelayMs", self.retry_delay_ms, 0, 60_000)?;
        check_range("persistDebounceMs", self.persist_debounce_ms, 0, 600_000)?;
        check_range("containerPollMs", self.container_poll_ms, 1, 600_000)?;
        Ok(())
    }

    pub fn positive_ttl(&self) -> Duration {
        Duration::from_millis(self.positive_ttl_ms)
    }

    pub fn negative_ttl(&self) -> Duration {
        Duration::from_millis(self.negative_ttl_ms)
    }

    pub fn min_request_spacing(&self) -> Duration {
        Duration::from_millis(self.min_request_spacing_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn scan_debounce(&self) -> Duration {
        Duration::from_millis(self.scan_debounce_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }

    pub fn container_poll(&self) -> Duration {
        Duration::from_millis(self.container_poll_ms)
    }

    /// Whether `name` is one of the configured placeholder titles.
    pub fn is_placeholder(&self, name: &str) -> bool {
        self.placeholder_names
            .iter()
            .any(|p| p.eq_ignore_ascii_case(name.trim()))
    }
}

fn override_num<T: std::str::FromStr>(slot: &mut T, value: Option<String>, name: &str) {
    let Some(v) = value else {
        return;
    };
    match v.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => {
            tracing::warn!(setting = name, value = %v, "Ignoring unparsable override");
        }
    }
}

fn check_range(key: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key,
            reason: format!("must be between {min} and {max}, got {value}"),
        })
    }
}
