//! Per-tribunal rate-limit policy.

use crate::models::TribunalId;
use std::collections::HashMap;

/// Rate-limit policy for one tribunal.
///
/// Loaded at startup and read-only inside a worker except through
/// [`crate::scheduler::TribunalScheduler::update_limits`], which hot-swaps
/// the whole value.
///
/// # Environment Variables
///
/// Defaults (not per-tribunal overrides) can be tuned via:
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `ANDAMENTO_LIMIT_PER_MINUTE` | u32 | `10` | Requests allowed per rolling minute |
/// | `ANDAMENTO_LIMIT_PER_HOUR` | u32 | `200` | Requests allowed per rolling hour |
/// | `ANDAMENTO_LIMIT_PER_DAY` | u32 | `2000` | Requests allowed per rolling day |
/// | `ANDAMENTO_LIMIT_BURST` | u32 | `3` | Requests allowed per rolling 10 s |
/// | `ANDAMENTO_LIMIT_COOLDOWN_SECS` | u64 | `30` | Base retry/block cooldown |
/// | `ANDAMENTO_LIMIT_BACKOFF_MULTIPLIER` | f64 | `2.0` | Exponential backoff factor |
/// | `ANDAMENTO_LIMIT_MAX_RETRIES` | u32 | `3` | Internal retries per request |
#[derive(Debug, Clone, PartialEq)]
pub struct TribunalLimitConfig {
    /// Requests allowed in any rolling 60-second window.
    pub requests_per_minute: u32,
    /// Requests allowed in any rolling 1-hour window.
    pub requests_per_hour: u32,
    /// Requests allowed in any rolling 24-hour window.
    pub requests_per_day: u32,
    /// Requests allowed in any rolling 10-second window.
    pub burst_limit: u32,
    /// Base cooldown in seconds; also seeds the failure block (`2 ×`).
    pub cooldown_secs: u64,
    /// Exponential backoff factor applied per retry.
    pub backoff_multiplier: f64,
    /// How many times a failing request is retried before surfacing.
    pub max_retries: u32,
    /// Scheduling priority class for routine work, 1 (highest) to 5 (lowest).
    pub priority_class: u8,
}

impl Default for TribunalLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 10,
            requests_per_hour: 200,
            requests_per_day: 2000,
            burst_limit: 3,
            cooldown_secs: 30,
            backoff_multiplier: 2.0,
            max_retries: 3,
            priority_class: 3,
        }
    }
}

impl TribunalLimitConfig {
    /// Loads the default policy with environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse::<u32>("ANDAMENTO_LIMIT_PER_MINUTE") {
            config.requests_per_minute = v.max(1);
        }
        if let Some(v) = env_parse::<u32>("ANDAMENTO_LIMIT_PER_HOUR") {
            config.requests_per_hour = v.max(1);
        }
        if let Some(v) = env_parse::<u32>("ANDAMENTO_LIMIT_PER_DAY") {
            config.requests_per_day = v.max(1);
        }
        if let Some(v) = env_parse::<u32>("ANDAMENTO_LIMIT_BURST") {
            config.burst_limit = v.max(1);
        }
        if let Some(v) = env_parse::<u64>("ANDAMENTO_LIMIT_COOLDOWN_SECS") {
            config.cooldown_secs = v.max(1);
        }
        if let Some(v) = env_parse::<f64>("ANDAMENTO_LIMIT_BACKOFF_MULTIPLIER") {
            config.backoff_multiplier = v.max(1.0);
        }
        if let Some(v) = env_parse::<u32>("ANDAMENTO_LIMIT_MAX_RETRIES") {
            config.max_retries = v;
        }

        config
    }

    /// Sets the per-minute ceiling.
    #[must_use]
    pub const fn with_requests_per_minute(mut self, limit: u32) -> Self {
        self.requests_per_minute = limit;
        self
    }

    /// Sets the per-hour ceiling.
    #[must_use]
    pub const fn with_requests_per_hour(mut self, limit: u32) -> Self {
        self.requests_per_hour = limit;
        self
    }

    /// Sets the per-day ceiling.
    #[must_use]
    pub const fn with_requests_per_day(mut self, limit: u32) -> Self {
        self.requests_per_day = limit;
        self
    }

    /// Sets the burst ceiling.
    #[must_use]
    pub const fn with_burst_limit(mut self, limit: u32) -> Self {
        self.burst_limit = limit;
        self
    }

    /// Sets the base cooldown in seconds.
    #[must_use]
    pub const fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub const fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the priority class (clamped to 1–5).
    #[must_use]
    pub fn with_priority_class(mut self, class: u8) -> Self {
        self.priority_class = class.clamp(1, 5);
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Registry of per-tribunal policies with a shared fallback.
#[derive(Debug, Clone)]
pub struct LimitRegistry {
    default: TribunalLimitConfig,
    overrides: HashMap<TribunalId, TribunalLimitConfig>,
}

impl LimitRegistry {
    /// Creates a registry around the given fallback policy.
    #[must_use]
    pub fn new(default: TribunalLimitConfig) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Creates a registry with the built-in policies for known tribunals.
    ///
    /// High-volume state courts tolerate more traffic than the default;
    /// labor tribunals are throttled harder and given a better priority
    /// class since their movements are the most deadline-sensitive.
    #[must_use]
    pub fn with_presets(default: TribunalLimitConfig) -> Self {
        let mut registry = Self::new(default);

        registry.set(
            TribunalId::new("TJSP"),
            TribunalLimitConfig::default()
                .with_requests_per_minute(30)
                .with_requests_per_hour(600)
                .with_requests_per_day(5000)
                .with_burst_limit(5),
        );
        registry.set(
            TribunalId::new("TJRJ"),
            TribunalLimitConfig::default()
                .with_requests_per_minute(20)
                .with_requests_per_hour(400),
        );
        registry.set(
            TribunalId::new("TJMG"),
            TribunalLimitConfig::default()
                .with_requests_per_minute(20)
                .with_requests_per_hour(400),
        );
        for region in 1..=24 {
            registry.set(
                TribunalId::new(format!("TRT{region}")),
                TribunalLimitConfig::default()
                    .with_requests_per_minute(6)
                    .with_cooldown_secs(60)
                    .with_priority_class(2),
            );
        }

        registry
    }

    /// Returns the policy for a tribunal (fallback when not overridden).
    #[must_use]
    pub fn for_tribunal(&self, tribunal: &TribunalId) -> TribunalLimitConfig {
        self.overrides
            .get(tribunal)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }

    /// Installs or replaces a tribunal's policy.
    pub fn set(&mut self, tribunal: TribunalId, config: TribunalLimitConfig) {
        self.overrides.insert(tribunal, config);
    }
}

impl Default for LimitRegistry {
    fn default() -> Self {
        Self::with_presets(TribunalLimitConfig::default())
    }
}
