use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub postgres: PostgresConfig,
    pub redis: RedisConfig,
    pub store: StoreConfig,
    pub source: SourceConfig,
    pub scheduler: SchedulerConfig,
    pub notify: NotifyConfig,
}

/// Well-known env keys that identify a profile when prefixed.
const PROFILE_MARKER_KEYS: &[&str] = &[
    "PG_HOST",
    "REDIS_URL",
    "API_TOKEN",
    "TELEGRAM_BOT_TOKEN",
];

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `DEPESCHE_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("DEPESCHE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
            redis: RedisConfig::from_env_profiled(p),
            store: StoreConfig::from_env_profiled(p),
            source: SourceConfig::from_env_profiled(p),
            scheduler: SchedulerConfig::from_env_profiled(p),
            notify: NotifyConfig::from_env_profiled(p),
        }
    }

    /// Discover available profiles by scanning env vars for `{PREFIX}_{MARKER_KEY}` patterns.
    /// Always includes "default" (the unprefixed config).
    pub fn available_profiles() -> Vec<String> {
        let mut profiles = std::collections::BTreeSet::new();
        profiles.insert("default".to_string());

        for (key, _) in env::vars() {
            for marker in PROFILE_MARKER_KEYS {
                if let Some(prefix) = key.strip_suffix(&format!("_{}", marker)) {
                    if !prefix.is_empty()
                        && prefix.chars().all(|c| c.is_ascii_uppercase() || c == '_')
                    {
                        profiles.insert(prefix.to_string());
                    }
                }
            }
        }

        profiles.into_iter().collect()
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  server:     {}:{} (api token {})",
            self.server.host,
            self.server.port,
            if self.server.api_token.is_some() { "set" } else { "UNSET: API fails closed" },
        );
        tracing::info!("  postgres:   host={}, db={}", self.postgres.host, self.postgres.database);
        tracing::info!(
            "  lock:       backend={}, url={}, key={}",
            self.redis.lock_backend,
            self.redis.url,
            self.redis.lock_key,
        );
        tracing::info!("  store:      backend={}", self.store.backend);
        tracing::info!("  source:     backend={}", self.source.backend);
        tracing::info!(
            "  scheduler:  interval={}s, budget={}s, channels/cycle={}, workers={}",
            self.scheduler.interval_secs,
            self.scheduler.cycle_budget_secs,
            self.scheduler.channels_per_cycle,
            self.scheduler.max_concurrent_fetches,
        );
        tracing::info!(
            "  notify:     telegram={}, webhook={}",
            self.notify.telegram_configured(),
            self.notify.webhook_url.is_some(),
        );
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "server": {
                "host": self.server.host,
                "port": self.server.port,
                "api_token_set": self.server.api_token.is_some(),
            },
            "postgres": {
                "host": self.postgres.host,
                "port": self.postgres.port,
                "database": self.postgres.database,
                "configured": self.postgres.is_configured(),
            },
            "lock": {
                "backend": self.redis.lock_backend,
                "url": self.redis.url,
                "key": self.redis.lock_key,
            },
            "store": { "backend": self.store.backend },
            "source": { "backend": self.source.backend },
            "scheduler": {
                "interval_secs": self.scheduler.interval_secs,
                "cycle_budget_secs": self.scheduler.cycle_budget_secs,
                "channels_per_cycle": self.scheduler.channels_per_cycle,
                "max_concurrent_fetches": self.scheduler.max_concurrent_fetches,
                "lock_ttl_secs": self.scheduler.lock_ttl_secs,
            },
            "notify": {
                "telegram": self.notify.telegram_configured(),
                "webhook": self.notify.webhook_url.is_some(),
            },
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
    /// Bearer token guarding /api routes. When unset the API refuses
    /// all guarded requests with 503 rather than serving them open.
    pub api_token: Option<String>,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_u16(p, "PORT", 3001),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
            api_token: profiled_env_opt(p, "API_TOKEN"),
        }
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "depesche"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}

// ── Redis (tick lock) ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub lock_key: String,
    /// "redis" for the shared cross-instance lock, "local" for a
    /// process-wide lock (single-instance and test deployments).
    pub lock_backend: String,
}

impl RedisConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_or(p, "REDIS_URL", "redis://127.0.0.1:6379"),
            lock_key: profiled_env_or(p, "LOCK_KEY", "depesche:tick:lock"),
            lock_backend: profiled_env_or(p, "LOCK_BACKEND", "redis"),
        }
    }
}

// ── Store backend ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "postgres" or "memory".
    pub backend: String,
}

impl StoreConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            backend: profiled_env_or(p, "STORE_BACKEND", "postgres"),
        }
    }
}

// ── Message source ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// "scripted" is the only in-tree backend; wire-protocol backends
    /// plug in through the MessageSource trait.
    pub backend: String,
    /// Fixture file for the scripted backend.
    pub script_path: Option<String>,
}

impl SourceConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            backend: profiled_env_or(p, "SOURCE_BACKEND", "scripted"),
            script_path: profiled_env_opt(p, "SOURCE_SCRIPT"),
        }
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    pub cycle_budget_secs: u64,
    pub channels_per_cycle: u32,
    pub max_concurrent_fetches: u32,
    /// Distinct accounts tried per channel per cycle before deferring it.
    pub channel_retry_budget: u32,
    pub page_size: u32,
    pub page_cap: u32,
    pub lock_ttl_secs: u64,
    /// How long a manual trigger waits for the lock before giving up.
    pub forced_lock_wait_secs: u64,
    /// When set, an aborted cycle schedules the next one after this
    /// delay instead of the full interval.
    pub resume_after_abort_secs: Option<u64>,
    pub cooldown_jitter_secs: u64,
    pub failure_threshold: u32,
    pub failure_window_secs: u64,
    pub breaker_cooldown_secs: u64,
}

impl SchedulerConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            interval_secs: profiled_env_u64(p, "TICK_INTERVAL_SECS", d.interval_secs),
            cycle_budget_secs: profiled_env_u64(p, "CYCLE_BUDGET_SECS", d.cycle_budget_secs),
            channels_per_cycle: profiled_env_u32(p, "CHANNELS_PER_CYCLE", d.channels_per_cycle),
            max_concurrent_fetches: profiled_env_u32(p, "MAX_CONCURRENT_FETCHES", d.max_concurrent_fetches),
            channel_retry_budget: profiled_env_u32(p, "CHANNEL_RETRY_BUDGET", d.channel_retry_budget),
            page_size: profiled_env_u32(p, "PAGE_SIZE", d.page_size),
            page_cap: profiled_env_u32(p, "PAGE_CAP", d.page_cap),
            lock_ttl_secs: profiled_env_u64(p, "LOCK_TTL_SECS", d.lock_ttl_secs),
            forced_lock_wait_secs: profiled_env_u64(p, "FORCED_LOCK_WAIT_SECS", d.forced_lock_wait_secs),
            resume_after_abort_secs: profiled_env_opt(p, "RESUME_AFTER_ABORT_SECS")
                .and_then(|v| v.parse().ok()),
            cooldown_jitter_secs: profiled_env_u64(p, "COOLDOWN_JITTER_SECS", d.cooldown_jitter_secs),
            failure_threshold: profiled_env_u32(p, "FAILURE_THRESHOLD", d.failure_threshold),
            failure_window_secs: profiled_env_u64(p, "FAILURE_WINDOW_SECS", d.failure_window_secs),
            breaker_cooldown_secs: profiled_env_u64(p, "BREAKER_COOLDOWN_SECS", d.breaker_cooldown_secs),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn cycle_budget(&self) -> Duration {
        Duration::from_secs(self.cycle_budget_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn forced_lock_wait(&self) -> Duration {
        Duration::from_secs(self.forced_lock_wait_secs)
    }

    pub fn resume_after_abort(&self) -> Option<Duration> {
        self.resume_after_abort_secs.map(Duration::from_secs)
    }

    pub fn failure_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.failure_window_secs as i64)
    }

    pub fn breaker_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.breaker_cooldown_secs as i64)
    }
}

impl Default for SchedulerConfig {
    /// Same values `from_env` falls back to when nothing is set.
    fn default() -> Self {
        Self {
            interval_secs: 300,
            cycle_budget_secs: 240,
            channels_per_cycle: 50,
            max_concurrent_fetches: 4,
            channel_retry_budget: 8,
            page_size: 200,
            page_cap: 10,
            lock_ttl_secs: 300,
            forced_lock_wait_secs: 5,
            resume_after_abort_secs: None,
            cooldown_jitter_secs: 30,
            failure_threshold: 5,
            failure_window_secs: 600,
            breaker_cooldown_secs: 120,
        }
    }
}

// ── Notifications ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub webhook_url: Option<String>,
}

impl NotifyConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            telegram_bot_token: profiled_env_opt(p, "TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: profiled_env_opt(p, "TELEGRAM_CHAT_ID"),
            webhook_url: profiled_env_opt(p, "NOTIFY_WEBHOOK_URL"),
        }
    }

    pub fn telegram_configured(&self) -> bool {
        self.telegram_bot_token.is_some() && self.telegram_chat_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiled_lookup_prefers_prefixed_key() {
        env::set_var("CFGTEST_PG_HOST", "profiled.example");
        env::set_var("PG_HOST", "plain.example");
        assert_eq!(profiled_env_or("CFGTEST", "PG_HOST", "x"), "profiled.example");
        assert_eq!(profiled_env_or("", "PG_HOST", "x"), "plain.example");
        env::remove_var("CFGTEST_PG_HOST");
        env::remove_var("PG_HOST");
    }

    #[test]
    fn scheduler_defaults_are_sane() {
        let s = SchedulerConfig::from_env_profiled("NO_SUCH_PROFILE_XYZ");
        assert!(s.lock_ttl_secs > s.cycle_budget_secs);
        assert!(s.channel_retry_budget >= 1);
        assert_eq!(s.resume_after_abort_secs, None);
    }

    #[test]
    fn connection_string_includes_ssl_mode() {
        let pg = PostgresConfig {
            host: "db.local".into(),
            port: 5433,
            database: "dep".into(),
            username: Some("u".into()),
            password: Some("p".into()),
            ssl_mode: "require".into(),
            max_connections: 5,
        };
        assert_eq!(
            pg.connection_string(),
            "postgres://u:p@db.local:5433/dep?sslmode=require"
        );
    }
}
