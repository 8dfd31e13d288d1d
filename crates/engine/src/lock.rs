//! Cross-instance tick lock.
//!
//! Every scheduler instance competes for one lock before running a
//! cycle. The holder tags the lock with a random token so that renew
//! and release only ever touch a lock this instance still owns; a
//! lock that expired and was grabbed by another instance is left
//! alone. Losing the race is not an error, the cycle is skipped.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use redis::aio::ConnectionManager;
use redis::Script;

use depesche_core::config::RedisConfig;

/// Compare-and-delete: the lock is only removed when the caller still
/// owns it.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Compare-and-expire: the TTL is only extended when the caller still
/// owns the lock.
const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
    return 0
end
"#;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("unknown lock backend: {0}")]
    UnknownBackend(String),
}

/// Proof of lock ownership. The token value is what the backend
/// compares against on renew and release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Mutual exclusion for the tick cycle.
#[async_trait::async_trait]
pub trait TickLock: Send + Sync {
    /// Try to take the lock for `ttl`. Returns `None` when another
    /// holder currently owns it.
    async fn acquire(&self, ttl: Duration) -> Result<Option<LockToken>, LockError>;

    /// Extend the TTL of a held lock. Returns `false` when the lock
    /// is no longer owned by `token` (expired or taken over).
    async fn renew(&self, token: &LockToken, ttl: Duration) -> Result<bool, LockError>;

    /// Give the lock up early. A lock that already expired is left
    /// untouched.
    async fn release(&self, token: LockToken) -> Result<(), LockError>;
}

/// Select and connect the lock backend from configuration.
pub async fn build_tick_lock(cfg: &RedisConfig) -> Result<std::sync::Arc<dyn TickLock>, LockError> {
    match cfg.lock_backend.as_str() {
        "redis" => {
            let lock = RedisTickLock::connect(&cfg.url, &cfg.lock_key).await?;
            Ok(std::sync::Arc::new(lock))
        }
        "local" => Ok(std::sync::Arc::new(LocalTickLock::new())),
        other => Err(LockError::UnknownBackend(other.to_string())),
    }
}

// ── Redis lock ────────────────────────────────────────────────

/// Redis-backed lock shared by all scheduler instances.
///
/// `SET NX PX` takes the lock atomically; renew and release run Lua
/// scripts so the GET-compare and the write are one atomic step.
pub struct RedisTickLock {
    conn: ConnectionManager,
    key: String,
    release: Script,
    renew: Script,
}

impl RedisTickLock {
    pub async fn connect(url: &str, key: &str) -> Result<Self, LockError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!(key, "redis tick lock connected");
        Ok(Self {
            conn,
            key: key.to_string(),
            release: Script::new(RELEASE_SCRIPT),
            renew: Script::new(RENEW_SCRIPT),
        })
    }
}

#[async_trait::async_trait]
impl TickLock for RedisTickLock {
    async fn acquire(&self, ttl: Duration) -> Result<Option<LockToken>, LockError> {
        let token = LockToken::generate();
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.map(|_| token))
    }

    async fn renew(&self, token: &LockToken, ttl: Duration) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let extended: i64 = self
            .renew
            .key(&self.key)
            .arg(token.as_str())
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    async fn release(&self, token: LockToken) -> Result<(), LockError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(&self.key)
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await?;
        if deleted == 0 {
            tracing::warn!(key = %self.key, "tick lock was already expired or taken over at release");
        }
        Ok(())
    }
}

// ── Local lock ────────────────────────────────────────────────

struct Held {
    token: String,
    expires_at: Instant,
}

/// Process-wide lock for single-instance and test deployments.
///
/// Honors the same token and TTL semantics as the Redis lock, so the
/// scheduler behaves identically against either backend.
pub struct LocalTickLock {
    state: Mutex<Option<Held>>,
}

impl LocalTickLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }
}

impl Default for LocalTickLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TickLock for LocalTickLock {
    async fn acquire(&self, ttl: Duration) -> Result<Option<LockToken>, LockError> {
        let mut state = self.state.lock().expect("lock state poisoned");
        if let Some(held) = state.as_ref() {
            if held.expires_at > Instant::now() {
                return Ok(None);
            }
        }
        let token = LockToken::generate();
        *state = Some(Held {
            token: token.as_str().to_string(),
            expires_at: Instant::now() + ttl,
        });
        Ok(Some(token))
    }

    async fn renew(&self, token: &LockToken, ttl: Duration) -> Result<bool, LockError> {
        let mut state = self.state.lock().expect("lock state poisoned");
        match state.as_mut() {
            Some(held) if held.token == token.as_str() && held.expires_at > Instant::now() => {
                held.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, token: LockToken) -> Result<(), LockError> {
        let mut state = self.state.lock().expect("lock state poisoned");
        if let Some(held) = state.as_ref() {
            if held.token == token.as_str() {
                *state = None;
            }
        }
        Ok(())
    }
}
