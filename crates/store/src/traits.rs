//! Store traits and the backend bundle handed to the engine and the API.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::StoreError;
use crate::mem::MemStore;
use crate::models::*;
use crate::pg::PgStore;

/// Client-account persistence. Health transitions come exclusively from
/// the scheduler's failure handling; operators only toggle `is_active`.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Idempotent by label; re-seeding refreshes the credential reference.
    async fn upsert(&self, label: &str, credential_ref: &str) -> Result<Account, StoreError>;

    /// All accounts, id order.
    async fn list(&self) -> Result<Vec<Account>, StoreError>;

    /// Accounts usable at `now`, least-recently-used first (never-used before all).
    async fn list_ready(&self, now: DateTime<Utc>) -> Result<Vec<Account>, StoreError>;

    /// Note a successful fetch: bumps `last_used_at`, clears `last_error`.
    async fn mark_used(&self, id: i64, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Put the account on cooldown until `until` and reset its failure streak.
    async fn set_cooldown(&self, id: i64, until: DateTime<Utc>, reason: &str) -> Result<(), StoreError>;

    /// Terminal until re-onboarding; also clears `is_active`.
    async fn quarantine(&self, id: i64, reason: &str) -> Result<(), StoreError>;

    /// Bump the transient-failure streak; a gap longer than `window`
    /// restarts the count at 1. Returns the new streak.
    async fn record_transient_failure(
        &self,
        id: i64,
        now: DateTime<Utc>,
        window: chrono::Duration,
        reason: &str,
    ) -> Result<i32, StoreError>;

    /// Flip accounts whose cooldown has elapsed back to active.
    /// Returns how many were revived.
    async fn revive_cooled(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn health_counts(&self) -> Result<HealthCounts, StoreError>;
}

/// Channel registry: registration, eligibility, and the progress cursor.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Idempotent by (kind, identifier). Never touches the cursor or the
    /// lifecycle state of an existing row.
    async fn upsert(&self, up: ChannelUpsert) -> Result<Channel, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<Channel>, StoreError>;

    /// Look up by identifier, optionally narrowed to one kind.
    async fn find(
        &self,
        kind: Option<ChannelKind>,
        identifier: &str,
    ) -> Result<Option<Channel>, StoreError>;

    async fn list(&self, filter: &ChannelFilter) -> Result<Page<Channel>, StoreError>;

    /// Fetch candidates for one cycle: active channels, stalest cursor
    /// first, never-synced before all.
    async fn list_eligible(&self, limit: i64) -> Result<Vec<Channel>, StoreError>;

    /// Monotonic cursor write: applied only when `candidate` is strictly
    /// newer than the stored value.
    async fn advance_cursor(
        &self,
        id: i64,
        candidate: DateTime<Utc>,
    ) -> Result<CursorAdvance, StoreError>;

    async fn set_state(&self, id: i64, state: ChannelState, reason: Option<&str>) -> Result<(), StoreError>;

    /// Bookkeeping after an attempt: `last_checked_at` plus the latest
    /// error (or clears it on success).
    async fn record_check(&self, id: i64, now: DateTime<Utc>, error: Option<&str>) -> Result<(), StoreError>;

    async fn set_title(&self, id: i64, title: &str) -> Result<(), StoreError>;
}

/// Ingested posts. Append-only; duplicates are absorbed, never errors.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Insert a batch for one channel, skipping rows whose
    /// (channel_id, external_message_id) already exists. Returns how many
    /// rows were actually written.
    async fn insert_batch(&self, channel_id: i64, posts: &[NewPost]) -> Result<u64, StoreError>;

    async fn list(&self, filter: &PostFilter) -> Result<Page<Post>, StoreError>;
}

/// Cycle audit records; one per attempt, including skipped ones.
#[async_trait]
pub trait TickRunStore: Send + Sync {
    /// Open a run in `running` state, returning its id.
    async fn begin(&self, trigger: TickTrigger, now: DateTime<Utc>) -> Result<i64, StoreError>;

    async fn finalize(
        &self,
        id: i64,
        status: TickStatus,
        now: DateTime<Utc>,
        summary: &TickSummary,
    ) -> Result<(), StoreError>;

    /// One-shot record for a cycle that never ran (lock held elsewhere).
    async fn record_skipped(&self, trigger: TickTrigger, now: DateTime<Utc>) -> Result<i64, StoreError>;

    async fn recent(&self, limit: i64) -> Result<Vec<TickRun>, StoreError>;

    async fn latest(&self) -> Result<Option<TickRun>, StoreError>;
}

/// One handle bundling all four stores; cheap to clone.
#[derive(Clone)]
pub struct Stores {
    pub accounts: Arc<dyn AccountStore>,
    pub channels: Arc<dyn ChannelStore>,
    pub posts: Arc<dyn PostStore>,
    pub ticks: Arc<dyn TickRunStore>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        let pg = Arc::new(PgStore::new(pool));
        Self {
            accounts: pg.clone(),
            channels: pg.clone(),
            posts: pg.clone(),
            ticks: pg,
        }
    }

    pub fn memory() -> Self {
        let mem = Arc::new(MemStore::default());
        Self::from_mem(mem)
    }

    pub fn from_mem(mem: Arc<MemStore>) -> Self {
        Self {
            accounts: mem.clone(),
            channels: mem.clone(),
            posts: mem.clone(),
            ticks: mem,
        }
    }
}
