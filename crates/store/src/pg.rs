//! PostgreSQL store backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use crate::error::StoreError;
use crate::models::*;
use crate::traits::{AccountStore, ChannelStore, PostStore, TickRunStore};

const ACCOUNT_COLS: &str =
    "id, label, credential_ref, is_active, health, cooldown_until, consecutive_failures,
     last_failure_at, last_used_at, last_error, created_at, updated_at";

const CHANNEL_COLS: &str =
    "id, kind, identifier, title, state, is_active, backfill_days, last_synced_at,
     last_checked_at, last_error, created_at, updated_at";

const POST_COLS: &str =
    "id, channel_id, external_message_id, source_url, published_at, text, raw_payload, created_at";

const TICK_COLS: &str =
    "id, trigger_type, status, started_at, ended_at, channels_total, channels_checked,
     posts_inserted, accounts_active, accounts_cooldown, accounts_quarantined, channel_errors";

/// Keeps each multi-row insert under the Postgres bind-parameter limit.
const INSERT_CHUNK: usize = 500;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ── Accounts ─────────────────────────────────────────────────────

#[async_trait]
impl AccountStore for PgStore {
    async fn upsert(&self, label: &str, credential_ref: &str) -> Result<Account, StoreError> {
        let row = sqlx::query_as::<_, Account>(&format!(
            "INSERT INTO accounts (label, credential_ref)
             VALUES ($1, $2)
             ON CONFLICT (label) DO UPDATE SET
                 credential_ref = EXCLUDED.credential_ref,
                 updated_at = now()
             RETURNING {ACCOUNT_COLS}"
        ))
        .bind(label)
        .bind(credential_ref)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list(&self) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLS} FROM accounts ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_ready(&self, now: DateTime<Utc>) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLS} FROM accounts
             WHERE is_active
               AND credential_ref <> ''
               AND (health = 'active'
                    OR (health = 'cooldown' AND cooldown_until IS NOT NULL AND cooldown_until <= $1))
             ORDER BY last_used_at ASC NULLS FIRST, id ASC"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_used(&self, id: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE accounts SET last_used_at = $2, last_error = NULL, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_cooldown(&self, id: i64, until: DateTime<Utc>, reason: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE accounts SET health = 'cooldown', cooldown_until = $2,
                    consecutive_failures = 0, last_error = $3, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(until)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn quarantine(&self, id: i64, reason: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE accounts SET health = 'quarantined', is_active = FALSE,
                    cooldown_until = NULL, last_error = $2, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_transient_failure(
        &self,
        id: i64,
        now: DateTime<Utc>,
        window: chrono::Duration,
        reason: &str,
    ) -> Result<i32, StoreError> {
        let window_start = now - window;
        let streak = sqlx::query_scalar::<_, i32>(
            "UPDATE accounts SET
                 consecutive_failures = CASE
                     WHEN last_failure_at IS NULL OR last_failure_at < $2 THEN 1
                     ELSE consecutive_failures + 1
                 END,
                 last_failure_at = $3,
                 last_error = $4,
                 updated_at = now()
             WHERE id = $1
             RETURNING consecutive_failures",
        )
        .bind(id)
        .bind(window_start)
        .bind(now)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("account", id))?;
        Ok(streak)
    }

    async fn revive_cooled(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE accounts SET health = 'active', cooldown_until = NULL, updated_at = now()
             WHERE health = 'cooldown' AND cooldown_until IS NOT NULL AND cooldown_until <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn health_counts(&self) -> Result<HealthCounts, StoreError> {
        let counts = sqlx::query_as::<_, HealthCounts>(
            "SELECT
                 (COUNT(*) FILTER (WHERE health = 'active' AND is_active))::int AS active,
                 (COUNT(*) FILTER (WHERE health = 'cooldown'))::int AS cooldown,
                 (COUNT(*) FILTER (WHERE health = 'quarantined'))::int AS quarantined
             FROM accounts",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }
}

// ── Channels ─────────────────────────────────────────────────────

#[async_trait]
impl ChannelStore for PgStore {
    async fn upsert(&self, up: ChannelUpsert) -> Result<Channel, StoreError> {
        let identifier = normalize_identifier(up.kind, &up.identifier);
        let row = sqlx::query_as::<_, Channel>(&format!(
            "INSERT INTO channels (kind, identifier, title, backfill_days, is_active)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (kind, identifier) DO UPDATE SET
                 title = COALESCE(EXCLUDED.title, channels.title),
                 backfill_days = EXCLUDED.backfill_days,
                 is_active = EXCLUDED.is_active,
                 updated_at = now()
             RETURNING {CHANNEL_COLS}"
        ))
        .bind(up.kind)
        .bind(&identifier)
        .bind(&up.title)
        .bind(up.backfill_days)
        .bind(up.is_active)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get(&self, id: i64) -> Result<Option<Channel>, StoreError> {
        let row = sqlx::query_as::<_, Channel>(&format!(
            "SELECT {CHANNEL_COLS} FROM channels WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find(
        &self,
        kind: Option<ChannelKind>,
        identifier: &str,
    ) -> Result<Option<Channel>, StoreError> {
        // Without a kind the identifier is checked in both normalized forms.
        let public_form = normalize_identifier(ChannelKind::Public, identifier);
        let private_form = normalize_identifier(ChannelKind::Private, identifier);
        let row = sqlx::query_as::<_, Channel>(&format!(
            "SELECT {CHANNEL_COLS} FROM channels
             WHERE ($1::channel_kind IS NULL OR kind = $1)
               AND ((kind = 'public' AND identifier = $2) OR (kind = 'private' AND identifier = $3))
             ORDER BY id
             LIMIT 1"
        ))
        .bind(kind)
        .bind(&public_form)
        .bind(&private_form)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list(&self, filter: &ChannelFilter) -> Result<Page<Channel>, StoreError> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM channels
             WHERE ($1::boolean IS NULL OR is_active = $1)
               AND ($2::channel_kind IS NULL OR kind = $2)
               AND ($3::text IS NULL OR identifier ILIKE '%' || $3 || '%' OR title ILIKE '%' || $3 || '%')",
        )
        .bind(filter.is_active)
        .bind(filter.kind)
        .bind(&filter.q)
        .fetch_one(&self.pool)
        .await?;

        let items = sqlx::query_as::<_, Channel>(&format!(
            "SELECT {CHANNEL_COLS} FROM channels
             WHERE ($1::boolean IS NULL OR is_active = $1)
               AND ($2::channel_kind IS NULL OR kind = $2)
               AND ($3::text IS NULL OR identifier ILIKE '%' || $3 || '%' OR title ILIKE '%' || $3 || '%')
             ORDER BY id
             LIMIT $4 OFFSET $5"
        ))
        .bind(filter.is_active)
        .bind(filter.kind)
        .bind(&filter.q)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page { total, items })
    }

    async fn list_eligible(&self, limit: i64) -> Result<Vec<Channel>, StoreError> {
        let rows = sqlx::query_as::<_, Channel>(&format!(
            "SELECT {CHANNEL_COLS} FROM channels
             WHERE is_active AND state = 'active'
             ORDER BY last_synced_at ASC NULLS FIRST, id ASC
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn advance_cursor(
        &self,
        id: i64,
        candidate: DateTime<Utc>,
    ) -> Result<CursorAdvance, StoreError> {
        let result = sqlx::query(
            "UPDATE channels SET last_synced_at = $2, updated_at = now()
             WHERE id = $1 AND (last_synced_at IS NULL OR last_synced_at < $2)",
        )
        .bind(id)
        .bind(candidate)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(CursorAdvance::Applied)
        } else {
            debug!(channel_id = id, candidate = %candidate, "stale cursor candidate ignored");
            Ok(CursorAdvance::Ignored)
        }
    }

    async fn set_state(&self, id: i64, state: ChannelState, reason: Option<&str>) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE channels SET state = $2, last_error = COALESCE($3, last_error), updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(state)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("channel", id));
        }
        Ok(())
    }

    async fn record_check(&self, id: i64, now: DateTime<Utc>, error: Option<&str>) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE channels SET last_checked_at = $2, last_error = $3, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(now)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_title(&self, id: i64, title: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE channels SET title = $2, updated_at = now()
             WHERE id = $1 AND (title IS NULL OR title <> $2)",
        )
        .bind(id)
        .bind(title)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ── Posts ────────────────────────────────────────────────────────

#[async_trait]
impl PostStore for PgStore {
    async fn insert_batch(&self, channel_id: i64, posts: &[NewPost]) -> Result<u64, StoreError> {
        let mut inserted = 0u64;
        for chunk in posts.chunks(INSERT_CHUNK) {
            let mut qb = sqlx::QueryBuilder::new(
                "INSERT INTO posts (channel_id, external_message_id, source_url, published_at, text, raw_payload) ",
            );
            qb.push_values(chunk, |mut b, p| {
                b.push_bind(channel_id)
                    .push_bind(p.external_message_id)
                    .push_bind(&p.source_url)
                    .push_bind(p.published_at)
                    .push_bind(&p.text)
                    .push_bind(&p.raw_payload);
            });
            qb.push(" ON CONFLICT (channel_id, external_message_id) DO NOTHING RETURNING id");
            // Count of returned ids is the count of rows actually written.
            let rows = qb.build().fetch_all(&self.pool).await?;
            inserted += rows.len() as u64;
        }
        Ok(inserted)
    }

    async fn list(&self, filter: &PostFilter) -> Result<Page<Post>, StoreError> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM posts
             WHERE channel_id = $1
               AND ($2::timestamptz IS NULL OR published_at >= $2)
               AND ($3::timestamptz IS NULL OR published_at <= $3)",
        )
        .bind(filter.channel_id)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .fetch_one(&self.pool)
        .await?;

        let items = sqlx::query_as::<_, Post>(&format!(
            "SELECT {POST_COLS} FROM posts
             WHERE channel_id = $1
               AND ($2::timestamptz IS NULL OR published_at >= $2)
               AND ($3::timestamptz IS NULL OR published_at <= $3)
             ORDER BY published_at DESC, id DESC
             LIMIT $4 OFFSET $5"
        ))
        .bind(filter.channel_id)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page { total, items })
    }
}

// ── Tick runs ────────────────────────────────────────────────────

#[async_trait]
impl TickRunStore for PgStore {
    async fn begin(&self, trigger: TickTrigger, now: DateTime<Utc>) -> Result<i64, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO tick_runs (trigger_type, status, started_at)
             VALUES ($1, 'running', $2)
             RETURNING id",
        )
        .bind(trigger.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn finalize(
        &self,
        id: i64,
        status: TickStatus,
        now: DateTime<Utc>,
        summary: &TickSummary,
    ) -> Result<(), StoreError> {
        let errors = serde_json::to_value(&summary.channel_failures)
            .map_err(|e| StoreError::Other(format!("channel_errors encode: {e}")))?;
        sqlx::query(
            "UPDATE tick_runs SET
                 status = $2, ended_at = $3,
                 channels_total = $4, channels_checked = $5, posts_inserted = $6,
                 accounts_active = $7, accounts_cooldown = $8, accounts_quarantined = $9,
                 channel_errors = $10
             WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(now)
        .bind(summary.channels_total)
        .bind(summary.channels_checked)
        .bind(summary.posts_inserted)
        .bind(summary.accounts.active)
        .bind(summary.accounts.cooldown)
        .bind(summary.accounts.quarantined)
        .bind(errors)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_skipped(&self, trigger: TickTrigger, now: DateTime<Utc>) -> Result<i64, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO tick_runs (trigger_type, status, started_at, ended_at)
             VALUES ($1, 'skipped', $2, $2)
             RETURNING id",
        )
        .bind(trigger.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn recent(&self, limit: i64) -> Result<Vec<TickRun>, StoreError> {
        let rows = sqlx::query_as::<_, TickRun>(&format!(
            "SELECT {TICK_COLS} FROM tick_runs ORDER BY started_at DESC, id DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn latest(&self) -> Result<Option<TickRun>, StoreError> {
        let row = sqlx::query_as::<_, TickRun>(&format!(
            "SELECT {TICK_COLS} FROM tick_runs ORDER BY started_at DESC, id DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
