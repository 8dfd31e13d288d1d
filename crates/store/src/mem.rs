//! In-memory store backend.
//!
//! Single-process stand-in with the same observable semantics as the
//! Postgres backend. Used by the `memory` store profile and by the
//! scheduler test suites.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::*;
use crate::traits::{AccountStore, ChannelStore, PostStore, TickRunStore};

#[derive(Default)]
struct MemInner {
    accounts: BTreeMap<i64, Account>,
    channels: BTreeMap<i64, Channel>,
    posts: Vec<Post>,
    post_keys: HashSet<(i64, i64)>,
    ticks: BTreeMap<i64, TickRun>,
    next_account_id: i64,
    next_channel_id: i64,
    next_post_id: i64,
    next_tick_id: i64,
}

#[derive(Default)]
pub struct MemStore {
    inner: RwLock<MemInner>,
}

fn page_slice<T: Clone>(items: Vec<T>, limit: i64, offset: i64) -> Page<T> {
    let total = items.len() as i64;
    let offset = offset.max(0) as usize;
    let limit = limit.max(0) as usize;
    let items = items.into_iter().skip(offset).take(limit).collect();
    Page { total, items }
}

// ── Accounts ─────────────────────────────────────────────────────

#[async_trait]
impl AccountStore for MemStore {
    async fn upsert(&self, label: &str, credential_ref: &str) -> Result<Account, StoreError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        if let Some(acct) = inner.accounts.values_mut().find(|a| a.label == label) {
            acct.credential_ref = credential_ref.to_string();
            acct.updated_at = now;
            return Ok(acct.clone());
        }
        inner.next_account_id += 1;
        let id = inner.next_account_id;
        let acct = Account {
            id,
            label: label.to_string(),
            credential_ref: credential_ref.to_string(),
            is_active: true,
            health: AccountHealth::Active,
            cooldown_until: None,
            consecutive_failures: 0,
            last_failure_at: None,
            last_used_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        inner.accounts.insert(id, acct.clone());
        Ok(acct)
    }

    async fn list(&self) -> Result<Vec<Account>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.accounts.values().cloned().collect())
    }

    async fn list_ready(&self, now: DateTime<Utc>) -> Result<Vec<Account>, StoreError> {
        let inner = self.inner.read().await;
        let mut ready: Vec<Account> = inner
            .accounts
            .values()
            .filter(|a| a.is_ready(now))
            .cloned()
            .collect();
        // None sorts before Some, matching NULLS FIRST.
        ready.sort_by_key(|a| (a.last_used_at, a.id));
        Ok(ready)
    }

    async fn mark_used(&self, id: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(acct) = inner.accounts.get_mut(&id) {
            acct.last_used_at = Some(now);
            acct.last_error = None;
            acct.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_cooldown(&self, id: i64, until: DateTime<Utc>, reason: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(acct) = inner.accounts.get_mut(&id) {
            acct.health = AccountHealth::Cooldown;
            acct.cooldown_until = Some(until);
            acct.consecutive_failures = 0;
            acct.last_error = Some(reason.to_string());
            acct.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn quarantine(&self, id: i64, reason: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(acct) = inner.accounts.get_mut(&id) {
            acct.health = AccountHealth::Quarantined;
            acct.is_active = false;
            acct.cooldown_until = None;
            acct.last_error = Some(reason.to_string());
            acct.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_transient_failure(
        &self,
        id: i64,
        now: DateTime<Utc>,
        window: chrono::Duration,
        reason: &str,
    ) -> Result<i32, StoreError> {
        let mut inner = self.inner.write().await;
        let acct = inner
            .accounts
            .get_mut(&id)
            .ok_or(StoreError::NotFound("account", id))?;
        let window_start = now - window;
        acct.consecutive_failures = match acct.last_failure_at {
            Some(at) if at >= window_start => acct.consecutive_failures + 1,
            _ => 1,
        };
        acct.last_failure_at = Some(now);
        acct.last_error = Some(reason.to_string());
        acct.updated_at = Utc::now();
        Ok(acct.consecutive_failures)
    }

    async fn revive_cooled(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let mut revived = 0u64;
        for acct in inner.accounts.values_mut() {
            if acct.health == AccountHealth::Cooldown
                && acct.cooldown_until.is_some_and(|t| t <= now)
            {
                acct.health = AccountHealth::Active;
                acct.cooldown_until = None;
                acct.updated_at = Utc::now();
                revived += 1;
            }
        }
        Ok(revived)
    }

    async fn health_counts(&self) -> Result<HealthCounts, StoreError> {
        let inner = self.inner.read().await;
        let mut counts = HealthCounts::default();
        for acct in inner.accounts.values() {
            match acct.health {
                AccountHealth::Active if acct.is_active => counts.active += 1,
                AccountHealth::Active => {}
                AccountHealth::Cooldown => counts.cooldown += 1,
                AccountHealth::Quarantined => counts.quarantined += 1,
            }
        }
        Ok(counts)
    }
}

// ── Channels ─────────────────────────────────────────────────────

#[async_trait]
impl ChannelStore for MemStore {
    async fn upsert(&self, up: ChannelUpsert) -> Result<Channel, StoreError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let identifier = normalize_identifier(up.kind, &up.identifier);
        if let Some(ch) = inner
            .channels
            .values_mut()
            .find(|c| c.kind == up.kind && c.identifier == identifier)
        {
            if up.title.is_some() {
                ch.title = up.title.clone();
            }
            ch.backfill_days = up.backfill_days;
            ch.is_active = up.is_active;
            ch.updated_at = now;
            return Ok(ch.clone());
        }
        inner.next_channel_id += 1;
        let id = inner.next_channel_id;
        let ch = Channel {
            id,
            kind: up.kind,
            identifier,
            title: up.title,
            state: ChannelState::Active,
            is_active: up.is_active,
            backfill_days: up.backfill_days,
            last_synced_at: None,
            last_checked_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        inner.channels.insert(id, ch.clone());
        Ok(ch)
    }

    async fn get(&self, id: i64) -> Result<Option<Channel>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.channels.get(&id).cloned())
    }

    async fn find(
        &self,
        kind: Option<ChannelKind>,
        identifier: &str,
    ) -> Result<Option<Channel>, StoreError> {
        let inner = self.inner.read().await;
        let found = inner
            .channels
            .values()
            .find(|c| {
                kind.map_or(true, |k| c.kind == k)
                    && c.identifier == normalize_identifier(c.kind, identifier)
            })
            .cloned();
        Ok(found)
    }

    async fn list(&self, filter: &ChannelFilter) -> Result<Page<Channel>, StoreError> {
        let inner = self.inner.read().await;
        let needle = filter.q.as_ref().map(|q| q.to_lowercase());
        let items: Vec<Channel> = inner
            .channels
            .values()
            .filter(|c| filter.is_active.map_or(true, |a| c.is_active == a))
            .filter(|c| filter.kind.map_or(true, |k| c.kind == k))
            .filter(|c| {
                needle.as_ref().map_or(true, |n| {
                    c.identifier.to_lowercase().contains(n)
                        || c.title.as_ref().is_some_and(|t| t.to_lowercase().contains(n))
                })
            })
            .cloned()
            .collect();
        Ok(page_slice(items, filter.limit, filter.offset))
    }

    async fn list_eligible(&self, limit: i64) -> Result<Vec<Channel>, StoreError> {
        let inner = self.inner.read().await;
        let mut eligible: Vec<Channel> = inner
            .channels
            .values()
            .filter(|c| c.is_eligible())
            .cloned()
            .collect();
        eligible.sort_by_key(|c| (c.last_synced_at, c.id));
        eligible.truncate(limit.max(0) as usize);
        Ok(eligible)
    }

    async fn advance_cursor(
        &self,
        id: i64,
        candidate: DateTime<Utc>,
    ) -> Result<CursorAdvance, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(ch) = inner.channels.get_mut(&id) {
            if ch.last_synced_at.map_or(true, |cur| cur < candidate) {
                ch.last_synced_at = Some(candidate);
                ch.updated_at = Utc::now();
                return Ok(CursorAdvance::Applied);
            }
        }
        Ok(CursorAdvance::Ignored)
    }

    async fn set_state(&self, id: i64, state: ChannelState, reason: Option<&str>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let ch = inner
            .channels
            .get_mut(&id)
            .ok_or(StoreError::NotFound("channel", id))?;
        ch.state = state;
        if let Some(reason) = reason {
            ch.last_error = Some(reason.to_string());
        }
        ch.updated_at = Utc::now();
        Ok(())
    }

    async fn record_check(&self, id: i64, now: DateTime<Utc>, error: Option<&str>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(ch) = inner.channels.get_mut(&id) {
            ch.last_checked_at = Some(now);
            ch.last_error = error.map(str::to_string);
            ch.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_title(&self, id: i64, title: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(ch) = inner.channels.get_mut(&id) {
            ch.title = Some(title.to_string());
            ch.updated_at = Utc::now();
        }
        Ok(())
    }
}

// ── Posts ────────────────────────────────────────────────────────

#[async_trait]
impl PostStore for MemStore {
    async fn insert_batch(&self, channel_id: i64, posts: &[NewPost]) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let mut inserted = 0u64;
        for post in posts {
            if !inner.post_keys.insert((channel_id, post.external_message_id)) {
                continue;
            }
            inner.next_post_id += 1;
            let id = inner.next_post_id;
            inner.posts.push(Post {
                id,
                channel_id,
                external_message_id: post.external_message_id,
                source_url: post.source_url.clone(),
                published_at: post.published_at,
                text: post.text.clone(),
                raw_payload: post.raw_payload.clone(),
                created_at: now,
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn list(&self, filter: &PostFilter) -> Result<Page<Post>, StoreError> {
        let inner = self.inner.read().await;
        let mut items: Vec<Post> = inner
            .posts
            .iter()
            .filter(|p| p.channel_id == filter.channel_id)
            .filter(|p| filter.date_from.map_or(true, |from| p.published_at >= from))
            .filter(|p| filter.date_to.map_or(true, |to| p.published_at <= to))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.published_at.cmp(&a.published_at).then(b.id.cmp(&a.id)));
        Ok(page_slice(items, filter.limit, filter.offset))
    }
}

// ── Tick runs ────────────────────────────────────────────────────

#[async_trait]
impl TickRunStore for MemStore {
    async fn begin(&self, trigger: TickTrigger, now: DateTime<Utc>) -> Result<i64, StoreError> {
        let mut inner = self.inner.write().await;
        inner.next_tick_id += 1;
        let id = inner.next_tick_id;
        inner.ticks.insert(
            id,
            TickRun {
                id,
                trigger_type: trigger.as_str().to_string(),
                status: TickStatus::Running,
                started_at: now,
                ended_at: None,
                channels_total: 0,
                channels_checked: 0,
                posts_inserted: 0,
                accounts_active: 0,
                accounts_cooldown: 0,
                accounts_quarantined: 0,
                channel_errors: serde_json::json!([]),
            },
        );
        Ok(id)
    }

    async fn finalize(
        &self,
        id: i64,
        status: TickStatus,
        now: DateTime<Utc>,
        summary: &TickSummary,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(run) = inner.ticks.get_mut(&id) {
            run.status = status;
            run.ended_at = Some(now);
            run.channels_total = summary.channels_total;
            run.channels_checked = summary.channels_checked;
            run.posts_inserted = summary.posts_inserted;
            run.accounts_active = summary.accounts.active;
            run.accounts_cooldown = summary.accounts.cooldown;
            run.accounts_quarantined = summary.accounts.quarantined;
            run.channel_errors = serde_json::to_value(&summary.channel_failures)
                .map_err(|e| StoreError::Other(format!("channel_errors encode: {e}")))?;
        }
        Ok(())
    }

    async fn record_skipped(&self, trigger: TickTrigger, now: DateTime<Utc>) -> Result<i64, StoreError> {
        let mut inner = self.inner.write().await;
        inner.next_tick_id += 1;
        let id = inner.next_tick_id;
        inner.ticks.insert(
            id,
            TickRun {
                id,
                trigger_type: trigger.as_str().to_string(),
                status: TickStatus::Skipped,
                started_at: now,
                ended_at: Some(now),
                channels_total: 0,
                channels_checked: 0,
                posts_inserted: 0,
                accounts_active: 0,
                accounts_cooldown: 0,
                accounts_quarantined: 0,
                channel_errors: serde_json::json!([]),
            },
        );
        Ok(id)
    }

    async fn recent(&self, limit: i64) -> Result<Vec<TickRun>, StoreError> {
        let inner = self.inner.read().await;
        let mut runs: Vec<TickRun> = inner.ticks.values().cloned().collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        runs.truncate(limit.max(0) as usize);
        Ok(runs)
    }

    async fn latest(&self) -> Result<Option<TickRun>, StoreError> {
        Ok(self.recent(1).await?.pop())
    }
}
