//! Row types and small value objects shared by both store backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Enums (mirrored as Postgres enum types) ──────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_health", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountHealth {
    Active,
    Cooldown,
    Quarantined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "channel_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "channel_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    PendingApproval,
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "tick_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TickStatus {
    Running,
    Ok,
    Failed,
    Aborted,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickTrigger {
    Scheduled,
    Manual,
}

impl TickTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickTrigger::Scheduled => "scheduled",
            TickTrigger::Manual => "manual",
        }
    }
}

// ── Rows ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub label: String,
    /// Opaque reference into the credential vault; never the secret itself.
    pub credential_ref: String,
    pub is_active: bool,
    pub health: AccountHealth,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub consecutive_failures: i32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Whether this account may serve a fetch at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active || self.credential_ref.is_empty() {
            return false;
        }
        match self.health {
            AccountHealth::Active => true,
            AccountHealth::Cooldown => self.cooldown_until.is_some_and(|t| t <= now),
            AccountHealth::Quarantined => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Channel {
    pub id: i64,
    pub kind: ChannelKind,
    pub identifier: String,
    pub title: Option<String>,
    pub state: ChannelState,
    pub is_active: bool,
    pub backfill_days: i32,
    /// Progress cursor: max published_at ever persisted for this channel.
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Channel {
    pub fn is_eligible(&self) -> bool {
        self.is_active && self.state == ChannelState::Active
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub channel_id: i64,
    pub external_message_id: i64,
    pub source_url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub text: String,
    pub raw_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TickRun {
    pub id: i64,
    pub trigger_type: String,
    pub status: TickStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub channels_total: i32,
    pub channels_checked: i32,
    pub posts_inserted: i64,
    pub accounts_active: i32,
    pub accounts_cooldown: i32,
    pub accounts_quarantined: i32,
    pub channel_errors: serde_json::Value,
}

// ── Write payloads ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NewPost {
    pub external_message_id: i64,
    pub source_url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub text: String,
    pub raw_payload: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

/// Idempotent channel registration; keyed by (kind, identifier).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelUpsert {
    #[serde(alias = "type")]
    pub kind: ChannelKind,
    pub identifier: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub backfill_days: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Public identifiers are stored lowercase without the leading '@';
/// private invite hashes are kept verbatim.
pub fn normalize_identifier(kind: ChannelKind, raw: &str) -> String {
    let trimmed = raw.trim();
    match kind {
        ChannelKind::Public => trimmed.trim_start_matches('@').to_lowercase(),
        ChannelKind::Private => trimmed.to_string(),
    }
}

// ── Aggregates ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorAdvance {
    Applied,
    /// Candidate was not newer than the stored cursor.
    Ignored,
}

#[derive(Debug, Clone, Copy, Default, Serialize, sqlx::FromRow)]
pub struct HealthCounts {
    /// Usable accounts only (healthy and not operator-disabled).
    pub active: i32,
    pub cooldown: i32,
    pub quarantined: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelFailure {
    pub channel_id: i64,
    pub identifier: String,
    pub error: String,
}

/// Everything a finished cycle writes into its audit record.
#[derive(Debug, Clone, Default)]
pub struct TickSummary {
    pub channels_total: i32,
    pub channels_checked: i32,
    pub posts_inserted: i64,
    pub accounts: HealthCounts,
    pub channel_failures: Vec<ChannelFailure>,
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub total: i64,
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelFilter {
    pub is_active: Option<bool>,
    pub kind: Option<ChannelKind>,
    /// Case-insensitive substring over identifier and title.
    pub q: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone)]
pub struct PostFilter {
    pub channel_id: i64,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_at_and_lowercases_public() {
        assert_eq!(normalize_identifier(ChannelKind::Public, " @NewsFeed "), "newsfeed");
        assert_eq!(normalize_identifier(ChannelKind::Private, " AbC123 "), "AbC123");
    }

    #[test]
    fn channel_upsert_parses_seed_file_entries() {
        let raw = r#"[
            {"type": "public", "identifier": "@NewsFeed", "backfill_days": 7},
            {"kind": "private", "identifier": "AbC123", "title": "Invite", "is_active": false}
        ]"#;
        let entries: Vec<ChannelUpsert> = serde_json::from_str(raw).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, ChannelKind::Public);
        assert_eq!(entries[0].backfill_days, 7);
        assert!(entries[0].is_active);
        assert_eq!(entries[0].title, None);
        assert_eq!(entries[1].kind, ChannelKind::Private);
        assert_eq!(entries[1].backfill_days, 0);
        assert!(!entries[1].is_active);
    }

    #[test]
    fn ready_respects_cooldown_and_quarantine() {
        let now = Utc::now();
        let mut acct = Account {
            id: 1,
            label: "a".into(),
            credential_ref: "ref".into(),
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
        assert!(acct.is_ready(now));

        acct.health = AccountHealth::Cooldown;
        acct.cooldown_until = Some(now + chrono::Duration::seconds(60));
        assert!(!acct.is_ready(now));
        assert!(acct.is_ready(now + chrono::Duration::seconds(61)));

        acct.health = AccountHealth::Quarantined;
        assert!(!acct.is_ready(now + chrono::Duration::days(365)));

        acct.health = AccountHealth::Active;
        acct.credential_ref.clear();
        assert!(!acct.is_ready(now));
    }
}
