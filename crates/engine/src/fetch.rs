//! Windowed history fetching.
//!
//! One fetch walks a channel's history window page by page through a
//! source session. The report keeps everything retrieved before any
//! failure, so partial progress is never thrown away.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use depesche_source::{
    ChannelTarget, FetchWindow, MessageSource, SourceCredential, SourceError, SourceMessage,
    TargetKind,
};
use depesche_store::models::{Account, Channel, ChannelKind};

/// How a fetch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The window was drained.
    Complete,
    /// The page cap was hit with more history pending; the cursor
    /// still advances, so the next cycle resumes behind it.
    Truncated,
    /// A classified failure stopped the walk.
    Failed(SourceError),
}

/// Everything one fetch attempt produced.
#[derive(Debug)]
pub struct FetchReport {
    pub window: FetchWindow,
    pub messages: Vec<SourceMessage>,
    /// Channel title as reported by the provider, when it sent one.
    pub title: Option<String>,
    /// Newest `published_at` among the retrieved messages.
    pub watermark: Option<DateTime<Utc>>,
    pub pages: u32,
    pub outcome: FetchOutcome,
}

pub struct FetchEngine {
    source: Arc<dyn MessageSource>,
    page_size: u32,
    page_cap: u32,
}

impl FetchEngine {
    pub fn new(source: Arc<dyn MessageSource>, page_size: u32, page_cap: u32) -> Self {
        Self {
            source,
            page_size,
            page_cap,
        }
    }

    /// Fetch a channel's window through the given account.
    ///
    /// Never returns an error: failures land in the report outcome
    /// together with whatever was retrieved before them.
    pub async fn fetch(&self, account: &Account, channel: &Channel, now: DateTime<Utc>) -> FetchReport {
        let window = window_for(channel, now);
        let credential = SourceCredential {
            account_label: account.label.clone(),
            credential_ref: account.credential_ref.clone(),
        };
        let target = target_for(channel);

        let mut report = FetchReport {
            window,
            messages: Vec::new(),
            title: None,
            watermark: None,
            pages: 0,
            outcome: FetchOutcome::Complete,
        };

        let session = match self.source.connect(&credential).await {
            Ok(s) => s,
            Err(e) => {
                report.outcome = FetchOutcome::Failed(e);
                return report;
            }
        };

        let mut after_id: Option<i64> = None;
        report.outcome = loop {
            if report.pages >= self.page_cap {
                break FetchOutcome::Truncated;
            }
            match session
                .fetch_history(&target, &window, after_id, self.page_size)
                .await
            {
                Ok(page) => {
                    report.pages += 1;
                    if page.title.is_some() {
                        report.title = page.title;
                    }
                    report.messages.extend(page.messages);
                    match page.next_after {
                        Some(next) => after_id = Some(next),
                        None => break FetchOutcome::Complete,
                    }
                }
                Err(e) => break FetchOutcome::Failed(e),
            }
        };

        report.watermark = report.messages.iter().map(|m| m.published_at).max();
        debug!(
            channel = %channel.identifier,
            account = %account.label,
            messages = report.messages.len(),
            pages = report.pages,
            outcome = ?report.outcome,
            "fetch finished"
        );
        report
    }
}

/// Compute the history window for a channel at `now`.
///
/// The cursor resumes where the last cycle stopped; the backfill span
/// bounds how far back a fresh or long-stalled channel reaches. A
/// backfill of zero means forward-only: no history on first contact,
/// then plain cursor-to-now increments.
pub fn window_for(channel: &Channel, now: DateTime<Utc>) -> FetchWindow {
    let horizon = now - chrono::Duration::days(channel.backfill_days.max(0) as i64);
    let since = match (channel.last_synced_at, channel.backfill_days > 0) {
        (Some(cursor), true) => cursor.max(horizon),
        (Some(cursor), false) => cursor,
        (None, _) => horizon,
    };
    FetchWindow { since, until: now }
}

fn target_for(channel: &Channel) -> ChannelTarget {
    let kind = match channel.kind {
        ChannelKind::Public => TargetKind::Public,
        ChannelKind::Private => TargetKind::Private,
    };
    ChannelTarget {
        kind,
        identifier: channel.identifier.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depesche_source::ScriptedSource;
    use depesche_store::models::{ChannelState, ChannelUpsert};
    use depesche_store::traits::{AccountStore, ChannelStore, Stores};

    fn channel(backfill_days: i32, cursor: Option<DateTime<Utc>>) -> Channel {
        let now = Utc::now();
        Channel {
            id: 1,
            kind: ChannelKind::Public,
            identifier: "newsfeed".into(),
            title: None,
            state: ChannelState::Active,
            is_active: true,
            backfill_days,
            last_synced_at: cursor,
            last_checked_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn msg(id: i64, published_at: DateTime<Utc>) -> SourceMessage {
        SourceMessage {
            id,
            published_at,
            text: format!("message {id}"),
            raw: None,
        }
    }

    #[test]
    fn fresh_channel_gets_the_backfill_span() {
        let now = Utc::now();
        let w = window_for(&channel(7, None), now);
        assert_eq!(w.since, now - chrono::Duration::days(7));
        assert_eq!(w.until, now);
    }

    #[test]
    fn cursor_resumes_and_backfill_clamps_stale_cursors() {
        let now = Utc::now();
        let recent = now - chrono::Duration::days(1);
        assert_eq!(window_for(&channel(7, Some(recent)), now).since, recent);

        let ancient = now - chrono::Duration::days(400);
        assert_eq!(
            window_for(&channel(7, Some(ancient)), now).since,
            now - chrono::Duration::days(7)
        );
    }

    #[test]
    fn zero_backfill_is_forward_only() {
        let now = Utc::now();
        assert_eq!(window_for(&channel(0, None), now).since, now);

        let cursor = now - chrono::Duration::hours(3);
        assert_eq!(window_for(&channel(0, Some(cursor)), now).since, cursor);
    }

    async fn fixture() -> (Account, Channel) {
        let stores = Stores::memory();
        let account = stores.accounts.upsert("acct", "cred").await.unwrap();
        let channel = stores
            .channels
            .upsert(ChannelUpsert {
                kind: ChannelKind::Public,
                identifier: "newsfeed".into(),
                title: None,
                backfill_days: 7,
                is_active: true,
            })
            .await
            .unwrap();
        (account, channel)
    }

    #[tokio::test]
    async fn walks_every_page_until_complete() {
        let source = ScriptedSource::new();
        let now = Utc::now();
        source.push_messages(
            "newsfeed",
            (1..=5)
                .map(|i| msg(i, now - chrono::Duration::minutes(10 - i)))
                .collect(),
        );
        let (account, channel) = fixture().await;

        let engine = FetchEngine::new(Arc::new(source), 2, 10);
        let report = engine.fetch(&account, &channel, now).await;

        assert_eq!(report.outcome, FetchOutcome::Complete);
        assert_eq!(report.messages.len(), 5);
        assert_eq!(report.pages, 3);
        assert_eq!(
            report.watermark,
            Some(now - chrono::Duration::minutes(5))
        );
    }

    #[tokio::test]
    async fn page_cap_truncates_with_progress_kept() {
        let source = ScriptedSource::new();
        let now = Utc::now();
        source.push_messages(
            "newsfeed",
            (1..=10)
                .map(|i| msg(i, now - chrono::Duration::minutes(20 - i)))
                .collect(),
        );
        let (account, channel) = fixture().await;

        let engine = FetchEngine::new(Arc::new(source), 2, 2);
        let report = engine.fetch(&account, &channel, now).await;

        assert_eq!(report.outcome, FetchOutcome::Truncated);
        assert_eq!(report.messages.len(), 4);
        assert_eq!(report.pages, 2);
    }

    #[tokio::test]
    async fn failure_mid_walk_keeps_earlier_pages() {
        let source = ScriptedSource::new();
        let now = Utc::now();
        source.push_messages(
            "newsfeed",
            (1..=6)
                .map(|i| msg(i, now - chrono::Duration::minutes(10 - i)))
                .collect(),
        );
        // First page succeeds, the second one blows up.
        source.push_failure_at("newsfeed", None, Some(1), SourceError::network("timed out"));
        let (account, channel) = fixture().await;

        let engine = FetchEngine::new(Arc::new(source), 2, 10);
        let report = engine.fetch(&account, &channel, now).await;

        match report.outcome {
            FetchOutcome::Failed(SourceError::NetworkTransient { .. }) => {}
            other => panic!("expected network failure, got {other:?}"),
        }
        assert_eq!(report.messages.len(), 2);
        assert_eq!(report.pages, 1);
        assert_eq!(
            report.watermark,
            Some(now - chrono::Duration::minutes(8))
        );
    }
}
