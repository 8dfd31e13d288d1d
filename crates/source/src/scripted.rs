//! Fixture-driven replay source.
//!
//! Serves channel history from an in-memory script, optionally loaded from
//! a JSON file. Failure injection is queue-based: each channel carries an
//! ordered list of failures consumed front-first, each optionally pinned
//! to one account or to a page position mid-walk, which is enough to
//! replay every provider behavior the scheduler has to handle.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::traits::{MessageSource, SourceSession};
use crate::types::{ChannelTarget, FetchWindow, HistoryPage, SourceCredential, SourceMessage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedFailure {
    /// Restrict to one account label; matches any account when unset.
    #[serde(default)]
    pub account: Option<String>,
    /// Fire on this 0-based page of a session's walk; unset fires on
    /// the first page.
    #[serde(default)]
    pub at_page: Option<u32>,
    #[serde(flatten)]
    pub error: SourceError,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelScript {
    #[serde(default)]
    pub title: Option<String>,
    /// Full channel history; served sorted by provider id.
    #[serde(default)]
    pub messages: Vec<SourceMessage>,
    /// Consumed front-first. A front entry pinned to a different account
    /// or a later page lets the current call through untouched.
    #[serde(default)]
    pub failures: Vec<ScriptedFailure>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub channels: HashMap<String, ChannelScript>,
    /// Connect-time failures per account label, consumed front-first.
    #[serde(default)]
    pub connect_failures: HashMap<String, Vec<SourceError>>,
}

impl Script {
    pub fn load(path: &Path) -> io::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[derive(Default)]
pub struct ScriptedSource {
    state: Arc<Mutex<Script>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: Script) -> Self {
        Self { state: Arc::new(Mutex::new(script)) }
    }

    pub fn from_file(path: &Path) -> io::Result<Self> {
        Ok(Self::with_script(Script::load(path)?))
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push_messages(&self, channel: &str, messages: Vec<SourceMessage>) {
        let mut state = self.lock();
        state
            .channels
            .entry(channel.to_string())
            .or_default()
            .messages
            .extend(messages);
    }

    pub fn set_title(&self, channel: &str, title: &str) {
        let mut state = self.lock();
        state.channels.entry(channel.to_string()).or_default().title = Some(title.to_string());
    }

    pub fn push_failure(&self, channel: &str, account: Option<&str>, error: SourceError) {
        self.push_failure_at(channel, account, None, error);
    }

    /// Queue a failure that fires on a specific page of a walk, letting
    /// earlier pages through first.
    pub fn push_failure_at(
        &self,
        channel: &str,
        account: Option<&str>,
        at_page: Option<u32>,
        error: SourceError,
    ) {
        let mut state = self.lock();
        state
            .channels
            .entry(channel.to_string())
            .or_default()
            .failures
            .push(ScriptedFailure { account: account.map(str::to_string), at_page, error });
    }

    pub fn push_connect_failure(&self, account: &str, error: SourceError) {
        let mut state = self.lock();
        state
            .connect_failures
            .entry(account.to_string())
            .or_default()
            .push(error);
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn connect(&self, credential: &SourceCredential) -> Result<Box<dyn SourceSession>, SourceError> {
        {
            let mut state = self.lock();
            if let Some(queue) = state.connect_failures.get_mut(&credential.account_label) {
                if !queue.is_empty() {
                    return Err(queue.remove(0));
                }
            }
        }
        Ok(Box::new(ScriptedSession {
            account_label: credential.account_label.clone(),
            state: self.state.clone(),
            pages_served: Mutex::new(HashMap::new()),
        }))
    }
}

#[derive(Debug)]
struct ScriptedSession {
    account_label: String,
    state: Arc<Mutex<Script>>,
    /// Pages this session has served per channel, for positioned failures.
    pages_served: Mutex<HashMap<String, u32>>,
}

#[async_trait]
impl SourceSession for ScriptedSession {
    async fn fetch_history(
        &self,
        target: &ChannelTarget,
        window: &FetchWindow,
        after_id: Option<i64>,
        page_size: u32,
    ) -> Result<HistoryPage, SourceError> {
        let page_index = {
            let counters = self.pages_served.lock().unwrap_or_else(|e| e.into_inner());
            counters.get(&target.identifier).copied().unwrap_or(0)
        };

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(script) = state.channels.get_mut(&target.identifier) else {
            // Unknown channel: nothing scripted, nothing to serve.
            return Ok(HistoryPage::default());
        };

        if let Some(front) = script.failures.first() {
            let account_matches =
                front.account.as_deref().map_or(true, |a| a == self.account_label);
            let page_matches = front.at_page.map_or(true, |p| page_index >= p);
            if account_matches && page_matches {
                let failure = script.failures.remove(0);
                return Err(failure.error);
            }
        }

        let mut matching: Vec<SourceMessage> = script
            .messages
            .iter()
            .filter(|m| m.published_at >= window.since && m.published_at <= window.until)
            .filter(|m| after_id.map_or(true, |a| m.id > a))
            .cloned()
            .collect();
        matching.sort_by_key(|m| m.id);

        let more = matching.len() > page_size as usize;
        matching.truncate(page_size as usize);
        let next_after = if more { matching.last().map(|m| m.id) } else { None };
        let title = script.title.clone();
        drop(state);

        let mut counters = self.pages_served.lock().unwrap_or_else(|e| e.into_inner());
        *counters.entry(target.identifier.clone()).or_insert(0) += 1;

        Ok(HistoryPage {
            messages: matching,
            title,
            next_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TargetKind;
    use chrono::{Duration, Utc};

    fn message(id: i64, at: chrono::DateTime<Utc>) -> SourceMessage {
        SourceMessage { id, published_at: at, text: format!("msg {id}"), raw: None }
    }

    fn target(identifier: &str) -> ChannelTarget {
        ChannelTarget { kind: TargetKind::Public, identifier: identifier.into() }
    }

    fn credential(label: &str) -> SourceCredential {
        SourceCredential { account_label: label.into(), credential_ref: "ref".into() }
    }

    #[tokio::test]
    async fn pages_in_id_order_until_exhausted() {
        let now = Utc::now();
        let source = ScriptedSource::new();
        source.push_messages("feed", (1..=5).map(|i| message(i, now)).collect());

        let session = source.connect(&credential("a")).await.unwrap();
        let window = FetchWindow { since: now - Duration::hours(1), until: now + Duration::hours(1) };

        let p1 = session.fetch_history(&target("feed"), &window, None, 2).await.unwrap();
        assert_eq!(p1.messages.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(p1.next_after, Some(2));

        let p2 = session.fetch_history(&target("feed"), &window, p1.next_after, 2).await.unwrap();
        assert_eq!(p2.messages.iter().map(|m| m.id).collect::<Vec<_>>(), vec![3, 4]);

        let p3 = session.fetch_history(&target("feed"), &window, p2.next_after, 2).await.unwrap();
        assert_eq!(p3.messages.iter().map(|m| m.id).collect::<Vec<_>>(), vec![5]);
        assert_eq!(p3.next_after, None);
    }

    #[tokio::test]
    async fn queued_failure_fires_once_then_messages_flow() {
        let now = Utc::now();
        let source = ScriptedSource::new();
        source.push_messages("feed", vec![message(1, now)]);
        source.push_failure("feed", None, SourceError::RateLimited { retry_after_secs: 60 });

        let session = source.connect(&credential("a")).await.unwrap();
        let window = FetchWindow { since: now - Duration::hours(1), until: now + Duration::hours(1) };

        let err = session.fetch_history(&target("feed"), &window, None, 10).await.unwrap_err();
        assert_eq!(err, SourceError::RateLimited { retry_after_secs: 60 });

        let page = session.fetch_history(&target("feed"), &window, None, 10).await.unwrap();
        assert_eq!(page.messages.len(), 1);
    }

    #[tokio::test]
    async fn positioned_failure_lets_earlier_pages_through() {
        let now = Utc::now();
        let source = ScriptedSource::new();
        source.push_messages("feed", (1..=6).map(|i| message(i, now)).collect());
        source.push_failure_at("feed", None, Some(1), SourceError::network("reset"));

        let session = source.connect(&credential("a")).await.unwrap();
        let window = FetchWindow { since: now - Duration::hours(1), until: now + Duration::hours(1) };

        let p1 = session.fetch_history(&target("feed"), &window, None, 2).await.unwrap();
        assert_eq!(p1.messages.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 2]);

        let err = session
            .fetch_history(&target("feed"), &window, p1.next_after, 2)
            .await
            .unwrap_err();
        assert_eq!(err, SourceError::network("reset"));
    }

    #[tokio::test]
    async fn account_pinned_failure_lets_other_accounts_through() {
        let now = Utc::now();
        let source = ScriptedSource::new();
        source.push_messages("feed", vec![message(1, now)]);
        source.push_failure("feed", Some("banned"), SourceError::AuthExpired);

        let window = FetchWindow { since: now - Duration::hours(1), until: now + Duration::hours(1) };
        let other = source.connect(&credential("fine")).await.unwrap();
        let page = other.fetch_history(&target("feed"), &window, None, 10).await.unwrap();
        assert_eq!(page.messages.len(), 1);

        let pinned = source.connect(&credential("banned")).await.unwrap();
        let err = pinned.fetch_history(&target("feed"), &window, None, 10).await.unwrap_err();
        assert_eq!(err, SourceError::AuthExpired);
    }

    #[tokio::test]
    async fn window_bounds_are_inclusive() {
        let now = Utc::now();
        let source = ScriptedSource::new();
        source.push_messages(
            "feed",
            vec![
                message(1, now - Duration::days(3)),
                message(2, now - Duration::days(1)),
                message(3, now),
            ],
        );

        let session = source.connect(&credential("a")).await.unwrap();
        let window = FetchWindow { since: now - Duration::days(1), until: now };
        let page = session.fetch_history(&target("feed"), &window, None, 10).await.unwrap();
        assert_eq!(page.messages.iter().map(|m| m.id).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[tokio::test]
    async fn connect_failures_consumed_in_order() {
        let source = ScriptedSource::new();
        source.push_connect_failure("a", SourceError::network("dns"));
        source.push_connect_failure("a", SourceError::AuthExpired);

        assert_eq!(source.connect(&credential("a")).await.unwrap_err(), SourceError::network("dns"));
        assert_eq!(source.connect(&credential("a")).await.unwrap_err(), SourceError::AuthExpired);
        assert!(source.connect(&credential("a")).await.is_ok());
    }

    #[test]
    fn script_loads_from_json_file() {
        let now = Utc::now();
        let mut script = Script::default();
        script.channels.insert(
            "feed".into(),
            ChannelScript {
                title: Some("Feed".into()),
                messages: vec![message(1, now)],
                failures: vec![ScriptedFailure {
                    account: None,
                    at_page: None,
                    error: SourceError::RateLimited { retry_after_secs: 30 },
                }],
            },
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.json");
        std::fs::write(&path, serde_json::to_string_pretty(&script).unwrap()).unwrap();

        let loaded = Script::load(&path).unwrap();
        let channel = &loaded.channels["feed"];
        assert_eq!(channel.title.as_deref(), Some("Feed"));
        assert_eq!(channel.messages.len(), 1);
        assert_eq!(
            channel.failures[0].error,
            SourceError::RateLimited { retry_after_secs: 30 }
        );
    }
}
