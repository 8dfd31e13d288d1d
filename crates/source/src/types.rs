use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque credential handle for one client account. The backend resolves
/// `credential_ref` to real session material; it never passes through here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCredential {
    pub account_label: String,
    pub credential_ref: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Public,
    Private,
}

/// Channel to fetch: public channels resolve by handle, private ones by
/// invite hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelTarget {
    pub kind: TargetKind,
    pub identifier: String,
}

/// Bounded fetch window, both ends inclusive. The boundary overlap with a
/// previous cycle is absorbed by idempotent persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

/// One text message as the provider reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMessage {
    /// Provider message id, unique and increasing within a channel.
    pub id: i64,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub text: String,
    /// Provider payload kept verbatim for later reprocessing.
    #[serde(default)]
    pub raw: Option<serde_json::Value>,
}

/// One page of history, oldest first.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub messages: Vec<SourceMessage>,
    /// Channel title as the source knows it, when it learned one.
    pub title: Option<String>,
    /// Resume after this message id; `None` when the window is exhausted.
    pub next_after: Option<i64>,
}
