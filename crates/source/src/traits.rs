use async_trait::async_trait;

use crate::error::SourceError;
use crate::types::{ChannelTarget, FetchWindow, HistoryPage, SourceCredential};

/// Backend capable of opening authenticated sessions.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn connect(&self, credential: &SourceCredential) -> Result<Box<dyn SourceSession>, SourceError>;
}

/// An authenticated session bound to one account.
#[async_trait]
pub trait SourceSession: std::fmt::Debug + Send + Sync {
    /// Fetch one page of channel history inside `window`, oldest first.
    ///
    /// `after_id` resumes a previous page (only messages with a larger
    /// provider id are returned). At most `page_size` messages come back;
    /// `HistoryPage::next_after` signals whether more remain.
    async fn fetch_history(
        &self,
        target: &ChannelTarget,
        window: &FetchWindow,
        after_id: Option<i64>,
        page_size: u32,
    ) -> Result<HistoryPage, SourceError>;
}
