//! Fans operator alerts out to configured channels.
//!
//! The dispatcher receives an alert, renders it once, and delivers it
//! to every configured channel. Individual channel failures don't
//! block other channels, and delivery failures never propagate into
//! the scheduler cycle.

use crate::alert::Alert;
use crate::traits::{DispatchResult, Notifier, NotifyError};

/// Dispatches alerts to a flat list of channels.
pub struct Dispatcher {
    channels: Vec<Box<dyn Notifier>>,
}

impl Dispatcher {
    /// Create a dispatcher over the given channels.
    pub fn with_channels(channels: Vec<Box<dyn Notifier>>) -> Self {
        Self { channels }
    }

    /// Create a dispatcher with no channels. Dispatching is a no-op.
    pub fn empty() -> Self {
        Self {
            channels: Vec::new(),
        }
    }

    /// Whether any channel is configured.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Dispatch an alert to all channels.
    ///
    /// Returns results for each channel delivery. Individual failures
    /// don't block other channels.
    pub async fn dispatch(&self, alert: &Alert) -> Vec<DispatchResult> {
        if self.channels.is_empty() {
            tracing::debug!(kind = alert.kind(), "No alert channels configured");
            return Vec::new();
        }

        let notification = alert.render();
        let mut results = Vec::with_capacity(self.channels.len());

        for channel in &self.channels {
            let start = std::time::Instant::now();
            let result = channel.send(&notification).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let (success, error) = match result {
                Ok(()) => {
                    tracing::info!(
                        kind = alert.kind(),
                        channel = channel.channel_name(),
                        duration_ms,
                        "Alert delivered"
                    );
                    (true, None)
                }
                Err(e) => {
                    tracing::warn!(
                        kind = alert.kind(),
                        channel = channel.channel_name(),
                        error = %e,
                        duration_ms,
                        "Alert delivery failed"
                    );
                    (false, Some(e.to_string()))
                }
            };

            results.push(DispatchResult {
                channel: channel.channel_name().to_string(),
                alert_kind: alert.kind().to_string(),
                success,
                error,
                duration_ms,
            });
        }

        results
    }

    /// Send a test notification through a channel by index.
    pub async fn test_notify(&self, channel_index: usize) -> Result<(), NotifyError> {
        let channel = self.channels.get(channel_index).ok_or_else(|| {
            NotifyError::Config(format!("Channel index {channel_index} out of range"))
        })?;

        channel.test().await
    }
}
