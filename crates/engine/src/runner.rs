//! Background scheduler loop.
//!
//! Ticks fire on a fixed interval; a [`TriggerHandle`] lets the API
//! request one out of band. Manual requests are coalesced: while one
//! is pending, further requests are rejected instead of queued up.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info};

use depesche_store::models::{TickStatus, TickTrigger};

use crate::tick::TickScheduler;

/// Requests an out-of-band tick from the running loop.
#[derive(Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<()>,
}

impl TriggerHandle {
    /// Queue a manual tick. Returns `false` when one is already pending.
    pub fn trigger(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

/// Start the tick loop. The first tick runs immediately.
///
/// The loop stops when every [`TriggerHandle`] clone is dropped, so
/// keeping one in the application state ties the loop to the process.
pub fn spawn_scheduler_loop(
    scheduler: Arc<TickScheduler>,
    interval: Duration,
    resume_after_abort: Option<Duration>,
) -> (TriggerHandle, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<()>(1);
    let handle = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "scheduler loop started");
        let mut trigger = TickTrigger::Scheduled;
        loop {
            let status = match scheduler.run_tick(trigger).await {
                Ok(report) => Some(report.status),
                Err(e) => {
                    error!(error = %e, "tick failed");
                    None
                }
            };

            let delay = if status == Some(TickStatus::Aborted) {
                // An aborted cycle left channels unvisited; come back sooner.
                resume_after_abort.unwrap_or(interval)
            } else {
                interval
            };

            trigger = tokio::select! {
                _ = tokio::time::sleep(delay) => TickTrigger::Scheduled,
                received = rx.recv() => match received {
                    Some(()) => TickTrigger::Manual,
                    None => {
                        info!("trigger handle dropped, scheduler loop stopped");
                        break;
                    }
                },
            };
        }
    });
    (TriggerHandle { tx }, handle)
}
