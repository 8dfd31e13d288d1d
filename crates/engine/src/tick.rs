//! The tick cycle.
//!
//! One tick: take the cross-instance lock, sweep elapsed cooldowns,
//! select the stalest eligible channels, and fetch them through a
//! bounded worker pool, rotating accounts around failures. Every
//! attempt leaves an audit record, skipped and aborted ones included.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use depesche_core::config::SchedulerConfig;
use depesche_core::Clock;
use depesche_notify::Dispatcher;
use depesche_source::{MessageSource, SourceMessage};
use depesche_store::models::{
    Channel, ChannelFailure, ChannelKind, CursorAdvance, NewPost, TickStatus, TickSummary,
    TickTrigger,
};
use depesche_store::traits::{AccountStore, ChannelStore, PostStore, Stores, TickRunStore};

use crate::error::EngineError;
use crate::fetch::{FetchEngine, FetchOutcome};
use crate::governor::{Applied, Governor};
use crate::lock::{LockToken, TickLock};
use crate::pool::AccountPool;

/// Upper bound on a single lock-backend round trip.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
/// Pause between lock attempts while a manual trigger waits its turn.
const FORCED_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// What one `run_tick` call produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub run_id: i64,
    pub status: TickStatus,
}

pub struct TickScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    stores: Stores,
    lock: Arc<dyn TickLock>,
    pool: AccountPool,
    governor: Governor,
    fetcher: FetchEngine,
    clock: Arc<dyn Clock>,
    cfg: SchedulerConfig,
    /// Effective TTL; always longer than the cycle budget.
    lock_ttl: Duration,
}

impl TickScheduler {
    pub fn new(
        stores: Stores,
        lock: Arc<dyn TickLock>,
        source: Arc<dyn MessageSource>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        cfg: SchedulerConfig,
    ) -> Self {
        let mut lock_ttl = cfg.lock_ttl();
        if cfg.lock_ttl_secs <= cfg.cycle_budget_secs {
            // A lock that expires mid-cycle would let a second instance in.
            lock_ttl = cfg.cycle_budget() + Duration::from_secs(60);
            warn!(
                configured_secs = cfg.lock_ttl_secs,
                effective_secs = lock_ttl.as_secs(),
                "lock TTL does not cover the cycle budget, extending"
            );
        }
        let pool = AccountPool::new(stores.accounts.clone());
        let governor = Governor::new(stores.clone(), dispatcher, &cfg);
        let fetcher = FetchEngine::new(source, cfg.page_size, cfg.page_cap);
        Self {
            inner: Arc::new(Inner {
                stores,
                lock,
                pool,
                governor,
                fetcher,
                clock,
                cfg,
                lock_ttl,
            }),
        }
    }

    /// Run one full cycle, or record why it didn't run.
    ///
    /// Losing the lock race records a `skipped` run and returns
    /// normally; only store faults on the audit path surface as errors.
    pub async fn run_tick(&self, trigger: TickTrigger) -> Result<TickReport, EngineError> {
        let token = match self.acquire_lock(trigger).await {
            Some(token) => token,
            None => {
                let run_id = self
                    .inner
                    .stores
                    .ticks
                    .record_skipped(trigger, self.inner.clock.now())
                    .await?;
                info!(
                    trigger = trigger.as_str(),
                    run_id, "tick skipped: lock held elsewhere"
                );
                return Ok(TickReport {
                    run_id,
                    status: TickStatus::Skipped,
                });
            }
        };

        let run_id = match self
            .inner
            .stores
            .ticks
            .begin(trigger, self.inner.clock.now())
            .await
        {
            Ok(id) => id,
            Err(e) => {
                if let Err(re) = self.inner.lock.release(token).await {
                    warn!(error = %re, "tick lock release failed");
                }
                return Err(e.into());
            }
        };
        info!(trigger = trigger.as_str(), run_id, "tick started");

        let renewer = spawn_renewer(
            Arc::clone(&self.inner.lock),
            token.clone(),
            self.inner.lock_ttl,
        );
        let (status, summary) = self.execute_cycle().await;
        renewer.abort();

        if let Err(e) = self.inner.lock.release(token).await {
            warn!(error = %e, "tick lock release failed");
        }

        self.inner
            .stores
            .ticks
            .finalize(run_id, status, self.inner.clock.now(), &summary)
            .await?;
        info!(
            run_id,
            status = ?status,
            checked = summary.channels_checked,
            posts = summary.posts_inserted,
            failures = summary.channel_failures.len(),
            "tick finished"
        );
        Ok(TickReport { run_id, status })
    }

    async fn acquire_lock(&self, trigger: TickTrigger) -> Option<LockToken> {
        match trigger {
            TickTrigger::Scheduled => self.try_acquire().await,
            // A manual trigger outwaits a cycle that is just finishing,
            // but it never steals a held lock.
            TickTrigger::Manual => {
                let deadline = Instant::now() + self.inner.cfg.forced_lock_wait();
                loop {
                    if let Some(token) = self.try_acquire().await {
                        return Some(token);
                    }
                    if Instant::now() >= deadline {
                        return None;
                    }
                    tokio::time::sleep(FORCED_RETRY_INTERVAL).await;
                }
            }
        }
    }

    async fn try_acquire(&self) -> Option<LockToken> {
        let acquire = self.inner.lock.acquire(self.inner.lock_ttl);
        match tokio::time::timeout(ACQUIRE_TIMEOUT, acquire).await {
            Ok(Ok(token)) => token,
            Ok(Err(e)) => {
                // Backend trouble counts as not acquired: skipping is
                // safe, running unlocked is not.
                warn!(error = %e, "lock acquire failed");
                None
            }
            Err(_) => {
                warn!("lock acquire timed out");
                None
            }
        }
    }

    async fn execute_cycle(&self) -> (TickStatus, TickSummary) {
        let inner = &self.inner;
        let deadline = Instant::now() + inner.cfg.cycle_budget();
        let now = inner.clock.now();

        // Accounts whose cooldown elapsed come back before selection.
        match inner.stores.accounts.revive_cooled(now).await {
            Ok(0) => {}
            Ok(n) => info!(revived = n, "cooldowns elapsed, accounts back in rotation"),
            Err(e) => warn!(error = %e, "cooldown revival sweep failed"),
        }

        let mut summary = TickSummary::default();
        if let Ok(counts) = inner.stores.accounts.health_counts().await {
            summary.accounts = counts;
        }

        let channels = match inner
            .stores
            .channels
            .list_eligible(inner.cfg.channels_per_cycle as i64)
            .await
        {
            Ok(channels) => channels,
            Err(e) => {
                error!(error = %e, "channel selection failed");
                return (TickStatus::Failed, summary);
            }
        };
        summary.channels_total = channels.len() as i32;
        if channels.is_empty() {
            debug!("no channels due this cycle");
            return (TickStatus::Ok, summary);
        }

        let semaphore = Arc::new(Semaphore::new(inner.cfg.max_concurrent_fetches.max(1) as usize));
        let mut workers = JoinSet::new();
        let mut aborted = false;

        for channel in channels {
            // A ready permit still wins a timeout_at race, so the
            // elapsed budget has to be checked on its own.
            if Instant::now() >= deadline {
                aborted = true;
                break;
            }
            let permit = match tokio::time::timeout_at(deadline, semaphore.clone().acquire_owned())
                .await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) | Err(_) => {
                    aborted = true;
                    break;
                }
            };
            let inner = Arc::clone(&self.inner);
            workers.spawn(async move {
                let _permit = permit;
                process_channel(inner, channel, deadline).await
            });
        }

        if aborted {
            info!("cycle budget exhausted, remaining channels wait for the next cycle");
        }

        // In-flight workers run to completion even on abort.
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(result) => {
                    if result.checked {
                        summary.channels_checked += 1;
                    }
                    summary.posts_inserted += result.inserted as i64;
                    if let Some(err) = result.error {
                        summary.channel_failures.push(ChannelFailure {
                            channel_id: result.channel_id,
                            identifier: result.identifier,
                            error: err,
                        });
                    }
                }
                Err(join_err) => warn!(error = %join_err, "channel worker panicked"),
            }
        }

        // Post-cycle snapshot reflects the transitions this cycle applied.
        if let Ok(counts) = inner.stores.accounts.health_counts().await {
            summary.accounts = counts;
        }

        let status = if aborted {
            TickStatus::Aborted
        } else {
            TickStatus::Ok
        };
        (status, summary)
    }
}

struct ChannelResult {
    channel_id: i64,
    identifier: String,
    /// At least one fetch was attempted.
    checked: bool,
    inserted: u64,
    /// Standing error when the channel gave up; cleared by success.
    error: Option<String>,
}

async fn process_channel(inner: Arc<Inner>, mut channel: Channel, deadline: Instant) -> ChannelResult {
    let mut result = ChannelResult {
        channel_id: channel.id,
        identifier: channel.identifier.clone(),
        checked: false,
        inserted: 0,
        error: None,
    };
    // Accounts that already failed this channel this cycle.
    let mut burned: HashSet<i64> = HashSet::new();
    let mut attempts = 0u32;

    while attempts < inner.cfg.channel_retry_budget {
        if Instant::now() >= deadline {
            debug!(channel = %channel.identifier, "cycle budget reached, deferring channel");
            break;
        }
        let now = inner.clock.now();
        let lease = match inner.pool.lease(now, &burned).await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                debug!(channel = %channel.identifier, "no account available, deferring channel");
                break;
            }
            Err(e) => {
                result.error = Some(format!("account selection failed: {e}"));
                break;
            }
        };
        attempts += 1;
        result.checked = true;
        let account_id = lease.account.id;

        let report = inner.fetcher.fetch(&lease.account, &channel, now).await;

        // Persist whatever arrived before routing any failure.
        if !report.messages.is_empty() {
            let posts = posts_from(&channel, &report.messages);
            if !posts.is_empty() {
                match inner.stores.posts.insert_batch(channel.id, &posts).await {
                    Ok(written) => {
                        result.inserted += written;
                        if written > 0 {
                            info!(
                                channel = %channel.identifier,
                                inserted = written,
                                pages = report.pages,
                                "posts persisted"
                            );
                        }
                    }
                    Err(e) => {
                        let msg = format!("persist failed: {e}");
                        let _ = inner
                            .stores
                            .channels
                            .record_check(channel.id, inner.clock.now(), Some(&msg))
                            .await;
                        result.error = Some(msg);
                        return result;
                    }
                }
            }
        }

        if let Some(title) = report.title.as_deref() {
            if channel.title.as_deref() != Some(title) {
                match inner.stores.channels.set_title(channel.id, title).await {
                    Ok(()) => channel.title = Some(title.to_string()),
                    Err(e) => warn!(channel = %channel.identifier, error = %e, "title update failed"),
                }
            }
        }

        // The cursor follows the newest retrieved timestamp; an empty
        // complete pass bootstraps a fresh channel to the window end.
        let candidate = match (report.watermark, &report.outcome) {
            (Some(watermark), _) => Some(watermark),
            (None, FetchOutcome::Complete) if channel.last_synced_at.is_none() => {
                Some(report.window.until)
            }
            _ => None,
        };
        if let Some(candidate) = candidate {
            match inner.stores.channels.advance_cursor(channel.id, candidate).await {
                Ok(CursorAdvance::Applied) => channel.last_synced_at = Some(candidate),
                Ok(CursorAdvance::Ignored) => {}
                Err(e) => warn!(channel = %channel.identifier, error = %e, "cursor advance failed"),
            }
        }

        match report.outcome {
            FetchOutcome::Complete | FetchOutcome::Truncated => {
                if matches!(report.outcome, FetchOutcome::Truncated) {
                    info!(
                        channel = %channel.identifier,
                        pages = report.pages,
                        "page cap reached, remainder resumes next cycle"
                    );
                }
                let now = inner.clock.now();
                if let Err(e) = inner.stores.accounts.mark_used(account_id, now).await {
                    warn!(error = %e, "account usage bookkeeping failed");
                }
                if let Err(e) = inner.stores.channels.record_check(channel.id, now, None).await {
                    warn!(error = %e, "channel bookkeeping failed");
                }
                result.error = None;
                return result;
            }
            FetchOutcome::Failed(src_err) => {
                let err_text = src_err.to_string();
                let now = inner.clock.now();
                let _ = inner
                    .stores
                    .channels
                    .record_check(channel.id, now, Some(&err_text))
                    .await;
                result.error = Some(err_text);

                let applied = inner.governor.apply(&lease.account, &channel, &src_err, now).await;
                drop(lease);
                match applied {
                    // Channel-level condition; another account won't help.
                    Ok(Applied::ChannelParked) => break,
                    Ok(_) => {
                        burned.insert(account_id);
                        continue;
                    }
                    Err(e) => {
                        warn!(channel = %channel.identifier, error = %e, "failure handling error");
                        break;
                    }
                }
            }
        }
    }

    result
}

/// Messages with no usable text (service entries, media-only posts)
/// are dropped here; they still advance the cursor via the watermark.
fn posts_from(channel: &Channel, messages: &[SourceMessage]) -> Vec<NewPost> {
    messages
        .iter()
        .filter(|m| !m.text.trim().is_empty())
        .map(|m| NewPost {
            external_message_id: m.id,
            source_url: source_url(channel, m.id),
            published_at: m.published_at,
            text: m.text.clone(),
            raw_payload: m.raw.clone(),
        })
        .collect()
}

/// Public channels get a canonical permalink; private ones have none.
fn source_url(channel: &Channel, message_id: i64) -> Option<String> {
    match channel.kind {
        ChannelKind::Public => Some(format!(
            "https://t.me/{}/{}",
            channel.identifier, message_id
        )),
        ChannelKind::Private => None,
    }
}

fn spawn_renewer(
    lock: Arc<dyn TickLock>,
    token: LockToken,
    ttl: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let period = (ttl / 2).max(Duration::from_secs(1));
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // skip immediate tick
        loop {
            interval.tick().await;
            match lock.renew(&token, ttl).await {
                Ok(true) => debug!("tick lock renewed"),
                Ok(false) => {
                    warn!("tick lock no longer held, renewal stopped");
                    break;
                }
                Err(e) => warn!(error = %e, "tick lock renewal failed"),
            }
        }
    })
}
