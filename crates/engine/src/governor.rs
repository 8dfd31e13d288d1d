//! Failure governance.
//!
//! Every classified fetch failure lands here and is turned into a
//! health transition: cooldowns for rate limits, quarantine for dead
//! sessions, parking for channels awaiting approval, and a sliding
//! failure streak that trips a breaker on repeated network trouble.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::warn;

use depesche_core::config::SchedulerConfig;
use depesche_notify::{Alert, Dispatcher};
use depesche_source::SourceError;
use depesche_store::models::{Account, Channel, ChannelState};
use depesche_store::traits::{AccountStore, ChannelStore, Stores};
use depesche_store::StoreError;

/// What the governor did in response to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Account cooled down until the given instant.
    CooledDown { until: DateTime<Utc> },
    /// Account pulled from rotation for good.
    Quarantined,
    /// Channel parked until an operator re-activates it.
    ChannelParked,
    /// Failure streak bumped; `tripped` means the breaker cooled the
    /// account down.
    TransientRecorded { streak: i32, tripped: bool },
}

pub struct Governor {
    stores: Stores,
    dispatcher: Arc<Dispatcher>,
    jitter_secs: u64,
    failure_threshold: u32,
    failure_window: chrono::Duration,
    breaker_cooldown: chrono::Duration,
}

impl Governor {
    pub fn new(stores: Stores, dispatcher: Arc<Dispatcher>, cfg: &SchedulerConfig) -> Self {
        Self {
            stores,
            dispatcher,
            jitter_secs: cfg.cooldown_jitter_secs,
            failure_threshold: cfg.failure_threshold,
            failure_window: cfg.failure_window(),
            breaker_cooldown: cfg.breaker_cooldown(),
        }
    }

    /// Route one classified failure into the matching health transition.
    pub async fn apply(
        &self,
        account: &Account,
        channel: &Channel,
        err: &SourceError,
        now: DateTime<Utc>,
    ) -> Result<Applied, StoreError> {
        match err {
            SourceError::RateLimited { retry_after_secs } => {
                // Jitter keeps a fleet of accounts from thawing in lockstep.
                let jitter = rand::thread_rng().gen_range(0..=self.jitter_secs);
                let until = now + chrono::Duration::seconds((*retry_after_secs + jitter) as i64);
                self.stores
                    .accounts
                    .set_cooldown(account.id, until, &err.to_string())
                    .await?;
                warn!(
                    account = %account.label,
                    until = %until,
                    "rate limited, account cooling down"
                );
                Ok(Applied::CooledDown { until })
            }
            SourceError::AuthExpired => {
                let reason = err.to_string();
                self.stores.accounts.quarantine(account.id, &reason).await?;
                tracing::error!(account = %account.label, "auth expired, account quarantined");
                self.dispatcher
                    .dispatch(&Alert::AccountQuarantined {
                        label: account.label.clone(),
                        reason,
                    })
                    .await;
                Ok(Applied::Quarantined)
            }
            SourceError::PermissionPending => {
                let reason = err.to_string();
                self.stores
                    .channels
                    .set_state(channel.id, ChannelState::PendingApproval, Some(&reason))
                    .await?;
                warn!(channel = %channel.identifier, "join approval pending, channel parked");
                self.dispatcher
                    .dispatch(&Alert::ChannelPendingApproval {
                        identifier: channel.identifier.clone(),
                    })
                    .await;
                Ok(Applied::ChannelParked)
            }
            SourceError::NetworkTransient { message } => {
                let streak = self
                    .stores
                    .accounts
                    .record_transient_failure(account.id, now, self.failure_window, message)
                    .await?;
                let tripped = streak >= self.failure_threshold as i32;
                if tripped {
                    let until = now + self.breaker_cooldown;
                    self.stores
                        .accounts
                        .set_cooldown(account.id, until, "transient failure breaker tripped")
                        .await?;
                    warn!(
                        account = %account.label,
                        streak,
                        "failure streak tripped the breaker, cooling down"
                    );
                }
                Ok(Applied::TransientRecorded { streak, tripped })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depesche_store::models::{AccountHealth, ChannelKind, ChannelUpsert};
    use depesche_store::MemStore;

    struct Fixture {
        stores: Stores,
        governor: Governor,
        account: Account,
        channel: Channel,
    }

    async fn fixture(cfg: SchedulerConfig) -> Fixture {
        let mem = Arc::new(MemStore::default());
        let stores = Stores::from_mem(mem);
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
        let governor = Governor::new(stores.clone(), Arc::new(Dispatcher::empty()), &cfg);
        Fixture {
            stores,
            governor,
            account,
            channel,
        }
    }

    #[tokio::test]
    async fn rate_limit_cools_for_exactly_retry_after_without_jitter() {
        let f = fixture(SchedulerConfig {
            cooldown_jitter_secs: 0,
            ..Default::default()
        })
        .await;
        let now = Utc::now();

        let applied = f
            .governor
            .apply(
                &f.account,
                &f.channel,
                &SourceError::RateLimited {
                    retry_after_secs: 90,
                },
                now,
            )
            .await
            .unwrap();

        let expected = now + chrono::Duration::seconds(90);
        assert_eq!(applied, Applied::CooledDown { until: expected });

        let accounts = f.stores.accounts.list().await.unwrap();
        assert_eq!(accounts[0].health, AccountHealth::Cooldown);
        assert_eq!(accounts[0].cooldown_until, Some(expected));
        assert!(f.stores.accounts.list_ready(now).await.unwrap().is_empty());
        assert!(!f
            .stores
            .accounts
            .list_ready(expected)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn jitter_lands_within_the_configured_band() {
        let f = fixture(SchedulerConfig {
            cooldown_jitter_secs: 30,
            ..Default::default()
        })
        .await;
        let now = Utc::now();

        let applied = f
            .governor
            .apply(
                &f.account,
                &f.channel,
                &SourceError::RateLimited {
                    retry_after_secs: 60,
                },
                now,
            )
            .await
            .unwrap();

        match applied {
            Applied::CooledDown { until } => {
                assert!(until >= now + chrono::Duration::seconds(60));
                assert!(until <= now + chrono::Duration::seconds(90));
            }
            other => panic!("expected cooldown, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn auth_expired_is_terminal() {
        let f = fixture(SchedulerConfig::default()).await;
        let now = Utc::now();

        let applied = f
            .governor
            .apply(&f.account, &f.channel, &SourceError::AuthExpired, now)
            .await
            .unwrap();
        assert_eq!(applied, Applied::Quarantined);

        let accounts = f.stores.accounts.list().await.unwrap();
        assert_eq!(accounts[0].health, AccountHealth::Quarantined);
        assert!(!accounts[0].is_active);
        // No revival sweep brings it back.
        f.stores
            .accounts
            .revive_cooled(now + chrono::Duration::days(365))
            .await
            .unwrap();
        assert!(f
            .stores
            .accounts
            .list_ready(now + chrono::Duration::days(365))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn pending_approval_parks_the_channel_not_the_account() {
        let f = fixture(SchedulerConfig::default()).await;
        let now = Utc::now();

        let applied = f
            .governor
            .apply(&f.account, &f.channel, &SourceError::PermissionPending, now)
            .await
            .unwrap();
        assert_eq!(applied, Applied::ChannelParked);

        assert!(f.stores.channels.list_eligible(10).await.unwrap().is_empty());
        // The account stays in rotation.
        assert_eq!(f.stores.accounts.list_ready(now).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn breaker_trips_at_the_threshold() {
        let f = fixture(SchedulerConfig {
            failure_threshold: 3,
            breaker_cooldown_secs: 120,
            ..Default::default()
        })
        .await;
        let now = Utc::now();
        let err = SourceError::network("connection reset");

        for expected_streak in 1..=2 {
            let applied = f
                .governor
                .apply(&f.account, &f.channel, &err, now)
                .await
                .unwrap();
            assert_eq!(
                applied,
                Applied::TransientRecorded {
                    streak: expected_streak,
                    tripped: false
                }
            );
        }

        let applied = f
            .governor
            .apply(&f.account, &f.channel, &err, now)
            .await
            .unwrap();
        assert_eq!(
            applied,
            Applied::TransientRecorded {
                streak: 3,
                tripped: true
            }
        );

        let accounts = f.stores.accounts.list().await.unwrap();
        assert_eq!(accounts[0].health, AccountHealth::Cooldown);
        assert_eq!(
            accounts[0].cooldown_until,
            Some(now + chrono::Duration::seconds(120))
        );
    }
}
