//! Account rotation pool.
//!
//! Hands out ready accounts in least-recently-used order. A leased
//! account is invisible to other workers until the lease drops, so
//! two channels never fetch through the same account at once.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use depesche_store::models::Account;
use depesche_store::traits::AccountStore;
use depesche_store::StoreError;

pub struct AccountPool {
    accounts: Arc<dyn AccountStore>,
    leased: Arc<Mutex<HashSet<i64>>>,
}

impl AccountPool {
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self {
            accounts,
            leased: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Lease the least-recently-used ready account, skipping ids in
    /// `exclude` and accounts already leased elsewhere. Returns `None`
    /// when no account qualifies right now.
    pub async fn lease(
        &self,
        now: DateTime<Utc>,
        exclude: &HashSet<i64>,
    ) -> Result<Option<AccountLease>, StoreError> {
        let ready = self.accounts.list_ready(now).await?;
        let mut leased = self.leased.lock().expect("lease set poisoned");
        for account in ready {
            if exclude.contains(&account.id) || leased.contains(&account.id) {
                continue;
            }
            leased.insert(account.id);
            tracing::debug!(account = %account.label, "account leased");
            return Ok(Some(AccountLease {
                account,
                leased: Arc::clone(&self.leased),
            }));
        }
        Ok(None)
    }
}

/// Exclusive hold on one account for the duration of a fetch attempt.
/// Dropping the lease returns the account to the pool.
pub struct AccountLease {
    pub account: Account,
    leased: Arc<Mutex<HashSet<i64>>>,
}

impl Drop for AccountLease {
    fn drop(&mut self) {
        if let Ok(mut leased) = self.leased.lock() {
            leased.remove(&self.account.id);
        }
    }
}
