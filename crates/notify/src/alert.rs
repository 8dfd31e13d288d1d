//! Operator alert events and their rendered form.

use std::collections::HashMap;

use crate::traits::Notification;

/// Conditions the scheduler escalates to an operator.
///
/// These are the terminal states no retry will clear on its own:
/// a quarantined account needs a fresh login, a pending channel
/// needs its join request approved on the provider side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    /// An account hit a non-recoverable auth failure and was pulled
    /// out of rotation.
    AccountQuarantined { label: String, reason: String },
    /// A private channel rejected access because its join request is
    /// still awaiting approval.
    ChannelPendingApproval { identifier: String },
}

impl Alert {
    /// Stable machine-readable kind, used in metadata and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Alert::AccountQuarantined { .. } => "account_quarantined",
            Alert::ChannelPendingApproval { .. } => "channel_pending_approval",
        }
    }

    /// Render the alert into a deliverable notification.
    pub fn render(&self) -> Notification {
        match self {
            Alert::AccountQuarantined { label, reason } => Notification {
                subject: format!("[depesche] account '{label}' quarantined"),
                body: format!(
                    "Account '{label}' was quarantined and removed from rotation: {reason}\n\
                     Re-authenticate the account and re-seed its credential to restore it."
                ),
                metadata: HashMap::from([
                    ("kind".to_string(), self.kind().to_string()),
                    ("account".to_string(), label.clone()),
                ]),
            },
            Alert::ChannelPendingApproval { identifier } => Notification {
                subject: format!("[depesche] channel '{identifier}' awaiting approval"),
                body: format!(
                    "Channel '{identifier}' is not readable yet: the join request is still \
                     pending approval. It is parked until an operator re-activates it."
                ),
                metadata: HashMap::from([
                    ("kind".to_string(), self.kind().to_string()),
                    ("channel".to_string(), identifier.clone()),
                ]),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarantine_alert_carries_label() {
        let alert = Alert::AccountQuarantined {
            label: "scraper-01".to_string(),
            reason: "session revoked".to_string(),
        };
        let rendered = alert.render();
        assert!(rendered.subject.contains("scraper-01"));
        assert!(rendered.body.contains("session revoked"));
        assert_eq!(rendered.metadata["kind"], "account_quarantined");
        assert_eq!(rendered.metadata["account"], "scraper-01");
    }

    #[test]
    fn pending_alert_kind() {
        let alert = Alert::ChannelPendingApproval {
            identifier: "some_private_channel".to_string(),
        };
        assert_eq!(alert.kind(), "channel_pending_approval");
        assert_eq!(alert.render().metadata["channel"], "some_private_channel");
    }
}
