//! Events delivered by the payment/subscription collaborator (webhooks or
//! synchronous confirmations). Each maps to exactly one ledger operation.

pub mod validation;

pub use validation::validate_event;

use crate::error::{Error, Result};
use crate::ledger::{RefundOutcome, SubscriptionStatus, SubscriptionTier, UsageService};
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BillingEvent {
    SubscriptionActivated {
        user_id: String,
        external_subscription_id: String,
        /// Epoch millis
        period_end: i64,
    },
    SubscriptionRenewed {
        user_id: String,
        period_end: i64,
    },
    SubscriptionCancelled {
        user_id: String,
    },
    SubscriptionExpired {
        user_id: String,
    },
    SubscriptionPaused {
        user_id: String,
    },
    SubscriptionResumed {
        user_id: String,
    },
    OneTimeCreditGranted {
        user_id: String,
        count: u32,
        price: u64,
        payment_id: String,
    },
    RefundProcessed {
        user_id: String,
        related_payment_id: String,
    },
}

impl BillingEvent {
    pub fn user_id(&self) -> &str {
        match self {
            BillingEvent::SubscriptionActivated { user_id, .. }
            | BillingEvent::SubscriptionRenewed { user_id, .. }
            | BillingEvent::SubscriptionCancelled { user_id }
            | BillingEvent::SubscriptionExpired { user_id }
            | BillingEvent::SubscriptionPaused { user_id }
            | BillingEvent::SubscriptionResumed { user_id }
            | BillingEvent::OneTimeCreditGranted { user_id, .. }
            | BillingEvent::RefundProcessed { user_id, .. } => user_id,
        }
    }

    /// Parse an event from its JSON webhook body.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::InvalidEvent(format!("Failed to parse billing event JSON: {}", e)))
    }
}

/// Ledger effect of an applied event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    SubscriptionUpdated {
        tier: SubscriptionTier,
        status: SubscriptionStatus,
    },
    CreditsGranted {
        grant_id: String,
    },
    GrantVoided {
        grant_id: String,
        credits: u32,
    },
}

/// Validate and apply one event to the user's ledger.
pub fn apply_event<S: Storage>(service: &UsageService<S>, event: &BillingEvent) -> Result<EventOutcome> {
    validate_event(event, service.now())?;
    debug!(user_id = %event.user_id(), event = ?event, "applying billing event");

    let ledger = match event {
        BillingEvent::SubscriptionActivated {
            user_id,
            external_subscription_id,
            period_end,
        } => service.grant_subscription(
            user_id,
            SubscriptionTier::Premium,
            external_subscription_id,
            *period_end,
        )?,
        BillingEvent::SubscriptionRenewed {
            user_id,
            period_end,
        } => service.renew_subscription(user_id, *period_end)?,
        BillingEvent::SubscriptionCancelled { user_id } => service.cancel_subscription(user_id)?,
        BillingEvent::SubscriptionExpired { user_id } => service.expire_subscription(user_id)?,
        BillingEvent::SubscriptionPaused { user_id } => service.pause_subscription(user_id)?,
        BillingEvent::SubscriptionResumed { user_id } => service.resume_subscription(user_id)?,
        BillingEvent::OneTimeCreditGranted {
            user_id,
            count,
            price,
            payment_id,
        } => {
            let grant_id = service.add_credit_grant(user_id, *count, *price, Some(payment_id.as_str()))?;
            return Ok(EventOutcome::CreditsGranted { grant_id });
        }
        BillingEvent::RefundProcessed {
            user_id,
            related_payment_id,
        } => match service.refund_payment(user_id, related_payment_id)? {
            RefundOutcome::VoidedGrant { grant_id, credits } => {
                return Ok(EventOutcome::GrantVoided { grant_id, credits });
            }
            RefundOutcome::RevokedSubscription => service.get_ledger(user_id)?,
        },
    };

    Ok(EventOutcome::SubscriptionUpdated {
        tier: ledger.subscription.tier,
        status: ledger.subscription.status,
    })
}
