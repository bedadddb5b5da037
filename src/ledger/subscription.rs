use crate::error::{Error, Result};
use crate::ledger::SubscriptionTier;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    /// Auto-renew off; access retained until `end_date`
    Cancelled,
    /// Access revoked
    Expired,
    /// Externally suspended mid-cycle
    Paused,
}

/// Subscription state of one user.
///
/// Lifecycle:
/// FREE → PREMIUM(ACTIVE) → PREMIUM(CANCELLED) → FREE(EXPIRED) at period end,
/// PREMIUM(ACTIVE) ⇄ PREMIUM(PAUSED), and any state → FREE(EXPIRED) on revoke.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    pub tier: SubscriptionTier,
    pub status: SubscriptionStatus,
    pub start_date: i64,
    /// Only meaningful for PREMIUM
    pub end_date: Option<i64>,
    pub auto_renew: bool,
    pub external_subscription_id: Option<String>,
}

impl Subscription {
    /// FREE tier, implicitly always active.
    pub fn free(now: i64) -> Self {
        Subscription {
            tier: SubscriptionTier::Free,
            status: SubscriptionStatus::Active,
            start_date: now,
            end_date: None,
            auto_renew: false,
            external_subscription_id: None,
        }
    }

    pub fn is_premium(&self) -> bool {
        self.tier == SubscriptionTier::Premium
    }

    /// PREMIUM whose paid period has already ended.
    pub fn is_lapsed(&self, now: i64) -> bool {
        self.is_premium() && self.end_date.is_some_and(|end| end < now)
    }

    pub fn activate(
        &mut self,
        tier: SubscriptionTier,
        external_subscription_id: Option<String>,
        period_end: i64,
        now: i64,
    ) {
        self.tier = tier;
        self.status = SubscriptionStatus::Active;
        self.start_date = now;
        self.end_date = Some(period_end);
        self.auto_renew = true;
        self.external_subscription_id = external_subscription_id;
    }

    /// Extend the paid period. A renewal arriving after a downgrade re-enables PREMIUM.
    pub fn renew(&mut self, period_end: i64, now: i64) {
        if !self.is_premium() {
            self.tier = SubscriptionTier::Premium;
            self.start_date = now;
        }
        self.status = SubscriptionStatus::Active;
        self.end_date = Some(period_end);
        self.auto_renew = true;
    }

    pub fn cancel(&mut self) -> Result<()> {
        if !self.is_premium() {
            return Err(Error::InvalidTransition(
                "Cannot cancel: no PREMIUM subscription".to_string(),
            ));
        }
        self.auto_renew = false;
        self.status = SubscriptionStatus::Cancelled;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        if !self.is_premium() || self.status != SubscriptionStatus::Active {
            return Err(Error::InvalidTransition(format!(
                "Cannot pause a {} subscription in {:?} state",
                self.tier, self.status
            )));
        }
        self.status = SubscriptionStatus::Paused;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.status != SubscriptionStatus::Paused {
            return Err(Error::InvalidTransition(format!(
                "Cannot resume a subscription in {:?} state",
                self.status
            )));
        }
        self.status = SubscriptionStatus::Active;
        Ok(())
    }

    /// Immediate downgrade to FREE.
    pub fn expire(&mut self) {
        self.tier = SubscriptionTier::Free;
        self.status = SubscriptionStatus::Expired;
        self.auto_renew = false;
    }
}
