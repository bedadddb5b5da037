//! Usage ledger: monthly quota, purchased credits and subscription state per user.
//!
//! [`UsageLedger`] is the pure aggregate. [`UsageService`] loads it from a
//! [`crate::storage::Storage`], applies the corrective passes and persists
//! every mutation with compare-and-set.

pub mod credit;
pub mod period;
pub mod plan;
pub mod service;
pub mod subscription;
pub mod transaction;
pub mod usage;

pub use credit::CreditGrant;
pub use plan::{Plan, PlanCatalog, SubscriptionTier};
pub use service::{RefundOutcome, UsageService};
pub use subscription::{Subscription, SubscriptionStatus};
pub use transaction::{PaymentTransaction, TransactionKind, TransactionStatus};
pub use usage::{DebitSource, Usage, UsageEvent};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Answer to "may this user perform one more billable operation?"
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl Admission {
    fn allowed() -> Self {
        Admission {
            allowed: true,
            reason: None,
        }
    }

    fn denied(reason: String) -> Self {
        Admission {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Read-only projection for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStats {
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    /// Unexpired, non-empty credits
    pub one_time_credits: u32,
    pub percent_used: f64,
    pub tier: SubscriptionTier,
    pub days_until_reset: u32,
}

/// Per-user billing state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageLedger {
    pub user_id: String,
    pub subscription: Subscription,
    pub usage: Usage,
    /// Kept in purchase order
    pub one_time_credits: Vec<CreditGrant>,
    /// Append-only audit trail
    pub transactions: Vec<PaymentTransaction>,
}

impl UsageLedger {
    /// FREE-tier defaults for a user seen for the first time.
    pub fn new(user_id: &str, now: i64, catalog: &PlanCatalog) -> Self {
        UsageLedger {
            user_id: user_id.to_string(),
            subscription: Subscription::free(now),
            usage: Usage::new(
                period::period_key(now),
                catalog.quota(SubscriptionTier::Free),
                now,
            ),
            one_time_credits: Vec::new(),
            transactions: Vec::new(),
        }
    }

    pub fn tier(&self) -> SubscriptionTier {
        self.subscription.tier
    }

    /// Recompute `usage.limit` from the current tier without touching `used`.
    pub fn apply_tier_limit(&mut self, catalog: &PlanCatalog) {
        self.usage.limit = catalog.quota(self.tier());
    }

    /// Reset counters when the calendar month changed. Returns true if it fired.
    pub fn roll_over(&mut self, now: i64, catalog: &PlanCatalog) -> bool {
        let current = period::period_key(now);
        if self.usage.period_key == current {
            return false;
        }
        info!(
            user_id = %self.user_id,
            from = %self.usage.period_key,
            to = %current,
            used = self.usage.used,
            "usage period rolled over"
        );
        let limit = catalog.quota(self.tier());
        self.usage.reset(current, limit, now);
        true
    }

    /// Downgrade a PREMIUM subscription whose period has ended. Returns true if it fired.
    pub fn expire_lapsed_subscription(&mut self, now: i64, catalog: &PlanCatalog) -> bool {
        if !self.subscription.is_lapsed(now) {
            return false;
        }
        info!(
            user_id = %self.user_id,
            end_date = ?self.subscription.end_date,
            "premium subscription lapsed, downgrading to FREE"
        );
        self.subscription.expire();
        self.apply_tier_limit(catalog);
        true
    }

    /// Both corrective passes, rollover first. Returns true if anything changed.
    pub fn refresh(&mut self, now: i64, catalog: &PlanCatalog) -> bool {
        let rolled = self.roll_over(now, catalog);
        let expired = self.expire_lapsed_subscription(now, catalog);
        rolled || expired
    }

    /// Sum of credits in unexpired grants.
    pub fn available_credits(&self, now: i64) -> u32 {
        self.one_time_credits
            .iter()
            .filter(|g| g.is_unexpired(now))
            .fold(0u32, |acc, g| acc.saturating_add(g.count))
    }

    /// Admission rule: quota first, then unexpired credits.
    pub fn can_consume(&self, now: i64) -> Admission {
        if self.usage.has_quota() {
            return Admission::allowed();
        }
        if self.available_credits(now) > 0 {
            return Admission::allowed();
        }
        Admission::denied(format!(
            "You have used all {} try-ons included in your {} plan this month. \
             Upgrade to PREMIUM or purchase credits to continue.",
            self.usage.limit,
            self.tier()
        ))
    }

    /// Error describing the exhausted quota.
    pub fn limit_exceeded(&self) -> Error {
        Error::UsageLimitExceeded {
            used: self.usage.used,
            limit: self.usage.limit,
            tier: self.tier(),
        }
    }

    /// Debit one unit after a successful operation.
    ///
    /// Order: monthly quota, then the first usable credit grant in purchase
    /// order. With no capacity left this is a caller logic error and returns
    /// [`Error::LedgerInvariantViolation`] without mutating anything.
    pub fn consume(
        &mut self,
        action_kind: &str,
        related_item_id: Option<&str>,
        now: i64,
        catalog: &PlanCatalog,
    ) -> Result<DebitSource> {
        let usable = self.one_time_credits.iter().position(|g| g.is_usable(now));
        let (source, cost) = match usable {
            _ if self.usage.has_quota() => {
                self.usage.used += 1;
                (DebitSource::Quota, 0)
            }
            Some(idx) => {
                let grant = &mut self.one_time_credits[idx];
                grant.take_one();
                (
                    DebitSource::Credit {
                        grant_id: grant.id.clone(),
                    },
                    catalog.credit_unit_price,
                )
            }
            None => {
                return Err(Error::LedgerInvariantViolation {
                    used: self.usage.used,
                    limit: self.usage.limit,
                    tier: self.tier(),
                });
            }
        };

        self.usage.record(UsageEvent {
            timestamp: now,
            action_kind: action_kind.to_string(),
            related_item_id: related_item_id.map(str::to_string),
            cost,
            source: source.clone(),
        });
        debug!(
            user_id = %self.user_id,
            used = self.usage.used,
            limit = self.usage.limit,
            source = ?source,
            "usage debited"
        );
        Ok(source)
    }

    pub fn add_credit_grant(&mut self, grant: CreditGrant) {
        self.one_time_credits.push(grant);
    }

    /// Grant bought by `payment_id`, matched on the external payment id or,
    /// for grants recorded without one, on the grant id.
    pub fn find_grant_for_payment_mut(&mut self, payment_id: &str) -> Option<&mut CreditGrant> {
        self.one_time_credits.iter_mut().find(|g| {
            g.external_payment_id.as_deref() == Some(payment_id) || g.id == payment_id
        })
    }

    pub fn record_transaction(&mut self, tx: PaymentTransaction) {
        self.transactions.push(tx);
    }

    pub fn find_transaction_mut(&mut self, id: &str) -> Option<&mut PaymentTransaction> {
        self.transactions.iter_mut().find(|t| t.id == id)
    }

    pub fn stats(&self, now: i64) -> UsageStats {
        let used = self.usage.used;
        let limit = self.usage.limit;
        let percent_used = if limit == 0 {
            100.0
        } else {
            100.0 * f64::from(used) / f64::from(limit)
        };
        UsageStats {
            used,
            limit,
            remaining: self.usage.remaining(),
            one_time_credits: self.available_credits(now),
            percent_used,
            tier: self.tier(),
            days_until_reset: period::days_until_reset(now),
        }
    }
}
