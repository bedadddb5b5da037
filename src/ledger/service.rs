use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::ledger::{
    Admission, CreditGrant, DebitSource, PaymentTransaction, PlanCatalog, SubscriptionTier,
    TransactionKind, UsageLedger, UsageStats,
};
use crate::sha256_digest;
use crate::storage::Storage;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What a refund ended up reversing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundOutcome {
    /// A credit pack: its remaining credits were removed.
    VoidedGrant { grant_id: String, credits: u32 },
    /// Anything else: the subscription was revoked immediately.
    RevokedSubscription,
}

/// Per-user ledger operations over a [`Storage`].
///
/// Every mutation is load → corrective passes → change → compare-and-set
/// persist, retried on [`Error::Conflict`]. `can_consume` followed by
/// `consume` is two separate updates; concurrent writers for one user should
/// use [`UsageService::try_consume`] instead.
pub struct UsageService<S> {
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
    catalog: PlanCatalog,
    max_cas_retries: u32,
}

impl<S: Storage> UsageService<S> {
    pub fn new(storage: Arc<S>, clock: Arc<dyn Clock>, catalog: PlanCatalog) -> Self {
        UsageService {
            storage,
            clock,
            catalog,
            max_cas_retries: 3,
        }
    }

    pub fn with_max_cas_retries(mut self, retries: u32) -> Self {
        self.max_cas_retries = retries;
        self
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Run `op` on a fresh, corrected ledger and persist with compare-and-set.
    ///
    /// `op` returns its value and whether it changed the ledger. Corrections
    /// and first-time creation are persisted even when `op` changes nothing.
    /// If `op` fails nothing is written.
    fn update<T, F>(&self, user_id: &str, mut op: F) -> Result<(UsageLedger, T)>
    where
        F: FnMut(&mut UsageLedger, i64) -> Result<(T, bool)>,
    {
        for attempt in 0..=self.max_cas_retries {
            let now = self.now();
            let (mut ledger, version) = match self.storage.load_ledger(user_id)? {
                Some(stored) => (stored.record, Some(stored.version)),
                None => {
                    info!(user_id, "creating FREE ledger for new user");
                    (UsageLedger::new(user_id, now, &self.catalog), None)
                }
            };

            let corrected = ledger.refresh(now, &self.catalog);
            let (value, changed) = op(&mut ledger, now)?;
            if version.is_some() && !corrected && !changed {
                return Ok((ledger, value));
            }

            match self.storage.persist_ledger(user_id, &ledger, version) {
                Ok(_) => return Ok((ledger, value)),
                Err(Error::Conflict(msg)) => {
                    warn!(user_id, attempt, %msg, "ledger write conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::Conflict(format!(
            "ledger {} still contended after {} retries",
            user_id, self.max_cas_retries
        )))
    }

    /// Load or lazily create the ledger with rollover and expiry applied.
    pub fn get_ledger(&self, user_id: &str) -> Result<UsageLedger> {
        let (ledger, ()) = self.update(user_id, |_, _| Ok(((), false)))?;
        Ok(ledger)
    }

    /// Non-mutating admission check (beyond corrective passes).
    pub fn can_consume(&self, user_id: &str) -> Result<Admission> {
        let ledger = self.get_ledger(user_id)?;
        let admission = ledger.can_consume(self.now());
        if !admission.allowed {
            info!(
                user_id,
                used = ledger.usage.used,
                limit = ledger.usage.limit,
                tier = %ledger.tier(),
                "usage admission denied"
            );
        }
        Ok(admission)
    }

    /// Admission as a `Result`: [`Error::UsageLimitExceeded`] when denied.
    pub fn ensure_can_consume(&self, user_id: &str) -> Result<()> {
        let ledger = self.get_ledger(user_id)?;
        if ledger.can_consume(self.now()).allowed {
            Ok(())
        } else {
            Err(ledger.limit_exceeded())
        }
    }

    /// Debit one unit after the billable operation already succeeded.
    pub fn consume(
        &self,
        user_id: &str,
        action_kind: &str,
        related_item_id: Option<&str>,
    ) -> Result<DebitSource> {
        let result = self.update(user_id, |ledger, now| {
            let source = ledger.consume(action_kind, related_item_id, now, &self.catalog)?;
            Ok((source, true))
        });
        match result {
            Ok((_, source)) => Ok(source),
            Err(e @ Error::LedgerInvariantViolation { .. }) => {
                error!(user_id, action_kind, error = %e, "consume called without capacity");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Admission and debit in one compare-and-set update.
    pub fn try_consume(
        &self,
        user_id: &str,
        action_kind: &str,
        related_item_id: Option<&str>,
    ) -> Result<DebitSource> {
        let (_, source) = self.update(user_id, |ledger, now| {
            if !ledger.can_consume(now).allowed {
                return Err(ledger.limit_exceeded());
            }
            let source = ledger.consume(action_kind, related_item_id, now, &self.catalog)?;
            Ok((source, true))
        })?;
        Ok(source)
    }

    /// Start (or upgrade to) a paid tier. `used` is kept; only the ceiling moves.
    pub fn grant_subscription(
        &self,
        user_id: &str,
        tier: SubscriptionTier,
        external_subscription_id: &str,
        period_end: i64,
    ) -> Result<UsageLedger> {
        let (ledger, ()) = self.update(user_id, |ledger, now| {
            ledger.subscription.activate(
                tier,
                Some(external_subscription_id.to_string()),
                period_end,
                now,
            );
            ledger.apply_tier_limit(&self.catalog);
            let plan = self.catalog.plan(tier);
            if ledger.find_transaction_mut(external_subscription_id).is_none() {
                ledger.record_transaction(PaymentTransaction::succeeded(
                    external_subscription_id.to_string(),
                    TransactionKind::Subscription,
                    plan.price,
                    now,
                    format!("{} subscription ({})", tier, plan.display_price),
                ));
            }
            Ok(((), true))
        })?;
        info!(user_id, tier = %tier, period_end, "subscription granted");
        Ok(ledger)
    }

    /// Extend the paid period after a successful renewal charge.
    ///
    /// The charge is recorded once per `(subscription, period_end)`.
    pub fn renew_subscription(&self, user_id: &str, period_end: i64) -> Result<UsageLedger> {
        let (ledger, ()) = self.update(user_id, |ledger, now| {
            ledger.subscription.renew(period_end, now);
            ledger.apply_tier_limit(&self.catalog);
            let tx_id = renewal_tx_id(
                ledger.subscription.external_subscription_id.as_deref(),
                period_end,
            );
            if ledger.find_transaction_mut(&tx_id).is_none() {
                let tier = ledger.tier();
                let plan = self.catalog.plan(tier);
                ledger.record_transaction(PaymentTransaction::succeeded(
                    tx_id,
                    TransactionKind::Subscription,
                    plan.price,
                    now,
                    format!("{} renewal ({})", tier, plan.display_price),
                ));
            }
            Ok(((), true))
        })?;
        info!(user_id, period_end, "subscription renewed");
        Ok(ledger)
    }

    /// Turn off auto-renew; access continues until the period ends.
    pub fn cancel_subscription(&self, user_id: &str) -> Result<UsageLedger> {
        let (ledger, ()) = self.update(user_id, |ledger, _| {
            ledger.subscription.cancel()?;
            Ok(((), true))
        })?;
        info!(user_id, "subscription cancelled");
        Ok(ledger)
    }

    pub fn pause_subscription(&self, user_id: &str) -> Result<UsageLedger> {
        let (ledger, ()) = self.update(user_id, |ledger, _| {
            ledger.subscription.pause()?;
            Ok(((), true))
        })?;
        info!(user_id, "subscription paused");
        Ok(ledger)
    }

    pub fn resume_subscription(&self, user_id: &str) -> Result<UsageLedger> {
        let (ledger, ()) = self.update(user_id, |ledger, _| {
            ledger.subscription.resume()?;
            Ok(((), true))
        })?;
        info!(user_id, "subscription resumed");
        Ok(ledger)
    }

    /// Immediate downgrade to FREE/EXPIRED (refund, chargeback, expiry).
    pub fn revoke_subscription(&self, user_id: &str, reason: &str) -> Result<UsageLedger> {
        let (ledger, ()) = self.update(user_id, |ledger, _| {
            ledger.subscription.expire();
            ledger.apply_tier_limit(&self.catalog);
            Ok(((), true))
        })?;
        info!(user_id, reason, "subscription revoked");
        Ok(ledger)
    }

    pub fn expire_subscription(&self, user_id: &str) -> Result<UsageLedger> {
        self.revoke_subscription(user_id, "expired")
    }

    /// Append a credit grant valid for the catalog's credit lifetime. Returns its id.
    ///
    /// Not idempotent: delivering the same payment twice grants twice.
    pub fn add_credit_grant(
        &self,
        user_id: &str,
        count: u32,
        price: u64,
        external_payment_id: Option<&str>,
    ) -> Result<String> {
        if count == 0 {
            return Err(Error::InvalidEvent(
                "Credit grant count must be greater than zero".to_string(),
            ));
        }
        let (_, grant_id) = self.update(user_id, |ledger, now| {
            let grant_id = make_grant_id(user_id, now, ledger.one_time_credits.len());
            let expiry = now.saturating_add(self.catalog.credit_validity_millis());
            ledger.add_credit_grant(CreditGrant::new(
                grant_id.clone(),
                count,
                price,
                now,
                expiry,
                external_payment_id.map(str::to_string),
            ));
            ledger.record_transaction(PaymentTransaction::succeeded(
                external_payment_id.unwrap_or(&grant_id).to_string(),
                TransactionKind::OneTime,
                price,
                now,
                format!("{} try-on credits", count),
            ));
            Ok((grant_id, true))
        })?;
        info!(user_id, count, price, %grant_id, "credit grant added");
        Ok(grant_id)
    }

    /// Reverse a recorded payment.
    ///
    /// A ONE_TIME payment voids its credit grant; a SUBSCRIPTION payment
    /// revokes the subscription. Ids with no recorded payment are rejected
    /// with [`Error::InvalidEvent`] and nothing is written.
    pub fn refund_payment(&self, user_id: &str, related_payment_id: &str) -> Result<RefundOutcome> {
        let (_, outcome) = self.update(user_id, |ledger, now| {
            let kind = match ledger.find_transaction_mut(related_payment_id) {
                Some(tx) => tx.kind,
                None => {
                    return Err(Error::InvalidEvent(format!(
                        "No payment {} recorded for user {}",
                        related_payment_id, user_id
                    )));
                }
            };
            let outcome = match kind {
                TransactionKind::OneTime => {
                    let grant = ledger
                        .find_grant_for_payment_mut(related_payment_id)
                        .ok_or_else(|| {
                            Error::InvalidEvent(format!(
                                "No credit grant for payment {}",
                                related_payment_id
                            ))
                        })?;
                    RefundOutcome::VoidedGrant {
                        grant_id: grant.id.clone(),
                        credits: grant.void(),
                    }
                }
                TransactionKind::Subscription => {
                    ledger.subscription.expire();
                    ledger.apply_tier_limit(&self.catalog);
                    RefundOutcome::RevokedSubscription
                }
            };
            if let Some(tx) = ledger.find_transaction_mut(related_payment_id) {
                tx.mark_refunded(now);
            }
            Ok((outcome, true))
        })?;
        info!(user_id, related_payment_id, outcome = ?outcome, "refund processed");
        Ok(outcome)
    }

    pub fn get_usage_stats(&self, user_id: &str) -> Result<UsageStats> {
        let ledger = self.get_ledger(user_id)?;
        Ok(ledger.stats(self.now()))
    }
}

fn renewal_tx_id(external_subscription_id: Option<&str>, period_end: i64) -> String {
    format!("{}:renewal:{}", external_subscription_id.unwrap_or("subscription"), period_end)
}

fn make_grant_id(user_id: &str, now: i64, seq: usize) -> String {
    let digest = sha256_digest(format!("{}:{}:{}", user_id, now, seq).as_bytes());
    format!("credit_{}", hex::encode(&digest[..8]))
}
