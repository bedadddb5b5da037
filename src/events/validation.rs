use crate::error::{Error, Result};
use crate::events::BillingEvent;

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidEvent(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn require_future(period_end: i64, now: i64) -> Result<()> {
    if period_end <= now {
        return Err(Error::InvalidEvent(format!(
            "Period end {} is not after current time {}",
            period_end, now
        )));
    }
    Ok(())
}

/// Structural checks before an event touches a ledger.
///
/// Signature verification happens upstream; this only rejects events that
/// could never apply cleanly.
pub fn validate_event(event: &BillingEvent, now: i64) -> Result<()> {
    require_non_empty("user_id", event.user_id())?;

    match event {
        BillingEvent::SubscriptionActivated {
            external_subscription_id,
            period_end,
            ..
        } => {
            require_non_empty("external_subscription_id", external_subscription_id)?;
            require_future(*period_end, now)
        }
        BillingEvent::SubscriptionRenewed { period_end, .. } => require_future(*period_end, now),
        BillingEvent::OneTimeCreditGranted {
            count, payment_id, ..
        } => {
            if *count == 0 {
                return Err(Error::InvalidEvent(
                    "Credit grant count must be greater than zero".to_string(),
                ));
            }
            require_non_empty("payment_id", payment_id)
        }
        BillingEvent::RefundProcessed {
            related_payment_id, ..
        } => require_non_empty("related_payment_id", related_payment_id),
        BillingEvent::SubscriptionCancelled { .. }
        | BillingEvent::SubscriptionExpired { .. }
        | BillingEvent::SubscriptionPaused { .. }
        | BillingEvent::SubscriptionResumed { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_user() {
        let event = BillingEvent::SubscriptionCancelled {
            user_id: "  ".to_string(),
        };
        assert!(validate_event(&event, 0).is_err());
    }

    #[test]
    fn test_validate_period_end_in_past() {
        let event = BillingEvent::SubscriptionActivated {
            user_id: "alice".to_string(),
            external_subscription_id: "sub_1".to_string(),
            period_end: 1_000,
        };
        assert!(validate_event(&event, 1_000).is_err());
        assert!(validate_event(&event, 999).is_ok());
    }

    #[test]
    fn test_validate_credit_grant() {
        let zero = BillingEvent::OneTimeCreditGranted {
            user_id: "alice".to_string(),
            count: 0,
            price: 129,
            payment_id: "pay_1".to_string(),
        };
        assert!(validate_event(&zero, 0).is_err());

        let no_payment = BillingEvent::OneTimeCreditGranted {
            user_id: "alice".to_string(),
            count: 5,
            price: 129,
            payment_id: String::new(),
        };
        assert!(validate_event(&no_payment, 0).is_err());
    }

    #[test]
    fn test_validate_refund() {
        let event = BillingEvent::RefundProcessed {
            user_id: "alice".to_string(),
            related_payment_id: "pay_1".to_string(),
        };
        assert!(validate_event(&event, 0).is_ok());
    }
}
