use serde::{Deserialize, Serialize};

/// A purchased, time-boxed allotment of extra operations.
///
/// Invariants:
/// - `count` never goes below zero
/// - a grant is inert once `count == 0` or `expiry_date <= now`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreditGrant {
    pub id: String,
    /// Remaining credits
    pub count: u32,
    /// Price paid for the whole grant, in minor currency units
    pub purchase_price: u64,
    pub purchase_date: i64,
    pub expiry_date: i64,
    pub external_payment_id: Option<String>,
}

impl CreditGrant {
    pub fn new(
        id: String,
        count: u32,
        purchase_price: u64,
        purchase_date: i64,
        expiry_date: i64,
        external_payment_id: Option<String>,
    ) -> Self {
        CreditGrant {
            id,
            count,
            purchase_price,
            purchase_date,
            expiry_date,
            external_payment_id,
        }
    }

    pub fn is_unexpired(&self, now: i64) -> bool {
        self.expiry_date > now
    }

    /// Selectable for consumption
    pub fn is_usable(&self, now: i64) -> bool {
        self.is_unexpired(now) && self.count > 0
    }

    /// Take one credit. Returns false if the grant is empty.
    pub fn take_one(&mut self) -> bool {
        match self.count.checked_sub(1) {
            Some(rest) => {
                self.count = rest;
                true
            }
            None => false,
        }
    }

    /// Remove all remaining credits (refund).
    pub fn void(&mut self) -> u32 {
        std::mem::take(&mut self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(count: u32, expiry: i64) -> CreditGrant {
        CreditGrant::new("credit_a".to_string(), count, 129, 0, expiry, None)
    }

    #[test]
    fn test_expiry_boundary_is_inert() {
        let g = grant(5, 1_000);
        assert!(g.is_usable(999));
        assert!(!g.is_usable(1_000));
    }

    #[test]
    fn test_take_one_never_negative() {
        let mut g = grant(1, 1_000);
        assert!(g.take_one());
        assert_eq!(g.count, 0);
        assert!(!g.take_one());
        assert_eq!(g.count, 0);
        assert!(!g.is_usable(0));
    }

    #[test]
    fn test_void() {
        let mut g = grant(4, 1_000);
        assert_eq!(g.void(), 4);
        assert_eq!(g.count, 0);
    }
}
