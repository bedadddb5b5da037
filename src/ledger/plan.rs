use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Subscription level determining the monthly quota.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionTier {
    Free,
    Premium,
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionTier::Free => write!(f, "FREE"),
            SubscriptionTier::Premium => write!(f, "PREMIUM"),
        }
    }
}

/// A purchasable plan. `features` is descriptive only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plan {
    pub tier: SubscriptionTier,
    pub monthly_quota: u32,
    /// Monthly price in minor currency units
    pub price: u64,
    pub display_price: String,
    pub features: Vec<String>,
}

/// Plans plus the pricing policy for one-time credits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanCatalog {
    pub free: Plan,
    pub premium: Plan,
    /// Cost recorded for one credit-funded operation
    pub credit_unit_price: u64,
    /// How long a purchased grant stays usable
    pub credit_validity: Duration,
}

impl PlanCatalog {
    pub fn plan(&self, tier: SubscriptionTier) -> &Plan {
        match tier {
            SubscriptionTier::Free => &self.free,
            SubscriptionTier::Premium => &self.premium,
        }
    }

    pub fn quota(&self, tier: SubscriptionTier) -> u32 {
        self.plan(tier).monthly_quota
    }

    pub fn credit_validity_millis(&self) -> i64 {
        i64::try_from(self.credit_validity.as_millis()).unwrap_or(i64::MAX)
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        crate::config::Config::new().plan_catalog()
    }
}
