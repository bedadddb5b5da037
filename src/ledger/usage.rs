use serde::{Deserialize, Serialize};

/// Bucket a debit was taken from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebitSource {
    /// Monthly subscription quota
    Quota,
    /// One-time credit grant, by id
    Credit { grant_id: String },
}

/// One consumed operation in the current period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageEvent {
    pub timestamp: i64,
    pub action_kind: String,
    pub related_item_id: Option<String>,
    /// Zero when covered by the quota
    pub cost: u64,
    pub source: DebitSource,
}

/// Quota counters for the current monthly period.
///
/// Invariant: `used <= limit` through ledger consumption; a tier downgrade may
/// leave `used > limit` until the next rollover.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub period_key: String,
    pub used: u32,
    pub limit: u32,
    pub last_updated: i64,
    pub history: Vec<UsageEvent>,
}

impl Usage {
    pub fn new(period_key: String, limit: u32, now: i64) -> Self {
        Usage {
            period_key,
            used: 0,
            limit,
            last_updated: now,
            history: Vec::new(),
        }
    }

    pub fn has_quota(&self) -> bool {
        self.used < self.limit
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }

    /// Start a new period: counters to zero, history cleared.
    pub fn reset(&mut self, period_key: String, limit: u32, now: i64) {
        self.period_key = period_key;
        self.used = 0;
        self.limit = limit;
        self.last_updated = now;
        self.history.clear();
    }

    pub fn record(&mut self, event: UsageEvent) {
        self.last_updated = event.timestamp;
        self.history.push(event);
    }
}
