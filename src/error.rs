use crate::ledger::SubscriptionTier;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Rate limit exceeded on '{window}' window: {wait}")]
    RateLimitExceeded {
        window: String,
        retry_after_secs: u64,
        wait: String,
    },

    #[error("Usage limit exceeded: {used}/{limit} used on {tier} plan")]
    UsageLimitExceeded {
        used: u32,
        limit: u32,
        tier: SubscriptionTier,
    },

    #[error("Ledger invariant violated: consume with no capacity ({used}/{limit} on {tier} plan, no credits)")]
    LedgerInvariantViolation {
        used: u32,
        limit: u32,
        tier: SubscriptionTier,
    },

    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    #[error("Invalid subscription transition: {0}")]
    InvalidTransition(String),

    #[error("Invalid billing event: {0}")]
    InvalidEvent(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Coarse classification the calling workflow switches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Wait and retry after the reported delay.
    RateLimit,
    /// Needs an upgrade or a credit purchase.
    UsageLimit,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::RateLimitExceeded { .. } => ErrorKind::RateLimit,
            Error::UsageLimitExceeded { .. } => ErrorKind::UsageLimit,
            _ => ErrorKind::Other,
        }
    }

    /// Expected conditions that should be shown to the user instead of treated as failures.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Other)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
