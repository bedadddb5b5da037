pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod logger;
pub mod rate_limit;
pub mod storage;
pub mod workflow;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, ErrorKind, Result};
pub use ledger::{UsageLedger, UsageService};
pub use rate_limit::{LimiterSet, RateLimitConfig, RateLimiter};
pub use workflow::{Gate, GateError, ImageGenerator};

use sha2::{Digest, Sha256};

/// Calculate SHA256 digest
pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}
