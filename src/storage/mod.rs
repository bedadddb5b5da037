pub mod kv;
pub mod memory;

pub use kv::FileStorage;
pub use memory::MemoryStorage;

use crate::error::Result;
use crate::ledger::UsageLedger;
use crate::rate_limit::RateWindowRecord;

/// A record together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub record: T,
    pub version: u64,
}

/// Durable key-value store for ledgers (keyed by user id) and rate windows
/// (keyed by limiter identity).
///
/// Implementations must preserve:
/// - Whole-record reads and writes (no partial updates visible)
/// - Compare-and-set on ledger writes: a write carrying a stale version fails
///   with [`crate::error::Error::Conflict`] and leaves the stored record untouched
pub trait Storage: Send + Sync {
    /// Load a user's ledger with its current version.
    ///
    /// Returns `None` if the user has never been observed.
    fn load_ledger(&self, user_id: &str) -> Result<Option<Versioned<UsageLedger>>>;

    /// Persist a ledger if the stored version still equals `expected_version`.
    ///
    /// `None` means the record must not exist yet. Returns the new version.
    fn persist_ledger(
        &self,
        user_id: &str,
        ledger: &UsageLedger,
        expected_version: Option<u64>,
    ) -> Result<u64>;

    /// Load the timestamp record of one rate window.
    fn load_window(&self, key: &str) -> Result<Option<RateWindowRecord>>;

    /// Overwrite the timestamp record of one rate window.
    fn persist_window(&self, key: &str, record: &RateWindowRecord) -> Result<()>;

    /// Drop a rate window record. Missing keys are not an error.
    fn remove_window(&self, key: &str) -> Result<()>;
}

/// Shared compare-and-set check for implementations.
pub(crate) fn check_version(
    key: &str,
    current: Option<u64>,
    expected: Option<u64>,
) -> Result<u64> {
    if current != expected {
        return Err(crate::error::Error::Conflict(format!(
            "ledger {} is at version {:?}, write expected {:?}",
            key, current, expected
        )));
    }
    Ok(current.map_or(1, |v| v + 1))
}
