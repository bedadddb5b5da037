use crate::error::{Error, Result};
use crate::ledger::UsageLedger;
use crate::rate_limit::RateWindowRecord;
use crate::storage::{check_version, Storage, Versioned};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// In-process storage, for tests and for embedding behind another persistence layer.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    ledgers: Mutex<HashMap<String, Versioned<UsageLedger>>>,
    windows: Mutex<HashMap<String, RateWindowRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::Storage("memory storage lock poisoned".to_string()))
}

impl Storage for MemoryStorage {
    fn load_ledger(&self, user_id: &str) -> Result<Option<Versioned<UsageLedger>>> {
        Ok(lock(&self.ledgers)?.get(user_id).cloned())
    }

    fn persist_ledger(
        &self,
        user_id: &str,
        ledger: &UsageLedger,
        expected_version: Option<u64>,
    ) -> Result<u64> {
        let mut guard = lock(&self.ledgers)?;
        let current = guard.get(user_id).map(|v| v.version);
        let version = check_version(user_id, current, expected_version)?;
        guard.insert(
            user_id.to_string(),
            Versioned {
                record: ledger.clone(),
                version,
            },
        );
        Ok(version)
    }

    fn load_window(&self, key: &str) -> Result<Option<RateWindowRecord>> {
        Ok(lock(&self.windows)?.get(key).cloned())
    }

    fn persist_window(&self, key: &str, record: &RateWindowRecord) -> Result<()> {
        lock(&self.windows)?.insert(key.to_string(), record.clone());
        Ok(())
    }

    fn remove_window(&self, key: &str) -> Result<()> {
        lock(&self.windows)?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::PlanCatalog;

    #[test]
    fn test_compare_and_set() {
        let storage = MemoryStorage::new();
        let ledger = UsageLedger::new("alice", 0, &PlanCatalog::default());

        let v1 = storage.persist_ledger("alice", &ledger, None).unwrap();
        assert_eq!(v1, 1);
        assert!(matches!(
            storage.persist_ledger("alice", &ledger, None),
            Err(Error::Conflict(_))
        ));

        let v2 = storage.persist_ledger("alice", &ledger, Some(v1)).unwrap();
        assert_eq!(v2, 2);
        assert!(matches!(
            storage.persist_ledger("alice", &ledger, Some(v1)),
            Err(Error::Conflict(_))
        ));
        assert_eq!(storage.load_ledger("alice").unwrap().unwrap().version, 2);
    }

    #[test]
    fn test_window_roundtrip_and_remove() {
        let storage = MemoryStorage::new();
        let record = RateWindowRecord {
            timestamps: vec![1, 2, 3],
            window_millis: 1_000,
            max_requests: 5,
        };
        storage.persist_window("minute", &record).unwrap();
        assert_eq!(storage.load_window("minute").unwrap(), Some(record));
        storage.remove_window("minute").unwrap();
        storage.remove_window("minute").unwrap();
        assert!(storage.load_window("minute").unwrap().is_none());
    }
}
