use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::{LockError, RecordLockManager, SessionId};

/// Process-wide table of concurrent-view locks, shared by all sessions.
pub struct MemoryRecordLockManager {
    records: Mutex<HashMap<String, HashMap<SessionId, Instant>>>,
    /// Locks older than this are dropped before a record is locked again.
    max_age: Option<Duration>,
}

impl MemoryRecordLockManager {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            max_age: None,
        }
    }

    /// Lock table whose locks expire after `max_age`.
    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            max_age: Some(max_age),
            ..Self::new()
        }
    }

    pub fn lock_count(&self, record_identifier: &str) -> usize {
        self.records
            .lock()
            .get(record_identifier)
            .map_or(0, HashMap::len)
    }

    pub fn holds_lock(&self, record_identifier: &str, session: SessionId) -> bool {
        self.records
            .lock()
            .get(record_identifier)
            .is_some_and(|locks| locks.contains_key(&session))
    }

    /// Removes locks older than `max_age`, for sessions that went away
    /// without releasing them. Returns the number of removed locks.
    pub fn remove_old_locks(&self, max_age: Duration) -> usize {
        let mut records = self.records.lock();
        let mut count = 0;
        for locks in records.values_mut() {
            let before = locks.len();
            locks.retain(|_, created| created.elapsed() <= max_age);
            count += before - locks.len();
        }
        records.retain(|_, locks| !locks.is_empty());
        if count > 0 {
            warn!(count, "removed expired record locks");
        }
        count
    }
}

impl Default for MemoryRecordLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordLockManager for MemoryRecordLockManager {
    fn remove_lock(&self, record_identifier: &str, session: SessionId) -> bool {
        let mut records = self.records.lock();
        let Some(locks) = records.get_mut(record_identifier) else {
            return false;
        };
        let removed = locks.remove(&session).is_some();
        if locks.is_empty() {
            records.remove(record_identifier);
        }
        if removed {
            trace!(record = record_identifier, %session, "removed record lock");
        }
        removed
    }

    fn remove_all_locks_except(&self, session: SessionId, keep: &str) -> usize {
        let mut records = self.records.lock();
        let mut count = 0;
        for (record, locks) in records.iter_mut() {
            if record == keep {
                continue;
            }
            if locks.remove(&session).is_some() {
                count += 1;
            }
        }
        records.retain(|_, locks| !locks.is_empty());
        count
    }

    fn acquire_lock(
        &self,
        record_identifier: &str,
        session: SessionId,
        limit: u32,
    ) -> Result<(), LockError> {
        let mut records = self.records.lock();
        if let Some(locks) = records.get_mut(record_identifier) {
            if let Some(max_age) = self.max_age {
                let before = locks.len();
                locks.retain(|_, created| created.elapsed() <= max_age);
                if locks.len() < before {
                    warn!(
                        record = record_identifier,
                        count = before - locks.len(),
                        "removed expired record locks"
                    );
                }
            }
            trace!(
                record = record_identifier,
                count = locks.len(),
                "record is currently locked"
            );
            if let Some(created) = locks.get_mut(&session) {
                *created = Instant::now();
                return Ok(());
            }
        }

        let held = records.get(record_identifier).map_or(0, HashMap::len);
        if held >= limit as usize {
            if held == 0 {
                records.remove(record_identifier);
            }
            return Err(LockError::CapacityExceeded {
                identifier: record_identifier.to_string(),
                limit,
            });
        }
        records
            .entry(record_identifier.to_string())
            .or_default()
            .insert(session, Instant::now());
        trace!(record = record_identifier, %session, "added record lock");
        Ok(())
    }
}
