use std::sync::atomic::{AtomicUsize, Ordering};

use folio_core::{LockError, MemoryCatalog, MemoryRecordLockManager, RecordLockManager, SessionId};

const CATALOG: &str = r#"{
    "elements": [
        {"id": 500, "record_identifier": "PPN123", "logid": "LOG_0000", "docstruct_type": "monograph"},
        {"id": 501, "record_identifier": "PPN123", "logid": "LOG_0001", "docstruct_type": "chapter", "parent": 500, "first_page": 3},
        {"id": 502, "record_identifier": "PPN123", "logid": "LOG_0003", "docstruct_type": "section", "parent": 501, "first_page": 4},
        {"id": 600, "record_identifier": "PPN_LIMITED", "docstruct_type": "monograph",
         "access_conditions": ["restricted"], "concurrent_view_limit": 1},
        {"id": 700, "record_identifier": "PPN_DELETED", "docstruct_type": "monograph", "deleted": true},
        {"id": 800, "record_identifier": "PPN_PRIVATE", "docstruct_type": "monograph", "access_conditions": ["private"]},
        {"id": 900, "record_identifier": "PPN_MOVED", "docstruct_type": "monograph", "access_conditions": ["moving"]},
        {"id": 100, "record_identifier": "ANCHOR1", "docstruct_type": "periodical", "anchor": true},
        {"id": 200, "record_identifier": "VOL1", "docstruct_type": "volume", "volume": true, "parent": 100},
        {"id": 300, "record_identifier": "VOL2", "docstruct_type": "volume", "volume": true, "parent": 100},
        {"id": 400, "record_identifier": "VOL3", "docstruct_type": "volume", "volume": true, "parent": 100}
    ],
    "pages": {
        "PPN123": [
            {"order": 1}, {"order": 2},
            {"order": 3, "owner": 501}, {"order": 4, "owner": 501}, {"order": 5, "owner": 501},
            {"order": 6, "owner": 501}, {"order": 7, "owner": 501}, {"order": 8, "owner": 501},
            {"order": 9, "owner": 501}, {"order": 10, "owner": 501}
        ],
        "PPN_LIMITED": [{"order": 1}, {"order": 2}]
    },
    "licenses": [
        {"name": "restricted", "open": true, "concurrent_views_limit": true},
        {"name": "moving", "open": true, "redirect_url": "https://example.org/moved"}
    ]
}"#;

pub(crate) fn fixture() -> MemoryCatalog {
    MemoryCatalog::from_json_str(CATALOG).unwrap()
}

/// Lock manager that counts acquisitions.
#[derive(Default)]
pub(crate) struct CountingLocks {
    pub(crate) inner: MemoryRecordLockManager,
    acquired: AtomicUsize,
}

impl CountingLocks {
    pub(crate) fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

impl RecordLockManager for CountingLocks {
    fn remove_lock(&self, record_identifier: &str, session: SessionId) -> bool {
        self.inner.remove_lock(record_identifier, session)
    }

    fn remove_all_locks_except(&self, session: SessionId, keep: &str) -> usize {
        self.inner.remove_all_locks_except(session, keep)
    }

    fn acquire_lock(
        &self,
        record_identifier: &str,
        session: SessionId,
        limit: u32,
    ) -> Result<(), LockError> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.inner.acquire_lock(record_identifier, session, limit)
    }
}
