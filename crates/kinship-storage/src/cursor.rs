//! `SCAN` cursor bookkeeping.
//!
//! A cursor handed to a caller names the last key of the page it ended,
//! so the next page resumes with a range seek instead of re-walking the
//! keys already returned. Cursors are single-use; only the newest
//! [`MAX_OPEN_CURSORS`] are kept.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{StorageError, StorageResult};

/// Open cursors kept before the oldest is dropped.
pub(crate) const MAX_OPEN_CURSORS: usize = 1024;

#[derive(Debug, Default)]
struct Open {
    last_id: u64,
    resume_after: BTreeMap<u64, String>,
}

/// Open scan cursors, keyed by the id handed to callers.
#[derive(Debug, Default)]
pub(crate) struct ScanCursors {
    open: Mutex<Open>,
}

impl ScanCursors {
    /// The key a cursor resumes after; `None` starts a new iteration.
    pub(crate) fn resume(&self, cursor: u64) -> StorageResult<Option<String>> {
        if cursor == 0 {
            return Ok(None);
        }
        let mut open = self
            .open
            .lock()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        open.resume_after
            .remove(&cursor)
            .map(Some)
            .ok_or(StorageError::InvalidCursor(cursor))
    }

    /// Hand out a cursor that resumes after `last_key`.
    pub(crate) fn park(&self, last_key: String) -> StorageResult<u64> {
        let mut open = self
            .open
            .lock()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let id = open.last_id.checked_add(1).unwrap_or(1);
        open.last_id = id;
        open.resume_after.insert(id, last_key);
        if open.resume_after.len() > MAX_OPEN_CURSORS {
            open.resume_after.pop_first();
        }
        Ok(id)
    }
}
