//! In-memory audit trail and running totals.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use plexus_core::types::RequestId;
use serde::{Deserialize, Serialize};

/// One completed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Request identifier.
    pub request_id: RequestId,
    /// Method, e.g. `GET`.
    pub method: String,
    /// Route path.
    pub path: String,
    /// Response status.
    pub status: u16,
    /// Time spent serving the request.
    pub duration_ms: u64,
    /// When the record was taken.
    pub recorded_at: DateTime<Utc>,
}

/// Counters persisted between runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTotals {
    /// Completed requests.
    pub requests: u64,
    /// Completed requests with a 5xx status.
    pub server_errors: u64,
    /// Requests refused by the path block list.
    pub blocked: u64,
    /// Extension failures seen on the lifecycle bus.
    pub plugin_failures: u64,
}

/// Read access to the audit trail, exported to other extensions.
pub trait AuditLog: Send + Sync {
    /// The `limit` most recent records, newest first.
    fn recent(&self, limit: usize) -> Vec<AuditRecord>;
    /// Current totals.
    fn totals(&self) -> AuditTotals;
}

#[derive(Debug, Default)]
struct Trail {
    records: VecDeque<AuditRecord>,
    totals: AuditTotals,
    dirty: bool,
}

/// Bounded audit trail shared by the extension's hooks.
#[derive(Debug)]
pub struct AuditRecorder {
    capacity: usize,
    trail: Mutex<Trail>,
}

impl AuditRecorder {
    /// Creates a recorder keeping at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            trail: Mutex::new(Trail::default()),
        }
    }

    /// Creates a recorder that continues from persisted `totals`.
    pub fn with_totals(capacity: usize, totals: AuditTotals) -> Self {
        let recorder = Self::new(capacity);
        recorder.trail.lock().totals = totals;
        recorder
    }

    /// Appends a record, evicting the oldest past capacity.
    pub fn record(&self, record: AuditRecord) {
        let mut trail = self.trail.lock();
        trail.totals.requests += 1;
        if record.status >= 500 {
            trail.totals.server_errors += 1;
        }
        if trail.records.len() == self.capacity {
            trail.records.pop_front();
        }
        trail.records.push_back(record);
        trail.dirty = true;
    }

    /// Counts a blocked request.
    pub fn record_blocked(&self) {
        let mut trail = self.trail.lock();
        trail.totals.blocked += 1;
        trail.dirty = true;
    }

    /// Counts an extension failure.
    pub fn record_plugin_failure(&self) {
        let mut trail = self.trail.lock();
        trail.totals.plugin_failures += 1;
        trail.dirty = true;
    }

    /// Returns the totals if they changed since the last call.
    pub fn take_dirty_totals(&self) -> Option<AuditTotals> {
        let mut trail = self.trail.lock();
        std::mem::take(&mut trail.dirty).then_some(trail.totals)
    }
}

impl AuditLog for AuditRecorder {
    fn recent(&self, limit: usize) -> Vec<AuditRecord> {
        self.trail
            .lock()
            .records
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    fn totals(&self) -> AuditTotals {
        self.trail.lock().totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, status: u16) -> AuditRecord {
        AuditRecord {
            request_id: RequestId::new(),
            method: "GET".into(),
            path: path.into(),
            status,
            duration_ms: 3,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_trail_is_bounded_and_newest_first() {
        let recorder = AuditRecorder::new(2);
        recorder.record(record("/a", 200));
        recorder.record(record("/b", 503));
        recorder.record(record("/c", 200));

        let recent: Vec<String> = recorder.recent(10).into_iter().map(|r| r.path).collect();
        assert_eq!(recent, vec!["/c", "/b"]);
        let totals = recorder.totals();
        assert_eq!(totals.requests, 3);
        assert_eq!(totals.server_errors, 1);
    }

    #[test]
    fn test_dirty_flag_resets() {
        let recorder = AuditRecorder::with_totals(4, AuditTotals { requests: 10, ..Default::default() });
        assert_eq!(recorder.take_dirty_totals(), None);

        recorder.record_blocked();
        let totals = recorder.take_dirty_totals().expect("changed");
        assert_eq!(totals.requests, 10);
        assert_eq!(totals.blocked, 1);
        assert_eq!(recorder.take_dirty_totals(), None);
    }
}
