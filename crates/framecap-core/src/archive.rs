//! Bounded pre-roll archive of the most recent telemetry records.

use std::collections::VecDeque;

use crate::record::RawRecord;

/// Default archive capacity in records.
pub const DEFAULT_ARCHIVE_CAPACITY: usize = 500;

/// FIFO ring of the most recent records, oldest first.
///
/// Records are expected in non-decreasing time order. This is not
/// re-validated on push.
#[derive(Debug, Clone)]
pub struct ArchiveBuffer {
    records: VecDeque<RawRecord>,
    capacity: usize,
    total_pushed: u64,
}

impl ArchiveBuffer {
    /// Create an empty archive. A capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            total_pushed: 0,
        }
    }

    /// Append a record, evicting the oldest once at capacity.
    pub fn push(&mut self, record: RawRecord) {
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
        self.total_pushed += 1;
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Timestamp of the most recent record.
    pub fn latest(&self) -> Option<f64> {
        self.records.back().map(RawRecord::time)
    }

    /// Timestamp of the oldest retained record.
    pub fn earliest(&self) -> Option<f64> {
        self.records.front().map(RawRecord::time)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records pushed since creation, including evicted ones.
    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }

    pub fn iter(&self) -> impl Iterator<Item = &RawRecord> {
        self.records.iter()
    }

    /// Move the contents out in chronological order, leaving the archive empty.
    pub fn take(&mut self) -> Vec<RawRecord> {
        self.records.drain(..).collect()
    }
}

impl Default for ArchiveBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_ARCHIVE_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
