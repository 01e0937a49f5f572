//! In-process counters for index scans.
//!
//! Lock-free so cursors can bump them on every row.

use std::sync::atomic::{AtomicU64, Ordering};

/// Aggregated counters shared by every cursor on a node.
#[derive(Debug, Default)]
pub struct ScanMetrics {
    /// Cursors that opened a scan handle.
    cursors_opened: AtomicU64,
    /// Remote fetch calls issued.
    batches_fetched: AtomicU64,
    /// Index entries received from fetches, counted before decoding.
    entries_returned: AtomicU64,
    /// Primary-key lookups issued by `get`.
    point_lookups: AtomicU64,
    /// Lookups that found no primary row.
    dangling_entries: AtomicU64,
    /// Scan handles released successfully.
    handles_released: AtomicU64,
    /// Scan handle releases that failed and were swallowed.
    release_failures: AtomicU64,
}

/// Immutable snapshot view of [`ScanMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanMetricsSnapshot {
    pub cursors_opened: u64,
    pub batches_fetched: u64,
    pub entries_returned: u64,
    pub point_lookups: u64,
    pub dangling_entries: u64,
    pub handles_released: u64,
    pub release_failures: u64,
}

impl ScanMetrics {
    pub fn record_cursor_opened(&self) {
        self.cursors_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self, entries: usize) {
        self.batches_fetched.fetch_add(1, Ordering::Relaxed);
        self.entries_returned
            .fetch_add(entries as u64, Ordering::Relaxed);
    }

    pub fn record_point_lookup(&self, found: bool) {
        self.point_lookups.fetch_add(1, Ordering::Relaxed);
        if !found {
            self.dangling_entries.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_release(&self, ok: bool) {
        if ok {
            self.handles_released.fetch_add(1, Ordering::Relaxed);
        } else {
            self.release_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> ScanMetricsSnapshot {
        ScanMetricsSnapshot {
            cursors_opened: self.cursors_opened.load(Ordering::Relaxed),
            batches_fetched: self.batches_fetched.load(Ordering::Relaxed),
            entries_returned: self.entries_returned.load(Ordering::Relaxed),
            point_lookups: self.point_lookups.load(Ordering::Relaxed),
            dangling_entries: self.dangling_entries.load(Ordering::Relaxed),
            handles_released: self.handles_released.load(Ordering::Relaxed),
            release_failures: self.release_failures.load(Ordering::Relaxed),
        }
    }
}
