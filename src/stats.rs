// SPDX-License-Identifier: Apache-2.0

//! Shared throughput and latency counters.
//!
//! The pump is the only writer; the metrics exporter reads consistent copies
//! through [`StatsAggregator::snapshot`].

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Point-in-time copy of the shipper statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    /// Unix time (seconds) of the last successful record read
    pub last_read_unix_time: f64,
    /// File the last record was read from
    pub last_file: String,
    /// Offset the last record was read from
    pub last_offset: u64,
    /// Unix time (seconds) the collector last acknowledged a record
    pub last_processed_unix_time: f64,
    /// Records per second over the last statistics window
    pub avg_throughput_per_sec: f64,
    /// Mean read-to-acknowledge latency over the last statistics window
    pub avg_processing_time_sec: f64,
    /// Read errors and malformed records seen
    pub processing_errors: u64,
    /// Records acknowledged by the collector
    pub records_processed: u64,
    /// Bytes of acknowledged records, delimiters included
    pub bytes_processed: u64,
}

/// Mutex guarded [`Stats`], cheap to clone and share between threads.
#[derive(Debug, Clone, Default)]
pub struct StatsAggregator {
    inner: Arc<Mutex<Stats>>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_record_read(&self, at: SystemTime, file: &str, offset: u64) {
        let ts = unix_seconds(at);
        let mut stats = self.inner.lock().unwrap();
        stats.last_read_unix_time = ts;
        if stats.last_file != file {
            stats.last_file.clear();
            stats.last_file.push_str(file);
        }
        stats.last_offset = offset;
    }

    pub fn on_record_processed(&self, at: SystemTime, length: usize) {
        let ts = unix_seconds(at);
        let mut stats = self.inner.lock().unwrap();
        stats.last_processed_unix_time = ts;
        stats.records_processed += 1;
        stats.bytes_processed += length as u64;
    }

    pub fn on_processing_error(&self) {
        self.inner.lock().unwrap().processing_errors += 1;
    }

    pub fn on_averages(&self, avg_processing_time_sec: f64, avg_throughput_per_sec: f64) {
        let mut stats = self.inner.lock().unwrap();
        stats.avg_processing_time_sec = avg_processing_time_sec;
        stats.avg_throughput_per_sec = avg_throughput_per_sec;
    }

    pub fn snapshot(&self) -> Stats {
        self.inner.lock().unwrap().clone()
    }

    /// Clear everything. Only meant for operator driven resets.
    pub fn reset(&self) {
        *self.inner.lock().unwrap() = Stats::default();
    }
}

fn unix_seconds(at: SystemTime) -> f64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
