// SPDX-License-Identifier: Apache-2.0

//! The read, deliver, advance loop.
//!
//! Exactly one record is in flight at any time. A record is read at the
//! cursor, handed to the collector, and the checkpoint the collector answers
//! with becomes the new cursor position. Nothing is skipped unless the retry
//! budget for a position is exhausted, and the cursor never moves for a
//! record the collector has not acknowledged.
//!
//! Read outcomes drive different recovery paths:
//! - read errors and malformed records are retried in place, then the file is
//!   skipped if a newer one exists
//! - end of file is debounced, then a newer file is probed with a trial read
//!   before the cursor commits to it
//!
//! Spool reads and listings run on the blocking pool so cancellation is seen
//! even while the file system is stalled.

pub mod config;


use opentelemetry::metrics::Histogram;
use std::time::{Duration, SystemTime};
use tokio::select;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::collector::DeliveryClient;
use crate::spool::{self, ReadOutcome, Record, RecordReader, RotationCursor};
use crate::stats::StatsAggregator;

pub use config::PumpConfig;

/// Counters for the current statistics window.
#[derive(Debug)]
struct StatsWindow {
    started: Instant,
    records: u64,
    processing_time: Duration,
}

impl StatsWindow {
    fn new(started: Instant) -> Self {
        Self {
            started,
            records: 0,
            processing_time: Duration::ZERO,
        }
    }
}

pub struct Pump<D> {
    config: PumpConfig,
    cursor: RotationCursor,
    reader: RecordReader,
    client: D,
    stats: StatsAggregator,
    record_lengths: Option<Histogram<u64>>,
    /// Consecutive read errors or malformed records at the current position
    consecutive_errors: u32,
    /// Last successful read, or last rotation probe
    last_record_at: Instant,
    window: StatsWindow,
}

impl<D: DeliveryClient> Pump<D> {
    pub fn new(
        config: PumpConfig,
        cursor: RotationCursor,
        reader: RecordReader,
        client: D,
        stats: StatsAggregator,
    ) -> Self {
        let now = Instant::now();
        Self {
            config,
            cursor,
            reader,
            client,
            stats,
            record_lengths: None,
            consecutive_errors: 0,
            last_record_at: now,
            window: StatsWindow::new(now),
        }
    }

    /// Record the length of every acknowledged record into `histogram`.
    pub fn with_record_lengths(mut self, histogram: Histogram<u64>) -> Self {
        self.record_lengths = Some(histogram);
        self
    }

    pub fn cursor(&self) -> &RotationCursor {
        &self.cursor
    }

    pub fn client(&self) -> &D {
        &self.client
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Pump records until `cancel` fires.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(directory = ?self.cursor.directory(), "Starting CDR pump");

        if !self.prepare(&cancel).await {
            return;
        }

        info!(
            file = self.cursor.file_name(),
            offset = self.cursor.offset(),
            "CDR pump positioned"
        );

        while !cancel.is_cancelled() {
            self.step(&cancel).await;
        }

        info!(
            file = self.cursor.file_name(),
            offset = self.cursor.offset(),
            "CDR pump stopped"
        );
    }

    /// Make sure the cursor points at a file and reset the loop timers.
    ///
    /// Returns `false` if cancelled while waiting for the first file.
    pub async fn prepare(&mut self, cancel: &CancellationToken) -> bool {
        if !self.cursor.wait_for_first_file(cancel).await {
            return false;
        }

        let now = Instant::now();
        self.consecutive_errors = 0;
        self.last_record_at = now;
        self.window = StatsWindow::new(now);
        true
    }

    /// Run a single loop iteration.
    ///
    /// Returns `true` if a record was delivered and acknowledged.
    pub async fn step(&mut self, cancel: &CancellationToken) -> bool {
        let mut delivered = false;

        if let Some(record) = self.next_record(cancel).await {
            delivered = self.deliver(record, cancel).await;
        }

        self.publish_averages(Instant::now());
        delivered
    }

    async fn deliver(&mut self, record: Record, cancel: &CancellationToken) -> bool {
        let read_started = Instant::now();
        self.stats
            .on_record_read(SystemTime::now(), &record.source_file, record.source_offset);

        // Shutting down: the record stays unacknowledged and is read again on restart.
        let Some(checkpoint) = self.client.process(&record, cancel).await else {
            return false;
        };

        self.cursor
            .set_position(checkpoint.file_name, checkpoint.offset);
        self.stats
            .on_record_processed(SystemTime::now(), record.length);
        if let Some(histogram) = &self.record_lengths {
            histogram.record(record.length as u64, &[]);
        }

        self.window.records += 1;
        self.window.processing_time += read_started.elapsed();
        true
    }

    async fn next_record(&mut self, cancel: &CancellationToken) -> Option<Record> {
        match read_at(self.reader.clone(), self.cursor.clone(), cancel).await? {
            ReadOutcome::Record(record) => {
                self.consecutive_errors = 0;
                self.last_record_at = Instant::now();
                Some(record)
            }
            ReadOutcome::EndOfFile => {
                self.consecutive_errors = 0;
                self.on_end_of_file(cancel).await
            }
            ReadOutcome::ReadError(_) | ReadOutcome::Malformed => {
                self.stats.on_processing_error();
                self.on_read_failure(cancel).await;
                None
            }
        }
    }

    /// Retry in place until the budget is spent, then skip to a newer file.
    ///
    /// Unlike rotation on end of file, skipping does not trial-read the next
    /// file first.
    async fn on_read_failure(&mut self, cancel: &CancellationToken) {
        self.consecutive_errors += 1;
        if self.consecutive_errors < self.config.error_retry_count {
            pause(self.config.error_reread_interval, cancel).await;
            return;
        }

        self.consecutive_errors = 0;
        let failed_file = self.cursor.file_name().to_string();

        match self.cursor.advance(cancel).await {
            Some(true) => {}
            Some(false) => {
                // Nothing newer to skip to: keep retrying the same file.
                pause(self.config.error_reread_interval, cancel).await;
                return;
            }
            None => return,
        }

        info!(
            errors = self.config.error_retry_count,
            from = %failed_file,
            to = self.cursor.file_name(),
            "Too many read errors, switching to the next file"
        );
    }

    async fn on_end_of_file(&mut self, cancel: &CancellationToken) -> Option<Record> {
        let now = Instant::now();
        if now.duration_since(self.last_record_at) < self.config.switch_file_interval {
            pause(self.config.poll_interval, cancel).await;
            return None;
        }

        // Also throttles the next probe if this one does not switch.
        self.last_record_at = now;

        let mut candidate = self.cursor.clone();
        if !candidate.advance(cancel).await? {
            pause(self.config.poll_interval, cancel).await;
            return None;
        }

        let record = match read_at(self.reader.clone(), candidate.clone(), cancel).await? {
            ReadOutcome::Record(record) => Some(record),
            ReadOutcome::EndOfFile => None,
            ReadOutcome::ReadError(_) | ReadOutcome::Malformed => {
                debug!(
                    current = self.cursor.file_name(),
                    next = candidate.file_name(),
                    "Next file is not readable yet, staying on the current file"
                );
                return None;
            }
        };

        self.cursor = candidate;
        info!(file = self.cursor.file_name(), "Switched to the next file");
        record
    }

    fn publish_averages(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.window.started);
        if elapsed.is_zero() || elapsed < self.config.stats_interval {
            return;
        }

        let records = self.window.records;
        let avg_throughput = records as f64 / elapsed.as_secs_f64();
        let avg_processing_time = if records > 0 {
            self.window.processing_time.as_secs_f64() / records as f64
        } else {
            0.0
        };

        self.stats.on_averages(avg_processing_time, avg_throughput);
        debug!(
            records,
            avg_throughput,
            avg_processing_ms = avg_processing_time * 1000.0,
            "CDR pump statistics"
        );

        self.window = StatsWindow::new(now);
    }
}

/// Read at `cursor` on the blocking pool. `None` if cancelled first.
async fn read_at(
    reader: RecordReader,
    cursor: RotationCursor,
    cancel: &CancellationToken,
) -> Option<ReadOutcome> {
    spool::run_blocking(cancel, move || reader.read_one(&cursor)).await
}

async fn pause(duration: Duration, cancel: &CancellationToken) {
    select! {
        _ = tokio::time::sleep(duration) => {},
        _ = cancel.cancelled() => {},
    }
}
