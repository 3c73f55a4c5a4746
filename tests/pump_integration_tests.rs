// SPDX-License-Identifier: Apache-2.0

//! The pump against a live producer that keeps rotating files.

use cdrsender::collector::{
    CheckpointResponse, CollectorIdentity, CollectorTransport, Error, ProcessRecordRequest,
    Result, RetryingCollector, StartPositionRequest,
};
use cdrsender::pump::{Pump, PumpConfig};
use cdrsender::spool::{RecordReader, RotationCursor};
use cdrsender::stats::StatsAggregator;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const FILES: usize = 4;
const RECORDS_PER_FILE: usize = 3;

/// Fails every fourth request and only remembers acknowledged records.
#[derive(Clone, Default)]
struct FlakyCollector {
    attempts: Arc<Mutex<usize>>,
    acknowledged: Arc<Mutex<Vec<String>>>,
}

impl CollectorTransport for FlakyCollector {
    async fn get_start_position(&self, _request: &StartPositionRequest) -> Result<CheckpointResponse> {
        Ok(CheckpointResponse::default())
    }

    async fn process_record(&self, request: &ProcessRecordRequest) -> Result<CheckpointResponse> {
        {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            if *attempts % 4 == 0 {
                return Err(Error::Transport("connection reset".to_string()));
            }
        }

        self.acknowledged.lock().unwrap().push(request.data.clone());
        Ok(CheckpointResponse {
            start_file: request.filename.clone(),
            start_position: (request.position + request.record_length as u64) as i64,
        })
    }
}

fn append(path: &Path, line: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(line.as_bytes()).unwrap();
}

async fn produce(dir: &Path) {
    let mut n = 0;
    for file in 1..=FILES {
        let path = dir.join(format!("cdr_{:03}.cdr", file));
        for _ in 0..RECORDS_PER_FILE {
            n += 1;
            append(&path, &format!("{{\"n\":{}}}\n", n));
            sleep(Duration::from_secs(1)).await;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_pump_follows_rotating_producer() {
    let dir = TempDir::new().unwrap();
    let transport = FlakyCollector::default();
    let acknowledged = transport.acknowledged.clone();

    let client = RetryingCollector::new(
        transport,
        CollectorIdentity::new("host", "instance"),
        Duration::from_secs(10),
    );
    let cursor = RotationCursor::new(dir.path(), "cdr_").unwrap();
    let mut pump = Pump::new(
        PumpConfig::default(),
        cursor,
        RecordReader::default(),
        client,
        StatsAggregator::new(),
    );

    let cancel = CancellationToken::new();
    let pump_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            pump.run(cancel).await;
            pump
        })
    };

    produce(dir.path()).await;

    let total = FILES * RECORDS_PER_FILE;
    for _ in 0..600 {
        if acknowledged.lock().unwrap().len() >= total {
            break;
        }
        sleep(Duration::from_secs(1)).await;
    }
    cancel.cancel();
    let pump = pump_handle.await.unwrap();

    let expected: Vec<String> = (1..=total).map(|n| format!("{{\"n\":{}}}", n)).collect();
    assert_eq!(*acknowledged.lock().unwrap(), expected);
    let last_file = format!("cdr_{:03}.cdr", FILES);
    let last_len = std::fs::metadata(dir.path().join(&last_file)).unwrap().len();
    assert_eq!(pump.cursor().file_name(), last_file);
    assert_eq!(pump.cursor().offset(), last_len);
}

#[tokio::test(start_paused = true)]
async fn test_restart_resumes_where_collector_left_off() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cdr_001.cdr");
    for n in 1..=6 {
        append(&path, &format!("{{\"n\":{}}}\n", n));
    }

    // First run stops after three acknowledgements.
    let transport = FlakyCollector::default();
    let first_acks = transport.acknowledged.clone();
    let client = RetryingCollector::new(
        transport,
        CollectorIdentity::new("host", "instance"),
        Duration::from_secs(1),
    );
    let mut first = Pump::new(
        PumpConfig::default(),
        RotationCursor::new(dir.path(), "cdr_").unwrap(),
        RecordReader::default(),
        client,
        StatsAggregator::new(),
    );
    let cancel = CancellationToken::new();
    assert!(first.prepare(&cancel).await);
    while first_acks.lock().unwrap().len() < 3 {
        first.step(&cancel).await;
    }
    let checkpoint = first.cursor().checkpoint();

    let transport = FlakyCollector::default();
    let second_acks = transport.acknowledged.clone();
    let client = RetryingCollector::new(
        transport,
        CollectorIdentity::new("host", "instance"),
        Duration::from_secs(1),
    );
    let mut second = Pump::new(
        PumpConfig::default(),
        RotationCursor::new(dir.path(), "cdr_")
            .unwrap()
            .with_checkpoint(checkpoint),
        RecordReader::default(),
        client,
        StatsAggregator::new(),
    );
    assert!(second.prepare(&cancel).await);
    while second_acks.lock().unwrap().len() < 3 {
        second.step(&cancel).await;
    }

    let mut all = first_acks.lock().unwrap().clone();
    all.extend(second_acks.lock().unwrap().iter().cloned());
    let expected: Vec<String> = (1..=6).map(|n| format!("{{\"n\":{}}}", n)).collect();
    assert_eq!(all, expected);
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_reaches_pump_stuck_in_a_read() {
    let dir = TempDir::new().unwrap();
    let fifo = dir.path().join("cdr_001.cdr");
    let status = std::process::Command::new("mkfifo")
        .arg(&fifo)
        .status()
        .unwrap();
    assert!(status.success());

    let client = RetryingCollector::new(
        FlakyCollector::default(),
        CollectorIdentity::new("host", "instance"),
        Duration::from_secs(1),
    );
    let mut pump = Pump::new(
        PumpConfig::default(),
        RotationCursor::new(dir.path(), "cdr_").unwrap(),
        RecordReader::default(),
        client,
        StatsAggregator::new(),
    );

    // Opening a FIFO with no writer blocks until one shows up.
    let cancel = CancellationToken::new();
    let pump_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { pump.run(cancel).await })
    };

    sleep(Duration::from_millis(300)).await;
    assert!(!pump_handle.is_finished());
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(3), pump_handle)
        .await
        .expect("pump did not return after cancel")
        .unwrap();

    // Release the parked open so the runtime can shut down.
    let writer = tokio::task::spawn_blocking(move || {
        drop(OpenOptions::new().write(true).open(&fifo).unwrap());
    });
    tokio::time::timeout(Duration::from_secs(3), writer)
        .await
        .unwrap()
        .unwrap();
}
