// SPDX-License-Identifier: Apache-2.0

//! Exposes the shipper statistics as OpenTelemetry instruments.

pub mod metrics_server;

use opentelemetry::metrics::{Histogram, Meter, ObservableCounter, ObservableGauge};
use opentelemetry::KeyValue;

use crate::stats::StatsAggregator;

pub use metrics_server::MetricsServer;

/// Bucket bounds, in bytes, for the record length distribution.
const RECORD_LENGTH_BOUNDARIES: [f64; 10] = [
    128.0, 256.0, 512.0, 1024.0, 2048.0, 4096.0, 8192.0, 16384.0, 65536.0, 262144.0,
];

/// Instruments backed by a [`StatsAggregator`].
///
/// The observable instruments read a fresh snapshot when the exporter
/// collects. The record length histogram is the exception: the pump records
/// into it as records are acknowledged, see [`StatsMetrics::record_lengths`].
pub struct StatsMetrics {
    record_lengths: Histogram<u64>,
    _last_read_time: ObservableGauge<f64>,
    _last_read_position: ObservableGauge<u64>,
    _last_processed_time: ObservableGauge<f64>,
    _avg_processing_time: ObservableGauge<f64>,
    _avg_processing_speed: ObservableGauge<f64>,
    _processing_errors: ObservableCounter<u64>,
    _processed_records: ObservableCounter<u64>,
    _processed_bytes: ObservableCounter<u64>,
}

impl StatsMetrics {
    pub fn register(meter: &Meter, stats: StatsAggregator) -> Self {
        let s = stats.clone();
        let last_read_time = meter
            .f64_observable_gauge("cdr_last_read_time")
            .with_description("Unix time of the last record read from the spool.")
            .with_callback(move |observer| {
                observer.observe(s.snapshot().last_read_unix_time, &[]);
            })
            .build();

        let s = stats.clone();
        let last_read_position = meter
            .u64_observable_gauge("cdr_last_read_position")
            .with_description("Offset of the last record read, labelled with its file.")
            .with_callback(move |observer| {
                let snapshot = s.snapshot();
                observer.observe(
                    snapshot.last_offset,
                    &[KeyValue::new("file", snapshot.last_file)],
                );
            })
            .build();

        let s = stats.clone();
        let last_processed_time = meter
            .f64_observable_gauge("cdr_last_processed_time")
            .with_description("Unix time the collector last acknowledged a record.")
            .with_callback(move |observer| {
                observer.observe(s.snapshot().last_processed_unix_time, &[]);
            })
            .build();

        let s = stats.clone();
        let avg_processing_time = meter
            .f64_observable_gauge("cdr_avr_processing_time")
            .with_description("Mean seconds from read to acknowledgement over the last window.")
            .with_callback(move |observer| {
                observer.observe(s.snapshot().avg_processing_time_sec, &[]);
            })
            .build();

        let s = stats.clone();
        let avg_processing_speed = meter
            .f64_observable_gauge("cdr_avr_processing_speed")
            .with_description("Records acknowledged per second over the last window.")
            .with_callback(move |observer| {
                observer.observe(s.snapshot().avg_throughput_per_sec, &[]);
            })
            .build();

        let s = stats.clone();
        let processing_errors = meter
            .u64_observable_counter("cdr_processing_errors")
            .with_description("Read errors and malformed records encountered.")
            .with_callback(move |observer| {
                observer.observe(s.snapshot().processing_errors, &[]);
            })
            .build();

        let s = stats.clone();
        let processed_records = meter
            .u64_observable_counter("cdr_processed_records")
            .with_description("Records acknowledged by the collector.")
            .with_callback(move |observer| {
                observer.observe(s.snapshot().records_processed, &[]);
            })
            .build();

        let record_lengths = meter
            .u64_histogram("cdr_processing_summary")
            .with_description("Lengths of records acknowledged by the collector.")
            .with_unit("By")
            .with_boundaries(RECORD_LENGTH_BOUNDARIES.to_vec())
            .build();

        let s = stats;
        let processed_bytes = meter
            .u64_observable_counter("cdr_processed_bytes")
            .with_description("Bytes of records acknowledged by the collector.")
            .with_callback(move |observer| {
                observer.observe(s.snapshot().bytes_processed, &[]);
            })
            .build();

        Self {
            record_lengths,
            _last_read_time: last_read_time,
            _last_read_position: last_read_position,
            _last_processed_time: last_processed_time,
            _avg_processing_time: avg_processing_time,
            _avg_processing_speed: avg_processing_speed,
            _processing_errors: processing_errors,
            _processed_records: processed_records,
            _processed_bytes: processed_bytes,
        }
    }
}

impl StatsMetrics {
    /// Histogram the pump records acknowledged record lengths into.
    pub fn record_lengths(&self) -> Histogram<u64> {
        self.record_lengths.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::metrics::MeterProvider;
    use opentelemetry_prometheus_text_exporter::PrometheusExporter;
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use std::time::SystemTime;

    fn export(exporter: &PrometheusExporter) -> String {
        let mut output = Vec::new();
        exporter.export(&mut output).unwrap();
        String::from_utf8(output).unwrap()
    }

    fn sample(lines: &[&str], suffix: &str) -> Option<f64> {
        lines
            .iter()
            .find(|line| line.split(['{', ' ']).next().is_some_and(|name| name.ends_with(suffix)))
            .and_then(|line| line.rsplit(' ').next())
            .and_then(|value| value.parse().ok())
    }

    #[test]
    fn test_all_instruments_exported() {
        let exporter = PrometheusExporter::default();
        let provider = SdkMeterProvider::builder()
            .with_reader(exporter.clone())
            .build();
        let stats = StatsAggregator::new();
        let metrics = StatsMetrics::register(&provider.meter("test"), stats.clone());

        stats.on_record_read(SystemTime::now(), "cdr_007.cdr", 64);
        stats.on_record_processed(SystemTime::now(), 32);
        metrics.record_lengths().record(32, &[]);
        stats.on_processing_error();
        stats.on_averages(0.25, 4.0);

        let body = export(&exporter);
        for name in [
            "cdr_last_read_time",
            "cdr_last_read_position",
            "cdr_last_processed_time",
            "cdr_avr_processing_time",
            "cdr_avr_processing_speed",
            "cdr_processing_errors",
            "cdr_processed_records",
            "cdr_processed_bytes",
            "cdr_processing_summary",
        ] {
            assert!(body.contains(name), "missing {} in:\n{}", name, body);
        }
        assert!(body.contains("cdr_007.cdr"));
    }

    #[test]
    fn test_record_lengths_are_a_distribution() {
        let exporter = PrometheusExporter::default();
        let provider = SdkMeterProvider::builder()
            .with_reader(exporter.clone())
            .build();
        let metrics = StatsMetrics::register(&provider.meter("test"), StatsAggregator::new());

        let histogram = metrics.record_lengths();
        for length in [100, 300, 5000] {
            histogram.record(length, &[]);
        }

        let body = export(&exporter);
        let summary: Vec<&str> = body
            .lines()
            .filter(|line| line.starts_with("cdr_processing_summary"))
            .collect();
        assert!(summary.iter().any(|line| line.contains("_bucket")), "{}", body);
        assert_eq!(sample(&summary, "_count"), Some(3.0), "{}", body);
        assert_eq!(sample(&summary, "_sum"), Some(5400.0), "{}", body);
    }

    #[test]
    fn test_observations_follow_stats() {
        let exporter = PrometheusExporter::default();
        let provider = SdkMeterProvider::builder()
            .with_reader(exporter.clone())
            .build();
        let stats = StatsAggregator::new();
        let _metrics = StatsMetrics::register(&provider.meter("test"), stats.clone());

        stats.on_record_read(SystemTime::now(), "cdr_001.cdr", 10);
        assert!(export(&exporter).contains("cdr_001.cdr"));

        stats.on_record_read(SystemTime::now(), "cdr_002.cdr", 0);
        assert!(export(&exporter).contains("cdr_002.cdr"));
    }
}
