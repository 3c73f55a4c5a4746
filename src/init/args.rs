// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tower::BoxError;

use crate::collector::CollectorIdentity;
use crate::init::parse;
use crate::pump::PumpConfig;
use crate::spool::record::DEFAULT_MAX_RECORD_SIZE;

const ONE_HOUR: Duration = Duration::from_secs(3600);
const FIVE_MINUTES: Duration = Duration::from_secs(300);

#[derive(Debug, Args, Clone)]
pub struct SenderRun {
    /// Name of this sender instance, reported to the collector
    #[arg(long, env = "CDRSENDER_INSTANCE_NAME")]
    pub instance_name: String,

    /// Base URL of the collector (http or https)
    #[arg(long, env = "CDRSENDER_COLLECTOR_URL")]
    pub collector_url: String,

    /// Directory the CDR files are written to
    #[arg(long, env = "CDRSENDER_SPOOL_PATH")]
    pub spool_path: PathBuf,

    /// Only files starting with this prefix are read
    #[arg(long, env = "CDRSENDER_FILE_PREFIX", default_value = "")]
    pub file_prefix: String,

    /// Sleep after reaching the end of the current file
    #[arg(long, env = "CDRSENDER_POLL_INTERVAL", default_value = "100ms", value_parser = humantime::parse_duration)]
    pub poll_interval: Duration,

    /// Time without new records before looking for a newer file
    #[arg(long, env = "CDRSENDER_SWITCH_FILE_INTERVAL", default_value = "5s", value_parser = humantime::parse_duration)]
    pub switch_file_interval: Duration,

    /// Sleep before re-reading after a read error or malformed record
    #[arg(long, env = "CDRSENDER_ERROR_REREAD_INTERVAL", default_value = "1s", value_parser = humantime::parse_duration)]
    pub error_reread_interval: Duration,

    /// Failed reads at one position before skipping to the next file
    #[arg(long, env = "CDRSENDER_ERROR_RETRY_COUNT", default_value = "5")]
    pub error_retry_count: u32,

    /// How often average throughput and latency are computed
    #[arg(long, env = "CDRSENDER_STATS_INTERVAL", default_value = "60s", value_parser = humantime::parse_duration)]
    pub stats_interval: Duration,

    /// Delay between collector request attempts
    #[arg(long, env = "CDRSENDER_HTTP_RETRY_INTERVAL", default_value = "10s", value_parser = humantime::parse_duration)]
    pub http_retry_interval: Duration,

    /// Timeout for a single collector request
    #[arg(long, env = "CDRSENDER_HTTP_REQUEST_TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
    pub http_request_timeout: Duration,

    /// Longest accepted record in bytes
    #[arg(long, env = "CDRSENDER_MAX_RECORD_SIZE", default_value_t = DEFAULT_MAX_RECORD_SIZE)]
    pub max_record_size: usize,

    /// Address the Prometheus metrics endpoint listens on
    #[arg(long, env = "CDRSENDER_METRICS_ENDPOINT", default_value = "localhost:9090", value_parser = parse::parse_endpoint)]
    pub metrics_endpoint: SocketAddr,

    /// Host name reported to the collector, defaults to the OS host name
    #[arg(long, env = "CDRSENDER_HOST_NAME")]
    pub host_name: Option<String>,
}

/// Validated settings the sender runs with.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub identity: CollectorIdentity,
    pub collector_url: String,
    pub spool_path: PathBuf,
    pub file_prefix: String,
    pub pump: PumpConfig,
    pub http_retry_interval: Duration,
    pub http_request_timeout: Duration,
    pub max_record_size: usize,
    pub metrics_endpoint: SocketAddr,
}

impl SenderRun {
    /// Check every option and resolve the defaults that depend on the host.
    pub fn build_config(&self) -> Result<SenderConfig, BoxError> {
        if self.instance_name.trim().is_empty() {
            return Err("instance name must not be empty".into());
        }
        if self.collector_url.trim().is_empty() {
            return Err("collector URL must not be empty".into());
        }

        check_range("poll interval", self.poll_interval, Duration::ZERO, ONE_HOUR)?;
        check_range(
            "switch file interval",
            self.switch_file_interval,
            Duration::ZERO,
            ONE_HOUR,
        )?;
        check_range(
            "error reread interval",
            self.error_reread_interval,
            Duration::from_millis(100),
            ONE_HOUR,
        )?;
        check_range(
            "stats interval",
            self.stats_interval,
            Duration::from_secs(1),
            FIVE_MINUTES,
        )?;
        check_range(
            "HTTP retry interval",
            self.http_retry_interval,
            Duration::from_secs(1),
            FIVE_MINUTES,
        )?;
        if self.http_request_timeout.is_zero() {
            return Err("HTTP request timeout must be greater than zero".into());
        }
        if self.max_record_size < 2 {
            return Err(format!(
                "max record size must be at least 2 bytes, got {}",
                self.max_record_size
            )
            .into());
        }

        let pump = PumpConfig {
            poll_interval: self.poll_interval,
            switch_file_interval: self.switch_file_interval,
            error_reread_interval: self.error_reread_interval,
            error_retry_count: self.error_retry_count,
            stats_interval: self.stats_interval,
        };
        pump.validate()?;

        let spool_path = std::path::absolute(&self.spool_path)
            .map_err(|e| format!("invalid spool path {:?}: {}", self.spool_path, e))?;
        if !spool_path.is_dir() {
            return Err(format!("spool path {:?} is not a directory", spool_path).into());
        }

        let host = match &self.host_name {
            Some(host) => host.clone(),
            None => gethostname::gethostname().to_string_lossy().into_owned(),
        };
        if host.trim().is_empty() {
            return Err("host name must not be empty".into());
        }

        Ok(SenderConfig {
            identity: CollectorIdentity::new(host, self.instance_name.clone()),
            collector_url: self.collector_url.clone(),
            spool_path,
            file_prefix: self.file_prefix.clone(),
            pump,
            http_retry_interval: self.http_retry_interval,
            http_request_timeout: self.http_request_timeout,
            max_record_size: self.max_record_size,
            metrics_endpoint: self.metrics_endpoint,
        })
    }
}

fn check_range(name: &str, value: Duration, min: Duration, max: Duration) -> Result<(), BoxError> {
    if value < min || value > max {
        return Err(format!(
            "{} must be between {} and {}, got {}",
            name,
            humantime::format_duration(min),
            humantime::format_duration(max),
            humantime::format_duration(value)
        )
        .into());
    }
    Ok(())
}
