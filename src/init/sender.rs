// SPDX-License-Identifier: Apache-2.0

use opentelemetry::global;
use opentelemetry::metrics::MeterProvider;
use opentelemetry_prometheus_text_exporter::PrometheusExporter;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::select;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, info, warn};

use crate::collector::{DeliveryClient, HttpCollector, RetryingCollector};
use crate::init::args::SenderConfig;
use crate::init::wait;
use crate::pump::Pump;
use crate::spool::{RecordReader, RotationCursor};
use crate::stats::StatsAggregator;
use crate::telemetry::{MetricsServer, StatsMetrics};

const METER_NAME: &str = "cdrsender";
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Wires the collector client, the metrics endpoint and the pump together.
pub struct Sender {
    config: SenderConfig,
    bound_metrics: Option<oneshot::Sender<SocketAddr>>,
}

impl Sender {
    pub fn new(config: SenderConfig) -> Self {
        Self {
            config,
            bound_metrics: None,
        }
    }

    /// Report the metrics endpoint address once it is bound.
    pub fn with_metrics_addr_notify(mut self, tx: oneshot::Sender<SocketAddr>) -> Self {
        self.bound_metrics = Some(tx);
        self
    }

    /// Run until `cancel` fires or a background task fails.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), BoxError> {
        let config = &self.config;
        debug!(
            host = %config.identity.host,
            instance = %config.identity.instance,
            collector = %config.collector_url,
            spool = ?config.spool_path,
            prefix = %config.file_prefix,
            pump = ?config.pump,
            http_retry_interval = ?config.http_retry_interval,
            http_request_timeout = ?config.http_request_timeout,
            max_record_size = config.max_record_size,
            metrics_endpoint = %config.metrics_endpoint,
            "Sender settings"
        );

        let transport = HttpCollector::new(&config.collector_url, config.http_request_timeout)?;
        let client = RetryingCollector::new(
            transport,
            config.identity.clone(),
            config.http_retry_interval,
        );

        self.run_with_client(client, cancel).await
    }

    /// Same as [`Sender::run`] but delivering through `client`.
    pub async fn run_with_client<D: DeliveryClient>(
        self,
        mut client: D,
        cancel: CancellationToken,
    ) -> Result<(), BoxError> {
        let config = self.config;

        let exporter = PrometheusExporter::default();
        let provider = SdkMeterProvider::builder()
            .with_reader(exporter.clone())
            .build();
        global::set_meter_provider(provider.clone());

        let stats = StatsAggregator::new();
        let metrics = StatsMetrics::register(&provider.meter(METER_NAME), stats.clone());
        let record_lengths = metrics.record_lengths();

        let server = MetricsServer::bind(config.metrics_endpoint, exporter).await?;
        if let Some(tx) = self.bound_metrics {
            let _ = tx.send(server.local_addr()?);
        }

        let mut tasks = JoinSet::new();
        tasks.spawn(server.serve(cancel.clone()));

        let pump_cancel = cancel.clone();
        let pump_fut = async move {
            let Some(checkpoint) = client.fetch_initial_checkpoint(&pump_cancel).await else {
                return Ok::<(), BoxError>(());
            };

            let cursor = RotationCursor::new(&config.spool_path, config.file_prefix.as_str())?
                .with_checkpoint(checkpoint);
            if cursor.is_initialized() {
                info!(
                    file = cursor.file_name(),
                    offset = cursor.offset(),
                    "Resuming from collector checkpoint"
                );
            } else {
                info!("Collector has no checkpoint for this instance");
            }

            let mut pump = Pump::new(
                config.pump,
                cursor,
                RecordReader::new(config.max_record_size),
                client,
                stats,
            )
            .with_record_lengths(record_lengths);
            pump.run(pump_cancel).await;
            Ok(())
        };

        let result = select! {
            r = pump_fut => r,
            r = wait::wait_for_any_task(&mut tasks) => match r {
                Ok(()) if cancel.is_cancelled() => Ok(()),
                Ok(()) => Err("metrics server exited unexpectedly".into()),
                Err(e) => Err(e),
            },
        };

        cancel.cancel();
        if let Err(e) = wait::wait_for_tasks_with_timeout(&mut tasks, TASK_SHUTDOWN_TIMEOUT).await {
            warn!(error = %e, "Background tasks did not shut down cleanly");
        }
        if let Err(e) = provider.shutdown() {
            debug!(error = %e, "Meter provider shutdown failed");
        }

        result
    }
}
