// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::time::Duration;
use tokio::select;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::collector::error::Result;
use crate::collector::messages::{
    CheckpointResponse, CollectorIdentity, ProcessRecordRequest, StartPositionRequest,
};
use crate::collector::{CollectorTransport, DeliveryClient};
use crate::spool::{Checkpoint, Record};

/// Retries a transport with a fixed delay until it yields a valid checkpoint.
///
/// Transport failures, non-success statuses and undecodable responses are all
/// treated alike.
pub struct RetryingCollector<T> {
    transport: T,
    identity: CollectorIdentity,
    retry_interval: Duration,
}

impl<T: CollectorTransport> RetryingCollector<T> {
    pub fn new(transport: T, identity: CollectorIdentity, retry_interval: Duration) -> Self {
        Self {
            transport,
            identity,
            retry_interval,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn call_with_retry<F, Fut>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Option<Checkpoint>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<CheckpointResponse>> + Send,
    {
        let mut attempt: u64 = 0;
        loop {
            if attempt > 0 {
                select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(self.retry_interval) => {},
                }
            }
            attempt += 1;

            debug!(operation, attempt, "Requesting collector");
            let started = Instant::now();
            let result = select! {
                biased;
                _ = cancel.cancelled() => return None,
                r = call() => r,
            };

            match result.and_then(Checkpoint::try_from) {
                Ok(checkpoint) => {
                    debug!(
                        operation,
                        attempt,
                        duration = ?started.elapsed(),
                        file = %checkpoint.file_name,
                        offset = checkpoint.offset,
                        "Collector response received"
                    );
                    return Some(checkpoint);
                }
                Err(e) => {
                    error!(
                        operation,
                        attempt,
                        delay = ?self.retry_interval,
                        error = %e,
                        "Collector request failed, will retry after delay."
                    );
                }
            }
        }
    }
}

impl<T: CollectorTransport> DeliveryClient for RetryingCollector<T> {
    async fn fetch_initial_checkpoint(&mut self, cancel: &CancellationToken) -> Option<Checkpoint> {
        let request = StartPositionRequest::from(&self.identity);
        let transport = &self.transport;
        let checkpoint = self
            .call_with_retry("GetStartPosition", cancel, || {
                transport.get_start_position(&request)
            })
            .await?;

        info!(
            file = %checkpoint.file_name,
            offset = checkpoint.offset,
            "Collector start position received"
        );
        Some(checkpoint)
    }

    async fn process(&mut self, record: &Record, cancel: &CancellationToken) -> Option<Checkpoint> {
        let request = ProcessRecordRequest::new(&self.identity, record);
        let transport = &self.transport;
        self.call_with_retry("ProcessCdr", cancel, || transport.process_record(&request))
            .await
    }
}
