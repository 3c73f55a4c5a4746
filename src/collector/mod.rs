// SPDX-License-Identifier: Apache-2.0

//! Delivery of records to the remote collector.
//!
//! The pump talks to a [`DeliveryClient`], which never gives up: it returns a
//! checkpoint once the collector produced a usable answer, or `None` when the
//! shipper is shutting down. [`RetryingCollector`] builds that contract on top
//! of a single-attempt [`CollectorTransport`] such as [`HttpCollector`].

pub mod error;
pub mod http;
pub mod messages;
pub mod retry;

use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::spool::{Checkpoint, Record};

pub use error::{Error, Result};
pub use http::HttpCollector;
pub use messages::{
    CheckpointResponse, CollectorIdentity, ProcessRecordRequest, StartPositionRequest,
};
pub use retry::RetryingCollector;

/// One request/response exchange with the collector, no retries.
pub trait CollectorTransport: Send + Sync {
    fn get_start_position(
        &self,
        request: &StartPositionRequest,
    ) -> impl Future<Output = Result<CheckpointResponse>> + Send;

    fn process_record(
        &self,
        request: &ProcessRecordRequest,
    ) -> impl Future<Output = Result<CheckpointResponse>> + Send;
}

/// The pump's view of the collector.
///
/// Both operations absorb every failure internally. `None` is only returned
/// when `cancel` fires; production code cancels on shutdown only, so the
/// default behaviour is to retry forever.
pub trait DeliveryClient: Send {
    /// Ask where reading should start. Called once at start-up.
    fn fetch_initial_checkpoint(
        &mut self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Option<Checkpoint>> + Send;

    /// Deliver a record and learn where reading should continue.
    fn process(
        &mut self,
        record: &Record,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Option<Checkpoint>> + Send;
}
