// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] hyper_util::client::legacy::Error),

    #[error("Failed reading response body: {0}")]
    Body(#[from] hyper::Error),

    #[error("Failed to build request: {0}")]
    Request(#[from] http::Error),

    #[error("Collector responded with status {0}")]
    Status(http::StatusCode),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid checkpoint position: {0}")]
    InvalidPosition(i64),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid collector URL: {0}")]
    InvalidUri(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;
