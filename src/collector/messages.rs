// SPDX-License-Identifier: Apache-2.0

//! JSON bodies exchanged with the collector.

use serde::{Deserialize, Serialize};

use crate::collector::error::Error;
use crate::spool::{Checkpoint, Record};

/// Who is talking to the collector: the host and the shipper instance on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorIdentity {
    pub host: String,
    pub instance: String,
}

impl CollectorIdentity {
    pub fn new(host: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            instance: instance.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartPositionRequest {
    pub host: String,
    pub instance: String,
}

impl From<&CollectorIdentity> for StartPositionRequest {
    fn from(identity: &CollectorIdentity) -> Self {
        Self {
            host: identity.host.clone(),
            instance: identity.instance.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecordRequest {
    pub host: String,
    pub instance: String,
    pub filename: String,
    pub position: u64,
    pub record_length: usize,
    pub data: String,
}

impl ProcessRecordRequest {
    pub fn new(identity: &CollectorIdentity, record: &Record) -> Self {
        Self {
            host: identity.host.clone(),
            instance: identity.instance.clone(),
            filename: record.source_file.clone(),
            position: record.source_offset,
            record_length: record.length,
            data: String::from_utf8_lossy(&record.payload).into_owned(),
        }
    }
}

/// Answer to both collector operations: where to read next.
///
/// Absent fields decode to their zero values; an empty `startFile` means the
/// collector holds no position yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointResponse {
    #[serde(rename = "startFile")]
    pub start_file: String,
    #[serde(rename = "startPosition")]
    pub start_position: i64,
}

impl TryFrom<CheckpointResponse> for Checkpoint {
    type Error = Error;

    fn try_from(resp: CheckpointResponse) -> Result<Self, Self::Error> {
        let offset = u64::try_from(resp.start_position)
            .map_err(|_| Error::InvalidPosition(resp.start_position))?;
        Ok(Checkpoint::new(resp.start_file, offset))
    }
}
