// SPDX-License-Identifier: Apache-2.0

//! Spool directory access.
//!
//! The upstream billing process appends newline-terminated, JSON-object shaped
//! records to files named `<prefix>*.cdr` and rotates to a new file from time
//! to time. File names sort in creation order, so rotation is detected by
//! polling a sorted listing rather than through file system notifications.
//!
//! Listing and reading are synchronous. Async callers go through
//! [`run_blocking`] so a stalled file system never parks a runtime worker.

pub mod cursor;
pub mod error;
pub mod record;

use tokio::select;
use tokio_util::sync::CancellationToken;

pub use cursor::{Checkpoint, RotationCursor, CDR_FILE_EXTENSION};
pub use error::{Error, Result};
pub use record::{ReadOutcome, Record, RecordReader, is_well_formed, strip_trailing};

/// Run spool I/O on the blocking pool.
///
/// Returns `None` if `cancel` fires first. The blocking call is left to finish
/// on its own and its result is discarded.
pub async fn run_blocking<T, F>(cancel: &CancellationToken, f: F) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    if cancel.is_cancelled() {
        return None;
    }

    let handle = tokio::task::spawn_blocking(f);
    select! {
        biased;

        _ = cancel.cancelled() => None,
        r = handle => match r {
            Ok(v) => Some(v),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            // Only happens while the runtime shuts down.
            Err(_) => None,
        },
    }
}
