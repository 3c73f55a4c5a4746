// SPDX-License-Identifier: Apache-2.0

use glob::{Pattern, glob};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::spool::error::{Error, Result};
use crate::spool::run_blocking;

/// Extension every spool file carries.
pub const CDR_FILE_EXTENSION: &str = "cdr";

/// Delay between listings while waiting for the first spool file to appear.
const FIRST_FILE_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// A (file, offset) pair to resume reading from.
///
/// Checkpoints handed out by the collector are authoritative. An empty
/// `file_name` means the collector has no position yet and the cursor should
/// start from the oldest file in the spool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    pub file_name: String,
    pub offset: u64,
}

impl Checkpoint {
    pub fn new(file_name: impl Into<String>, offset: u64) -> Self {
        Self {
            file_name: file_name.into(),
            offset,
        }
    }
}

/// Tracks which spool file and byte offset should be read next.
///
/// The offset is only meaningful relative to the current file name and is
/// reset to zero on every file change.
#[derive(Debug, Clone)]
pub struct RotationCursor {
    directory: PathBuf,
    pattern: String,
    file_name: String,
    offset: u64,
}

impl RotationCursor {
    /// Create an uninitialized cursor over `directory`, matching `<prefix>*.cdr`.
    pub fn new(directory: impl AsRef<Path>, prefix: impl Into<String>) -> Result<Self> {
        let directory = std::path::absolute(directory.as_ref())?;
        let prefix: String = prefix.into();

        let pattern = format!(
            "{}/{}*.{}",
            Pattern::escape(&directory.to_string_lossy()),
            Pattern::escape(&prefix),
            CDR_FILE_EXTENSION
        );
        Pattern::new(&pattern).map_err(|e| Error::InvalidGlob(e.to_string()))?;

        Ok(Self {
            directory,
            pattern,
            file_name: String::new(),
            offset: 0,
        })
    }

    /// Position the cursor at a previously confirmed checkpoint.
    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.set_position(checkpoint.file_name, checkpoint.offset);
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Current file name, empty when the cursor is uninitialized.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_initialized(&self) -> bool {
        !self.file_name.is_empty()
    }

    /// Full path of the current file, if any.
    pub fn file_path(&self) -> Option<PathBuf> {
        self.is_initialized()
            .then(|| self.directory.join(&self.file_name))
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::new(self.file_name.clone(), self.offset)
    }

    /// List spool file names in ascending order.
    ///
    /// An unreadable directory or a directory without matches yields an empty
    /// list; callers treat that as "nothing to do yet".
    pub fn list_files(&self) -> Vec<String> {
        let entries = match glob(&self.pattern) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(pattern = %self.pattern, error = %e, "Cannot list spool files");
                return Vec::new();
            }
        };

        let mut files: Vec<String> = entries
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable spool entry");
                    None
                }
            })
            .filter(|path| !path.is_dir())
            .filter_map(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(str::to_string)
            })
            .collect();

        files.sort();
        files
    }

    /// Move to the file following the current one.
    ///
    /// Returns `false` when the current file is the newest one, i.e. the
    /// producer has not rotated yet, or when there are no files at all. If the
    /// current file vanished from the listing the cursor restarts at the
    /// oldest file.
    pub fn advance_to_next(&mut self) -> bool {
        let files = self.list_files();
        let Some(first) = files.first() else {
            return false;
        };

        if !self.is_initialized() {
            self.set_position(first.clone(), 0);
            return true;
        }

        match files.binary_search(&self.file_name) {
            Err(_) => {
                warn!(
                    file = %self.file_name,
                    directory = ?self.directory,
                    "Current file was not found in the spool, restarting at the oldest file"
                );
                self.set_position(first.clone(), 0);
                true
            }
            Ok(index) if index + 1 == files.len() => false,
            Ok(index) => {
                self.set_position(files[index + 1].clone(), 0);
                true
            }
        }
    }

    /// [`advance_to_next`](Self::advance_to_next) on the blocking pool.
    ///
    /// Returns `None`, leaving the cursor untouched, if cancelled first.
    pub async fn advance(&mut self, cancel: &CancellationToken) -> Option<bool> {
        let mut next = self.clone();
        let (next, advanced) = run_blocking(cancel, move || {
            let advanced = next.advance_to_next();
            (next, advanced)
        })
        .await?;

        *self = next;
        Some(advanced)
    }

    /// Overwrite the position unconditionally.
    pub fn set_position(&mut self, file_name: impl Into<String>, offset: u64) {
        self.file_name = file_name.into();
        self.offset = offset;
    }

    /// Block until the spool holds at least one file and the cursor points at it.
    ///
    /// Returns immediately for an initialized cursor. Returns `false` only if
    /// cancelled before a file showed up.
    pub async fn wait_for_first_file(&mut self, cancel: &CancellationToken) -> bool {
        if self.is_initialized() {
            return true;
        }

        info!(directory = ?self.directory, "Using the oldest file in the spool");
        match self.advance(cancel).await {
            Some(true) => return true,
            Some(false) => {}
            None => return false,
        }

        info!(directory = ?self.directory, "No CDR files in the spool yet, waiting");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(FIRST_FILE_POLL_INTERVAL) => {},
                _ = cancel.cancelled() => return false,
            }
            match self.advance(cancel).await {
                Some(true) => return true,
                Some(false) => {}
                None => return false,
            }
        }
    }
}
