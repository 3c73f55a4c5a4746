// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use tracing::{debug, error, warn};

use crate::spool::cursor::{Checkpoint, RotationCursor};

/// Every record is terminated by a newline.
pub const RECORD_DELIMITER: u8 = b'\n';

/// Default upper bound for a single record, delimiter excluded.
pub const DEFAULT_MAX_RECORD_SIZE: usize = 1024 * 1024;

/// One framed record read from a spool file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// File the record was read from (name only)
    pub source_file: String,
    /// Byte offset of the first byte of the record
    pub source_offset: u64,
    /// Record body with trailing control bytes removed
    pub payload: Bytes,
    /// Bytes consumed from the file, delimiter included
    pub length: usize,
}

impl Record {
    /// Offset right after this record.
    pub fn next_offset(&self) -> u64 {
        self.source_offset + self.length as u64
    }

    /// Local guess of where to continue, valid until the collector answers.
    pub fn next_checkpoint(&self) -> Checkpoint {
        Checkpoint::new(self.source_file.clone(), self.next_offset())
    }
}

/// Result of a single read attempt.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A well-formed record
    Record(Record),
    /// No complete record available at the cursor yet
    EndOfFile,
    /// The file could not be opened, positioned or read
    ReadError(io::Error),
    /// A complete line was found but it is not a record
    Malformed,
}

impl ReadOutcome {
    /// Bytes the attempt accounted for. Always zero unless a record was read.
    pub fn length(&self) -> usize {
        match self {
            ReadOutcome::Record(record) => record.length,
            _ => 0,
        }
    }

    /// Whether the attempt counts against the error retry budget.
    pub fn is_error(&self) -> bool {
        matches!(self, ReadOutcome::ReadError(_) | ReadOutcome::Malformed)
    }
}

/// Remove trailing whitespace and control bytes (anything below `!`).
pub fn strip_trailing(data: &[u8]) -> &[u8] {
    let end = data
        .iter()
        .rposition(|b| *b > b' ')
        .map_or(0, |pos| pos + 1);
    &data[..end]
}

/// A record is a JSON-object shaped line: at least two bytes, `{` first, `}` last.
pub fn is_well_formed(data: &[u8]) -> bool {
    data.len() >= 2 && data.first() == Some(&b'{') && data.last() == Some(&b'}')
}

/// Reads exactly one record at a cursor position.
///
/// Every attempt opens the file afresh, so a reader never holds a handle to a
/// file that may be rotated away between attempts.
#[derive(Debug, Clone)]
pub struct RecordReader {
    max_record_size: usize,
}

impl Default for RecordReader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORD_SIZE)
    }
}

impl RecordReader {
    pub fn new(max_record_size: usize) -> Self {
        Self { max_record_size }
    }

    /// Read the record starting at the cursor's file and offset.
    pub fn read_one(&self, cursor: &RotationCursor) -> ReadOutcome {
        let Some(path) = cursor.file_path() else {
            return ReadOutcome::ReadError(io::Error::new(
                io::ErrorKind::NotFound,
                "cursor is not positioned at a file",
            ));
        };
        let file_name = cursor.file_name();
        let offset = cursor.offset();

        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                error!(file = file_name, error = %e, "Cannot open CDR file");
                return ReadOutcome::ReadError(e);
            }
        };

        if let Err(e) = file.seek(SeekFrom::Start(offset)) {
            error!(file = file_name, offset, error = %e, "Cannot seek in CDR file");
            return ReadOutcome::ReadError(e);
        }

        // One byte over the limit tells an oversized line from one that fits exactly.
        let limit = self.max_record_size as u64 + 1;
        let mut reader = BufReader::new(file).take(limit);
        let mut data = Vec::new();
        let read = match reader.read_until(RECORD_DELIMITER, &mut data) {
            Ok(n) => n,
            Err(e) => {
                error!(file = file_name, offset, error = %e, "Error reading CDR file");
                return ReadOutcome::ReadError(e);
            }
        };

        if data.last() != Some(&RECORD_DELIMITER) {
            if read as u64 >= limit {
                warn!(
                    file = file_name,
                    offset,
                    max_record_size = self.max_record_size,
                    "CDR exceeds the maximum record size"
                );
                return ReadOutcome::Malformed;
            }
            return ReadOutcome::EndOfFile;
        }

        let length = data.len();
        debug!(file = file_name, offset, length, "CDR read");

        let stripped = strip_trailing(&data).len();
        data.truncate(stripped);

        if !is_well_formed(&data) {
            warn!(file = file_name, offset, "Invalid CDR");
            return ReadOutcome::Malformed;
        }

        ReadOutcome::Record(Record {
            source_file: file_name.to_string(),
            source_offset: offset,
            payload: Bytes::from(data),
            length,
        })
    }
}
