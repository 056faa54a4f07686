// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Append-only segment files.
//!
//! A segment is a newline-delimited JSON file; each line is one record
//! carrying the event's global append index and an FNV-64 checksum of the
//! serialized event. Records are flushed as they are written so an append
//! acknowledged to the caller survives a process crash. Corrupt lines
//! (including a torn final line after a crash) are skipped on read, counted,
//! and logged.

use std::fs::{File, OpenOptions};
use std::hash::Hasher;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use fnv::FnvHasher;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PipelineError;
use crate::event::Event;

/// File name prefix and extension shared by all segment files.
pub(crate) const SEGMENT_PREFIX: &str = "segment-";
pub(crate) const SEGMENT_EXTENSION: &str = "ndjson";

/// One persisted record, as read back from disk.
#[derive(Debug, Deserialize)]
struct Record {
    index: u64,
    checksum: u64,
    event: Event,
}

/// Borrowed form of [`Record`] used when writing, to avoid cloning events.
#[derive(Serialize)]
struct RecordRef<'a> {
    index: u64,
    checksum: u64,
    event: &'a Event,
}

/// FNV-64 checksum over the serialized event bytes.
pub(crate) fn checksum(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

/// Builds the file name for a segment whose first record has `first_index`.
pub(crate) fn segment_file_name(first_index: u64) -> String {
    format!("{SEGMENT_PREFIX}{first_index:020}.{SEGMENT_EXTENSION}")
}

/// Writer for the active segment.
#[derive(Debug)]
pub(crate) struct SegmentWriter {
    writer: BufWriter<File>,
    /// Records written through this writer.
    pub(crate) records: u64,
}

impl SegmentWriter {
    pub(crate) fn create(path: &Path) -> Result<Self, PipelineError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(SegmentWriter {
            writer: BufWriter::new(file),
            records: 0,
        })
    }

    /// Appends one record and flushes it to the file.
    pub(crate) fn append(&mut self, index: u64, event: &Event) -> Result<(), PipelineError> {
        let event_bytes = serde_json::to_vec(event)?;
        let record = RecordRef {
            index,
            checksum: checksum(&event_bytes),
            event,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        self.writer.write_all(&line)?;
        self.writer.flush()?;
        self.records += 1;
        Ok(())
    }
}

/// Result of reading a segment back from disk.
pub(crate) struct SegmentRead {
    /// Valid records in file order: (global index, event).
    pub(crate) entries: Vec<(u64, Event)>,
    /// Lines skipped due to parse or checksum failure.
    pub(crate) corrupt: u64,
}

/// Reads all records of a segment, skipping corrupt lines.
pub(crate) fn read_segment(path: &Path) -> Result<SegmentRead, PipelineError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    let mut corrupt = 0u64;

    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        match parse_record(&line) {
            Ok(record) => entries.push((record.index, record.event)),
            Err(reason) => {
                corrupt += 1;
                let error = PipelineError::CorruptedSegment {
                    segment: path.display().to_string(),
                    reason,
                };
                warn!(%error, "skipping corrupt persisted record");
            }
        }
    }

    Ok(SegmentRead { entries, corrupt })
}

fn parse_record(line: &str) -> Result<Record, String> {
    let record: Record = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let event_bytes = serde_json::to_vec(&record.event).map_err(|e| e.to_string())?;
    if checksum(&event_bytes) != record.checksum {
        return Err("checksum mismatch".to_string());
    }
    Ok(record)
}
