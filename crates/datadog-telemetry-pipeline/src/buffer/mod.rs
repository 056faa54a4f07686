// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Local durable buffer for pending telemetry events.
//!
//! Events are appended to checksummed segment files (see [`segment`]) and
//! mirrored in an in-memory FIFO queue. A tiny manifest (see [`manifest`])
//! tracks the durable consumption offset so that events survive a process
//! restart until delivery is acknowledged.
//!
//! # Batching contract
//!
//! - At most one batch is in flight at a time; `drain_ready_batch` returns
//!   `None` while a batch is outstanding.
//! - `remove_batch` acknowledges delivery and advances the durable offset.
//! - `requeue_batch` re-inserts a failed batch's events at the front,
//!   preserving order; the durable offset is untouched, so a crash mid-send
//!   re-sends the batch (at-least-once delivery).
//!
//! # Overflow policy
//!
//! When the byte ceiling would be exceeded, the oldest pending events are
//! evicted first (FIFO). Eviction is silent towards producers; it only
//! increments the overflow drop counter. In-flight events are owned by the
//! delivery worker and are never evicted.
//!
//! # Offset bookkeeping
//!
//! Delivery resolves events strictly in FIFO order, but eviction can resolve
//! pending events while an older batch is still in flight. Resolved indices
//! therefore go through a small out-of-order set, and the durable `consumed`
//! offset only ever advances over a contiguous prefix.

pub(crate) mod manifest;
pub(crate) mod segment;

use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::batch::Batch;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::event::Event;
use crate::stats::PipelineStats;

use manifest::Manifest;
use segment::{SegmentWriter, SEGMENT_EXTENSION, SEGMENT_PREFIX};

/// An event paired with its global append index.
#[derive(Debug)]
struct IndexedEvent {
    index: u64,
    event: Event,
}

/// Bookkeeping for the single batch handed to the delivery worker.
#[derive(Debug)]
struct InFlightBatch {
    batch_id: Uuid,
    indices: Vec<u64>,
    events_bytes: usize,
}

/// One segment file known to the buffer.
#[derive(Debug)]
struct SegmentFile {
    path: PathBuf,
    /// Highest record index written to this segment.
    last_index: u64,
}

#[derive(Debug)]
struct BufferInner {
    pending: VecDeque<IndexedEvent>,
    pending_bytes: usize,
    in_flight: Option<InFlightBatch>,
    /// Indices resolved ahead of the contiguous `consumed` prefix.
    resolved: BTreeSet<u64>,
    manifest: Manifest,
    segments: Vec<SegmentFile>,
    writer: Option<SegmentWriter>,
}

impl BufferInner {
    fn in_flight_bytes(&self) -> usize {
        self.in_flight.as_ref().map_or(0, |b| b.events_bytes)
    }

    /// Advances the contiguous consumed prefix through the resolved set.
    /// Returns true when the offset moved.
    fn advance_consumed(&mut self) -> bool {
        let mut moved = false;
        while self.resolved.remove(&self.manifest.consumed) {
            self.manifest.consumed += 1;
            moved = true;
        }
        moved
    }
}

/// Append-only on-device buffer surviving process restarts.
pub struct DurableBuffer {
    dir: PathBuf,
    max_buffered_bytes: usize,
    max_segment_records: u64,
    flush_threshold_bytes: usize,
    notify: Arc<Notify>,
    stats: Arc<PipelineStats>,
    inner: Mutex<BufferInner>,
}

#[allow(clippy::expect_used)]
impl DurableBuffer {
    /// Opens (or creates) the buffer under the configured storage directory,
    /// recovering any events persisted past the durable consumption offset.
    pub fn open(config: &PipelineConfig, stats: Arc<PipelineStats>) -> Result<Self, PipelineError> {
        fs::create_dir_all(&config.storage_dir)?;
        let mut manifest = Manifest::load(&config.storage_dir);

        let mut paths: Vec<PathBuf> = fs::read_dir(&config.storage_dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| {
                        name.starts_with(SEGMENT_PREFIX)
                            && name.ends_with(&format!(".{SEGMENT_EXTENSION}"))
                    })
            })
            .collect();
        paths.sort();

        let mut pending = VecDeque::new();
        let mut pending_bytes = 0usize;
        let mut segments = Vec::new();

        for path in paths {
            let read = match segment::read_segment(&path) {
                Ok(read) => read,
                Err(e) => {
                    warn!(segment = %path.display(), error = %e, "unreadable segment, skipping");
                    continue;
                }
            };
            if read.corrupt > 0 {
                stats.incr_records_corrupted(read.corrupt);
            }
            let Some(last_index) = read.entries.iter().map(|(i, _)| *i).max() else {
                // Empty file left behind by a crash between rotation and the
                // first append.
                let _ = fs::remove_file(&path);
                continue;
            };
            manifest.next_index = manifest.next_index.max(last_index + 1);
            if last_index < manifest.consumed {
                let _ = fs::remove_file(&path);
                continue;
            }
            for (index, event) in read.entries {
                if index >= manifest.consumed {
                    pending_bytes += event.size_bytes;
                    pending.push_back(IndexedEvent { index, event });
                }
            }
            segments.push(SegmentFile { path, last_index });
        }

        debug!(
            recovered = pending.len(),
            consumed = manifest.consumed,
            "opened durable buffer"
        );

        Ok(DurableBuffer {
            dir: config.storage_dir.clone(),
            max_buffered_bytes: config.max_buffered_bytes,
            max_segment_records: config.max_segment_records,
            flush_threshold_bytes: config.flush_threshold_bytes,
            notify: Arc::new(Notify::new()),
            stats,
            inner: Mutex::new(BufferInner {
                pending,
                pending_bytes,
                in_flight: None,
                resolved: BTreeSet::new(),
                manifest,
                segments,
                writer: None,
            }),
        })
    }

    /// Durably appends an event, evicting the oldest pending events first if
    /// the byte ceiling would be exceeded. The write is flushed before this
    /// returns, so an acknowledged append survives a crash.
    pub fn append(&self, event: Event) -> Result<(), PipelineError> {
        let mut guard = self.lock_inner();
        let inner = &mut *guard;

        // Eviction cannot help when the event alone (plus whatever the
        // worker holds in flight) exceeds the ceiling.
        if event.size_bytes + inner.in_flight_bytes() > self.max_buffered_bytes {
            return Err(PipelineError::BufferFull);
        }

        let mut evicted = 0u64;
        while inner.pending_bytes + inner.in_flight_bytes() + event.size_bytes
            > self.max_buffered_bytes
        {
            if let Some(old) = inner.pending.pop_front() {
                inner.pending_bytes -= old.event.size_bytes;
                inner.resolved.insert(old.index);
                evicted += 1;
            } else {
                break;
            }
        }
        if evicted > 0 {
            self.stats.incr_dropped_overflow(evicted);
            warn!(evicted, "buffer ceiling reached, dropped oldest events");
        }

        let rotate = inner
            .writer
            .as_ref()
            .is_none_or(|w| w.records >= self.max_segment_records);
        if rotate {
            let first_index = inner.manifest.next_index;
            let path = self.dir.join(segment::segment_file_name(first_index));
            inner.writer = Some(SegmentWriter::create(&path)?);
            inner.segments.push(SegmentFile {
                path,
                last_index: first_index,
            });
        }

        let index = inner.manifest.next_index;
        if let Some(writer) = inner.writer.as_mut() {
            writer.append(index, &event)?;
        }
        if let Some(active) = inner.segments.last_mut() {
            active.last_index = index;
        }
        inner.manifest.next_index = index + 1;
        inner.pending_bytes += event.size_bytes;
        inner.pending.push_back(IndexedEvent { index, event });
        self.stats.incr_appended();

        if evicted > 0 {
            self.persist_offset(inner);
        }
        let wake = inner.pending_bytes >= self.flush_threshold_bytes;
        drop(guard);
        if wake {
            self.notify.notify_one();
        }
        Ok(())
    }

    /// Greedily packs the oldest pending events into a batch bounded by
    /// `max_bytes` and `max_count`. Returns `None` while another batch is in
    /// flight or when nothing is pending. A single event larger than
    /// `max_bytes` is shipped alone rather than wedging the queue.
    #[must_use]
    pub fn drain_ready_batch(&self, max_bytes: usize, max_count: usize) -> Option<Batch> {
        let mut guard = self.lock_inner();
        let inner = &mut *guard;

        if inner.in_flight.is_some() || inner.pending.is_empty() {
            return None;
        }

        let mut events = Vec::new();
        let mut indices = Vec::new();
        let mut total_size = 0usize;
        while events.len() < max_count {
            let Some(front) = inner.pending.front() else {
                break;
            };
            if !events.is_empty() && total_size + front.event.size_bytes > max_bytes {
                break;
            }
            if let Some(entry) = inner.pending.pop_front() {
                total_size += entry.event.size_bytes;
                indices.push(entry.index);
                events.push(entry.event);
            }
        }

        inner.pending_bytes -= total_size;
        let batch = Batch::new(events, total_size);
        inner.in_flight = Some(InFlightBatch {
            batch_id: batch.id,
            indices,
            events_bytes: total_size,
        });
        Some(batch)
    }

    /// Acknowledges delivery of the in-flight batch: its events are resolved
    /// and the durable consumption offset advances. A stale or unknown batch
    /// id is a no-op.
    pub fn remove_batch(&self, batch_id: Uuid) {
        let mut guard = self.lock_inner();
        let inner = &mut *guard;

        let matches = inner
            .in_flight
            .as_ref()
            .is_some_and(|b| b.batch_id == batch_id);
        if !matches {
            return;
        }
        if let Some(in_flight) = inner.in_flight.take() {
            for index in in_flight.indices {
                inner.resolved.insert(index);
            }
        }
        self.persist_offset(inner);
    }

    /// Re-inserts a failed batch's events at the front, preserving order.
    /// The durable offset is untouched. A stale batch id (purged while the
    /// send was outstanding) is a no-op.
    pub fn requeue_batch(&self, batch: Batch) {
        let mut guard = self.lock_inner();
        let inner = &mut *guard;

        let matches = inner
            .in_flight
            .as_ref()
            .is_some_and(|b| b.batch_id == batch.id);
        if !matches {
            return;
        }
        if let Some(in_flight) = inner.in_flight.take() {
            for (index, event) in in_flight.indices.into_iter().zip(batch.events).rev() {
                inner.pending_bytes += event.size_bytes;
                inner.pending.push_front(IndexedEvent { index, event });
            }
        }
    }

    /// Purges every buffered and in-flight unsent event immediately.
    pub fn purge(&self) {
        let mut guard = self.lock_inner();
        let inner = &mut *guard;

        while let Some(entry) = inner.pending.pop_front() {
            inner.resolved.insert(entry.index);
        }
        inner.pending_bytes = 0;
        if let Some(in_flight) = inner.in_flight.take() {
            for index in in_flight.indices {
                inner.resolved.insert(index);
            }
        }
        self.persist_offset(inner);
        debug!("purged buffered events");
    }

    /// Number of pending (not in-flight) events.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.lock_inner().pending.len()
    }

    /// Total bytes of pending (not in-flight) events.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.lock_inner().pending_bytes
    }

    /// Notifier signalled when buffered bytes cross the flush threshold.
    #[must_use]
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    fn lock_inner(&self) -> MutexGuard<'_, BufferInner> {
        self.inner.lock().expect("buffer lock poisoned")
    }

    /// Persists the consumption offset if it moved and deletes fully
    /// consumed segment files. Persistence failures degrade to re-sends
    /// after a crash, so they are logged rather than propagated.
    fn persist_offset(&self, inner: &mut BufferInner) {
        if !inner.advance_consumed() {
            return;
        }
        if let Err(e) = inner.manifest.store(&self.dir) {
            warn!(error = %e, "failed to persist consumption offset");
        }

        let consumed = inner.manifest.consumed;
        let active_writer = inner.writer.is_some();
        let count = inner.segments.len();
        let mut kept = Vec::new();
        for (i, seg) in inner.segments.drain(..).enumerate() {
            let is_active = active_writer && i + 1 == count;
            if !is_active && seg.last_index < consumed {
                if let Err(e) = fs::remove_file(&seg.path) {
                    warn!(segment = %seg.path.display(), error = %e, "failed to delete consumed segment");
                }
            } else {
                kept.push(seg);
            }
        }
        inner.segments = kept;
    }
}
