// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batches and the assembler that produces them.
//!
//! A batch is a bounded, ordered group of events assembled for one
//! transmission attempt. Once handed to the network layer a batch is never
//! mutated; only its attempt counter is incremented between retries.

use std::sync::Arc;
use std::time::SystemTime;

use uuid::Uuid;

use crate::buffer::DurableBuffer;
use crate::event::Event;

/// Bounded group of events owned by the delivery worker while in flight.
#[derive(Debug)]
pub struct Batch {
    /// Opaque batch identifier, used to acknowledge or requeue.
    pub id: Uuid,
    /// Events in original append order.
    pub events: Vec<Event>,
    /// When the batch was assembled.
    pub created_at: SystemTime,
    /// Sum of the events' accounted sizes.
    pub total_size_bytes: usize,
    /// Delivery attempts made so far.
    pub attempt_count: u32,
}

impl Batch {
    pub(crate) fn new(events: Vec<Event>, total_size_bytes: usize) -> Self {
        Batch {
            id: Uuid::new_v4(),
            events,
            created_at: SystemTime::now(),
            total_size_bytes,
            attempt_count: 0,
        }
    }
}

/// Greedily packs buffered events into size/count bounded batches,
/// oldest first, never splitting the append order.
pub struct BatchAssembler {
    buffer: Arc<DurableBuffer>,
    max_batch_bytes: usize,
    max_batch_entries: usize,
}

impl BatchAssembler {
    #[must_use]
    pub fn new(buffer: Arc<DurableBuffer>, max_batch_bytes: usize, max_batch_entries: usize) -> Self {
        BatchAssembler {
            buffer,
            max_batch_bytes,
            max_batch_entries,
        }
    }

    /// Promotes buffered events into a ready batch, or `None` when nothing
    /// is pending or a batch is already in flight.
    #[must_use]
    pub fn try_assemble(&self) -> Option<Batch> {
        self.buffer
            .drain_ready_batch(self.max_batch_bytes, self.max_batch_entries)
    }
}
