// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Buffering of encoded entries into JSON array payloads.
//!
//! Entries are queued until one of the limits below is hit or a flush is requested:
//! 1. **Count limit**: [`MAX_BATCH_ENTRIES`] entries per payload
//! 2. **Size limit**: [`MAX_BATCH_BYTES`] of uncompressed payload
//!
//! The queue itself is capped at [`MAX_QUEUE_ENTRIES`]; past that the oldest entries are
//! evicted. Together with the bounded command channel of the sink service this caps what a
//! stalled intake can hold in memory.

use serde::Serialize;
use std::collections::VecDeque;
use tracing::warn;

use crate::entry::LogEntry;

pub(crate) const MAX_BATCH_ENTRIES: usize = 1_000;

pub(crate) const MAX_BATCH_BYTES: usize = 1_024 * 1_024;

/// Messages longer than this are truncated before encoding.
pub(crate) const MAX_MESSAGE_BYTES: usize = 256 * 1_024;

pub(crate) const MAX_QUEUE_ENTRIES: usize = 50_000;

#[derive(Serialize)]
struct IntakeEntry<'a> {
    timestamp: i64,
    message: &'a str,
}

#[derive(Debug, Clone)]
pub(crate) struct Batcher {
    destination: String,
    messages: VecDeque<String>,
    queued_bytes: usize,
    max_batch_entries: usize,
    max_batch_bytes: usize,
    max_message_bytes: usize,
    max_queue_entries: usize,
    evicted: u64,
}

impl Batcher {
    pub(crate) fn new(destination: &str) -> Self {
        Self::with_limits(
            destination,
            MAX_BATCH_ENTRIES,
            MAX_BATCH_BYTES,
            MAX_MESSAGE_BYTES,
            MAX_QUEUE_ENTRIES,
        )
    }

    pub(crate) fn with_limits(
        destination: &str,
        max_batch_entries: usize,
        max_batch_bytes: usize,
        max_message_bytes: usize,
        max_queue_entries: usize,
    ) -> Self {
        Self {
            destination: destination.to_string(),
            messages: VecDeque::new(),
            queued_bytes: 0,
            max_batch_entries,
            max_batch_bytes,
            max_message_bytes,
            max_queue_entries,
            evicted: 0,
        }
    }

    pub(crate) fn push(&mut self, entry: &LogEntry) {
        let message = truncate_at_char_boundary(&entry.message, self.max_message_bytes);
        let encoded = match serde_json::to_string(&IntakeEntry {
            timestamp: entry.timestamp.timestamp_millis(),
            message,
        }) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("{}: dropping entry that failed to encode: {e}", self.destination);
                return;
            }
        };

        if self.messages.len() >= self.max_queue_entries {
            if let Some(oldest) = self.messages.pop_front() {
                self.queued_bytes -= oldest.len();
                self.evicted += 1;
                if self.evicted == 1 || self.evicted % 1_000 == 0 {
                    warn!(
                        "{}: log queue full, {} oldest entries evicted so far",
                        self.destination, self.evicted
                    );
                }
            }
        }

        self.queued_bytes += encoded.len();
        self.messages.push_back(encoded);
    }

    pub(crate) fn len(&self) -> usize {
        self.messages.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// True once a full payload worth of entries is queued.
    pub(crate) fn has_full_batch(&self) -> bool {
        self.messages.len() >= self.max_batch_entries
            || self.queued_bytes + self.messages.len() + 1 >= self.max_batch_bytes
    }

    /// Pops the next payload as a JSON array, or `None` when nothing is queued.
    ///
    /// An entry larger than the size limit on its own still goes out, alone, so the queue always
    /// makes progress.
    pub(crate) fn next_batch(&mut self) -> Option<Vec<u8>> {
        if self.messages.is_empty() {
            return None;
        }

        let mut buffer = Vec::with_capacity(self.queued_bytes.min(self.max_batch_bytes) + 2);
        buffer.push(b'[');
        let mut count = 0;

        while let Some(next) = self.messages.front() {
            if count == self.max_batch_entries {
                break;
            }
            // separator plus closing bracket
            let projected = buffer.len() + next.len() + 2;
            if count > 0 && projected > self.max_batch_bytes {
                break;
            }
            let Some(message) = self.messages.pop_front() else {
                break;
            };
            if count > 0 {
                buffer.push(b',');
            }
            self.queued_bytes -= message.len();
            buffer.extend_from_slice(message.as_bytes());
            count += 1;
        }

        buffer.push(b']');
        Some(buffer)
    }
}

fn truncate_at_char_boundary(message: &str, max_bytes: usize) -> &str {
    if message.len() <= max_bytes {
        return message;
    }
    let mut end = max_bytes;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}
