//! Disk queue that keeps every write in memory
//!
//! Useful for verification and for dry runs that measure generation without
//! storage. Every committed write is recorded in order along with its offset
//! in the target stream, so callers can check alignment and reassemble each
//! bucket's streams.

use super::{DiskQueue, Fence, IoBuffer, Lease, Stream};
use crate::params::{BUCKET_COUNT, ENTRY_SIZE};
use bytes::Bytes;
use std::sync::{Mutex, PoisonError};

/// One write recorded by a [`MemoryQueue`]
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Submission {
    /// Target stream
    pub stream: Stream,
    /// Target bucket
    pub bucket: usize,
    /// Byte offset of this write within its stream and bucket
    pub offset: u64,
    /// Bytes written
    pub data: Bytes,
}

/// Mutable state behind the queue's lock
#[derive(Debug)]
struct State {
    /// Writes submitted since the last commit
    pending: Vec<(Stream, usize, Bytes)>,
    /// Every committed write, in commit order
    committed: Vec<Submission>,
    /// Bytes committed so far, per stream and bucket
    lengths: [[u64; BUCKET_COUNT]; 2],
    /// Buffers acquired and not yet released
    outstanding: usize,
    /// Largest number of buffers held at once
    peak_outstanding: usize,
}

impl Default for State {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            committed: Vec::new(),
            lengths: [[0; BUCKET_COUNT]; 2],
            outstanding: 0,
            peak_outstanding: 0,
        }
    }
}

/// In-memory [`DiskQueue`] for tests and dry runs
#[derive(Debug)]
pub struct MemoryQueue {
    /// Reported storage block size
    block_size: usize,
    /// Recorded activity
    state: Mutex<State>,
}

impl MemoryQueue {
    /// An empty queue that reports `block_size` as its storage block size.
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            state: Mutex::new(State::default()),
        }
    }

    /// Lock the state, ignoring poison from a panicked test thread.
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every committed write, in commit order
    pub fn submissions(&self) -> Vec<Submission> {
        self.state().committed.clone()
    }

    /// Concatenated committed bytes of one bucket's stream
    pub fn stream_bytes(&self, stream: Stream, bucket: usize) -> Vec<u8> {
        let state = self.state();
        let mut out = Vec::new();
        for sub in &state.committed {
            if sub.stream == stream && sub.bucket == bucket {
                out.extend_from_slice(&sub.data);
            }
        }
        out
    }

    /// Committed records of one bucket's stream
    pub fn stream_words(&self, stream: Stream, bucket: usize) -> Vec<u32> {
        self.stream_bytes(stream, bucket)
            .chunks_exact(ENTRY_SIZE)
            .map(|record| u32::from_ne_bytes([record[0], record[1], record[2], record[3]]))
            .collect()
    }

    /// Writes submitted but never committed
    pub fn pending(&self) -> usize {
        self.state().pending.len()
    }

    /// Buffers currently acquired and not released
    pub fn outstanding_buffers(&self) -> usize {
        self.state().outstanding
    }

    /// Largest number of buffers held at once
    pub fn peak_buffers(&self) -> usize {
        self.state().peak_outstanding
    }
}

impl DiskQueue for MemoryQueue {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn acquire_buffer(&self, words: usize) -> IoBuffer {
        let mut state = self.state();
        state.outstanding += 1;
        state.peak_outstanding = state.peak_outstanding.max(state.outstanding);
        IoBuffer::new(words, Lease::new(words * ENTRY_SIZE))
    }

    fn release_buffer(&self, lease: Lease) {
        let _ = lease;
        self.state().outstanding -= 1;
    }

    fn submit_write(&self, stream: Stream, bucket: usize, data: Bytes) {
        self.state().pending.push((stream, bucket, data));
    }

    fn commit(&self) {
        let mut state = self.state();
        let pending = std::mem::take(&mut state.pending);
        for (stream, bucket, data) in pending {
            let length = &mut state.lengths[stream.ordinal()][bucket];
            let offset = *length;
            *length += data.len() as u64;
            state.committed.push(Submission {
                stream,
                bucket,
                offset,
                data,
            });
        }
    }

    fn add_fence(&self) -> Fence {
        Fence::completed()
    }
}
