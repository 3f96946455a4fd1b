//! Staging for the unaligned tails of each bucket
//!
//! A chunk writes only whole storage blocks of each bucket directly. The
//! bytes past the last block boundary are the bucket's tail, and they are
//! appended here until a full block has accumulated, at which point that
//! block is written for both streams. Every bucket keeps two staging slots so
//! a new block can fill while the previous one is still being written; a slot
//! is only refilled after the fence recorded for its last write completes.
//!
//! Owned by the control thread for the whole run.

use crate::params::BUCKET_COUNT;
use crate::queue::{DiskQueue, Fence, Stream};
use bytes::BytesMut;

/// One block-sized staging area for both streams
#[derive(Debug, Default)]
struct Slot {
    /// Staged value bytes
    value: BytesMut,
    /// Staged index bytes
    index: BytesMut,
    /// Completes when this slot's last submitted block has been written
    in_flight: Option<Fence>,
}

impl Slot {
    /// Make the slot ready to receive a new block.
    fn reclaim(&mut self, block_size: usize) {
        if let Some(fence) = self.in_flight.take() {
            fence.wait();
        }
        // Reuses the old allocation when the writer has dropped its copy
        self.value.reserve(block_size);
        self.index.reserve(block_size);
    }

    /// Append the same number of bytes to both streams.
    fn extend(&mut self, value: &[u8], index: &[u8]) {
        debug_assert_eq!(value.len(), index.len());
        self.value.extend_from_slice(value);
        self.index.extend_from_slice(index);
    }

    /// Queue everything staged in this slot as writes.
    fn submit<Q: DiskQueue + ?Sized>(&mut self, queue: &Q, bucket: usize) {
        queue.submit_write(Stream::Value, bucket, self.value.split().freeze());
        queue.submit_write(Stream::Index, bucket, self.index.split().freeze());
    }
}

/// Double-buffered tail state for one bucket
#[derive(Debug, Default)]
struct BucketTail {
    /// Two staging slots, used alternately
    slots: [Slot; 2],
    /// Index of the slot currently filling
    active: usize,
    /// Bytes staged in the active slot, always less than one block
    len: usize,
}

/// Per-bucket staging of block-unaligned tails across chunks
#[derive(Debug)]
pub(crate) struct RemainderTracker {
    /// Storage block size in bytes
    block_size: usize,
    /// State for every bucket
    buckets: Vec<BucketTail>,
    /// Full blocks written from staging so far
    flushed_blocks: u64,
}

impl RemainderTracker {
    /// Empty staging for a storage block size.
    pub(crate) fn new(block_size: usize) -> Self {
        let mut buckets: Vec<BucketTail> = (0..BUCKET_COUNT).map(|_| BucketTail::default()).collect();
        for tail in &mut buckets {
            tail.slots[0].reclaim(block_size);
        }
        Self {
            block_size,
            buckets,
            flushed_blocks: 0,
        }
    }

    /// Bytes currently staged for one bucket
    #[cfg(test)]
    pub(crate) fn staged(&self, bucket: usize) -> usize {
        self.buckets[bucket].len
    }

    /// Full blocks written from staging so far
    pub(crate) fn flushed_blocks(&self) -> u64 {
        self.flushed_blocks
    }

    /// Append one chunk's tail for a bucket, writing a block if it fills.
    ///
    /// Both tails hold the same number of bytes, less than one block. The
    /// caller must commit the queue before the next call for this bucket that
    /// could reuse the slot written here, which holds as long as it commits
    /// once per chunk.
    pub(crate) fn save<Q: DiskQueue + ?Sized>(
        &mut self,
        queue: &Q,
        bucket: usize,
        value: &[u8],
        index: &[u8],
    ) {
        debug_assert_eq!(value.len(), index.len());
        debug_assert!(value.len() < self.block_size);

        let block_size = self.block_size;
        let tail = &mut self.buckets[bucket];
        let take = value.len().min(block_size - tail.len);
        tail.slots[tail.active].extend(&value[..take], &index[..take]);
        tail.len += take;
        if tail.len < block_size {
            return;
        }

        // The active slot holds a full block
        let full = &mut tail.slots[tail.active];
        full.submit(queue, bucket);
        full.in_flight = Some(queue.add_fence());
        self.flushed_blocks += 1;

        tail.active ^= 1;
        let fresh = &mut tail.slots[tail.active];
        fresh.reclaim(block_size);
        fresh.extend(&value[take..], &index[take..]);
        tail.len = value.len() - take;
        tracing::trace!(bucket, carried = tail.len, "remainder block flushed");
    }

    /// Write every bucket's partial block as is.
    ///
    /// The caller still needs to fence and commit.
    pub(crate) fn finish<Q: DiskQueue + ?Sized>(&mut self, queue: &Q) {
        for (bucket, tail) in self.buckets.iter_mut().enumerate() {
            if tail.len > 0 {
                tail.slots[tail.active].submit(queue, bucket);
                tail.len = 0;
            }
        }
    }
}
