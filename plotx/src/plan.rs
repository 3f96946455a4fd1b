//! Dividing the block space into chunks and per-thread ranges
//!
//! The disk driver bounds its memory by generating the table one chunk at a
//! time. A chunk buffer holds both streams, each with room for one storage
//! block of alignment slack per bucket, and the rest is divided evenly between
//! threads. Whatever doesn't fill a whole chunk runs as one trailing chunk,
//! possibly with fewer participants than threads.

use crate::err::Error;
use crate::params::{Params, BLOCK_SIZE, BUCKET_COUNT, ENTRIES_PER_BLOCK, ENTRY_SIZE};
use std::ops::Range;

/// Block range and participant count for one generation pass
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct ChunkSpec {
    /// First keystream block of the pass
    pub(crate) first_block: u64,
    /// Number of blocks in the pass
    pub(crate) blocks: u64,
    /// Number of threads taking part, ids `0..participants`
    pub(crate) participants: usize,
}

impl ChunkSpec {
    /// A single pass over every block, as used by the memory driver.
    ///
    /// Never uses more participants than there are blocks.
    pub(crate) fn whole(total_blocks: u64, threads: usize) -> Self {
        Self {
            first_block: 0,
            blocks: total_blocks,
            participants: threads.min(total_blocks as usize).max(1),
        }
    }

    /// Number of entries generated by the pass
    pub(crate) fn entries(&self) -> u64 {
        self.blocks * ENTRIES_PER_BLOCK as u64
    }

    /// The blocks assigned to one participant.
    ///
    /// Blocks are split evenly, and any leftover blocks go one each to the
    /// lowest ids. Ranges are consecutive in id order.
    pub(crate) fn thread_blocks(&self, id: usize) -> Range<u64> {
        debug_assert!(id < self.participants);
        let participants = self.participants as u64;
        let id = id as u64;
        let base = self.blocks / participants;
        let extra = self.blocks % participants;
        let start = self.first_block + id * base + id.min(extra);
        let len = base + u64::from(id < extra);
        start..start + len
    }
}

/// Chunk sizing for one disk run
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct ChunkPlan {
    /// Worker thread count
    threads: usize,
    /// Blocks each thread generates in a full chunk
    blocks_per_thread: u64,
    /// Number of full chunks
    full_chunks: u64,
    /// Blocks left over for the trailing chunk, possibly zero
    trailing_blocks: u64,
    /// Storage block size in 32-bit words
    align_words: usize,
}

impl ChunkPlan {
    /// Size chunks for a table, a thread count, and a chunk buffer budget.
    ///
    /// Fails with [`Error::ChunkTooSmall`] unless every thread gets at least
    /// one block per full chunk. `file_block_size` must already be validated
    /// as a nonzero multiple of [`ENTRY_SIZE`].
    pub(crate) fn new(
        params: &Params,
        threads: usize,
        chunk_size: usize,
        file_block_size: usize,
    ) -> Result<Self, Error> {
        // One block of slack per bucket, in each of the two streams
        let slack = 2 * BUCKET_COUNT * file_block_size;
        let blocks_per_chunk = chunk_size.saturating_sub(slack) / (2 * BLOCK_SIZE);
        let blocks_per_thread = (blocks_per_chunk / threads) as u64;
        if blocks_per_thread == 0 {
            return Err(Error::ChunkTooSmall {
                chunk_size,
                threads,
                required: slack + 2 * BLOCK_SIZE * threads,
            });
        }

        let full = blocks_per_thread * threads as u64;
        let total_blocks = params.block_count();
        Ok(Self {
            threads,
            blocks_per_thread,
            full_chunks: total_blocks / full,
            trailing_blocks: total_blocks % full,
            align_words: file_block_size / ENTRY_SIZE,
        })
    }

    /// Blocks in a full chunk
    pub(crate) fn full_chunk_blocks(&self) -> u64 {
        self.blocks_per_thread * self.threads as u64
    }

    /// Number of passes, including any trailing chunk
    pub(crate) fn chunk_count(&self) -> u64 {
        self.full_chunks + u64::from(self.trailing_blocks > 0)
    }

    /// Participants in the trailing chunk.
    ///
    /// Equivalent to shrinking the thread count until the trailing blocks
    /// divide among them at least once, or `min(threads, trailing_blocks)`.
    pub(crate) fn trailing_participants(&self) -> usize {
        self.threads.min(self.trailing_blocks as usize)
    }

    /// Words per stream in a chunk buffer.
    ///
    /// A full chunk's entries rounded up to whole storage blocks, plus one
    /// storage block for each bucket's alignment padding. Both streams start
    /// on a storage block boundary.
    pub(crate) fn stream_words(&self) -> usize {
        let entries = self.full_chunk_blocks() as usize * ENTRIES_PER_BLOCK;
        entries.next_multiple_of(self.align_words) + BUCKET_COUNT * self.align_words
    }

    /// Every pass of the run, in block order.
    pub(crate) fn chunks(&self) -> impl Iterator<Item = ChunkSpec> + '_ {
        let full = self.full_chunk_blocks();
        let whole = (0..self.full_chunks).map(move |chunk| ChunkSpec {
            first_block: chunk * full,
            blocks: full,
            participants: self.threads,
        });
        let trailing = (self.trailing_blocks > 0).then(|| ChunkSpec {
            first_block: self.full_chunks * full,
            blocks: self.trailing_blocks,
            participants: self.trailing_participants(),
        });
        whole.chain(trailing)
    }
}
