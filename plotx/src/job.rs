//! One worker's share of a generation pass
//!
//! A pass covers a contiguous range of keystream blocks. Every participant
//! expands its own sub-range into a private word buffer, counts it, joins the
//! prefix sum, and scatters into the shared bucket slots. The word buffer is
//! kept between passes so a chunked run allocates it once per thread.

use crate::counter::count_buckets;
use crate::keystream::{Keystream, KEY_SIZE};
use crate::params::{Params, ENTRIES_PER_BLOCK};
use crate::prefix::PrefixSum;
use crate::scatter::{scatter, BucketSlots};
use crate::workers::{ActiveSet, Worker};
use std::ops::Range;

/// Per-thread generation state
pub(crate) struct F1Job<'g, S: Keystream> {
    /// This thread's coordination handle
    worker: Worker<'g>,
    /// Private keystream instance
    stream: S,
    /// Scratch space for raw keystream words
    words: Vec<u32>,
    /// Table parameters
    params: Params,
}

impl<'g, S: Keystream> F1Job<'g, S> {
    /// Set up a job with its own keystream for `key`.
    pub(crate) fn new(worker: Worker<'g>, params: Params, key: &[u8; KEY_SIZE]) -> Self {
        Self {
            worker,
            stream: S::new(key),
            words: Vec::new(),
            params,
        }
    }

    /// This thread's coordination handle
    pub(crate) fn worker(&self) -> &Worker<'g> {
        &self.worker
    }

    /// Generate, count, agree on offsets, and scatter one block range.
    ///
    /// Every member of `set` must call this for the same pass, each with its
    /// own disjoint `blocks`, and with the same `slots` and `file_block_size`.
    /// `slots` must be large enough for the pass's [`PrefixSum`]. An empty
    /// range is allowed; the thread still takes part in the prefix sum.
    ///
    /// Returns the pass's global offset table, identical on every thread.
    pub(crate) fn run_pass(
        &mut self,
        set: &ActiveSet,
        blocks: Range<u64>,
        slots: &BucketSlots<'_>,
        file_block_size: Option<usize>,
    ) -> PrefixSum {
        let entry_count = (blocks.end - blocks.start) as usize * ENTRIES_PER_BLOCK;
        self.words.resize(entry_count, 0);
        if entry_count > 0 {
            self.stream.produce(blocks.start, &mut self.words);
        }

        let counts = count_buckets(&self.params, &self.words, entry_count);
        let (pfx, mut cursor) = self.worker.prefix_sum(set, &counts, file_block_size);
        debug_assert!(pfx.len() <= slots.len());

        // Entry x comes from word x % 16 of block x / 16
        let first_index = (blocks.start * ENTRIES_PER_BLOCK as u64) as u32;
        // SAFETY: Every participant derived its cursor from the same global
        //         totals and its own position in `set`, so the slots each one
        //         claims are disjoint and lie inside `slots`.
        unsafe {
            scatter(
                &self.params,
                &self.words,
                entry_count,
                first_index,
                &mut cursor,
                slots,
            );
        }
        pfx
    }
}
