//! Offset tables: turning bucket counts into write positions
//!
//! An offset table is computed once per generation pass from the global
//! per-bucket totals, and it is then consumed by each worker as a private
//! write cursor. The two phases are kept apart by type: [`PrefixSum`] is the
//! immutable result of the prefix sum, and [`Cursor`] is the mutable copy a
//! single worker decrements while scattering.
//!
//! # Layout
//!
//! Buckets are laid out in order. Bucket `b` owns the region
//! `region(b) = ends[b-1] .. ends[b]`, where `ends` is the inclusive running sum
//! of the bucket sizes. When a storage block size is given, each bucket's size
//! is first rounded up to whole blocks, so every region starts on a block
//! boundary. The bucket's entries fill the start of its region, in
//! `data(b) = region(b).start .. region(b).start + totals[b]`, and any padding
//! follows them. The padding is never written to storage.
//!
//! # Disjointness
//!
//! With participants `0..n` holding counts `c_0 .. c_{n-1}` for a bucket, the
//! cursor for participant `t` starts at `data.end - (c_{t+1} + .. + c_{n-1})`.
//! Participant `t` pre-decrements it exactly `c_t` times, so it writes the
//! slots `data.start + (c_0 + .. + c_{t-1}) .. data.start + (c_0 + .. + c_t)`.
//! These ranges are consecutive, do not overlap, and together cover `data`
//! exactly, because `c_0 + .. + c_{n-1}` is the bucket's total. No slot is
//! ever written by two participants during a pass.

use crate::params::{BucketCounts, BUCKET_COUNT, ENTRY_SIZE};
use std::ops::Range;

/// Immutable offset table for one generation pass
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PrefixSum {
    /// Global entry count of each bucket
    totals: BucketCounts,
    /// Exclusive end of each bucket's region, in entries, padding included
    ends: [usize; BUCKET_COUNT],
}

impl PrefixSum {
    /// Lay out buckets for the given global totals.
    ///
    /// With `file_block_size`, each region is rounded up to a whole number
    /// of storage blocks. The block size must be a nonzero multiple of
    /// [`ENTRY_SIZE`].
    pub fn new(totals: BucketCounts, file_block_size: Option<usize>) -> Self {
        let align = file_block_size.map_or(1, |block_size| {
            debug_assert!(block_size > 0 && block_size % ENTRY_SIZE == 0);
            block_size / ENTRY_SIZE
        });

        let mut ends = [0usize; BUCKET_COUNT];
        let mut end = 0usize;
        for (bucket_end, &total) in ends.iter_mut().zip(&totals) {
            end += (total as usize).next_multiple_of(align);
            *bucket_end = end;
        }

        Self { totals, ends }
    }

    /// Global entry count of each bucket
    pub fn totals(&self) -> &BucketCounts {
        &self.totals
    }

    /// Exclusive end of each bucket's region, in entries
    pub fn region_ends(&self) -> &[usize; BUCKET_COUNT] {
        &self.ends
    }

    /// Entries spanned by all regions, padding included
    pub fn len(&self) -> usize {
        self.ends[BUCKET_COUNT - 1]
    }

    /// True if no bucket has any entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The whole region reserved for a bucket, in entries.
    pub fn region(&self, bucket: usize) -> Range<usize> {
        let start = match bucket {
            0 => 0,
            _ => self.ends[bucket - 1],
        };
        start..self.ends[bucket]
    }

    /// The part of a bucket's region that holds entries.
    pub fn data(&self, bucket: usize) -> Range<usize> {
        let start = self.region(bucket).start;
        start..start + self.totals[bucket] as usize
    }

    /// Derive one participant's write cursor.
    ///
    /// `later` yields the counts of every participant with a higher id than
    /// the caller. A single participant passes nothing.
    pub fn cursor<I>(&self, later: I) -> Cursor
    where
        I: IntoIterator<Item = BucketCounts>,
    {
        let mut next = [0usize; BUCKET_COUNT];
        for (bucket, slot) in next.iter_mut().enumerate() {
            *slot = self.data(bucket).end;
        }
        for counts in later {
            for (slot, &count) in next.iter_mut().zip(&counts) {
                *slot -= count as usize;
            }
        }
        Cursor { next }
    }
}

/// One participant's live write positions
///
/// Each position is one past the next slot to be written. Taking a slot
/// pre-decrements the position, so entries land in reverse encounter order.
#[derive(Clone, Debug)]
pub struct Cursor {
    /// Next position per bucket
    next: [usize; BUCKET_COUNT],
}

impl Cursor {
    /// Claim the next slot in a bucket.
    #[inline(always)]
    pub fn take(&mut self, bucket: usize) -> usize {
        self.next[bucket] -= 1;
        self.next[bucket]
    }

    /// Current positions, for inspection
    pub fn positions(&self) -> &[usize; BUCKET_COUNT] {
        &self.next
    }
}
