//! Second pass over generated words: place entries in their bucket slots
//!
//! Every worker writes into the same pair of bucket arrays at the same time.
//! [`BucketSlots`] is a shared, unsynchronized view of those arrays. It is
//! sound only because the prefix sum hands every worker a disjoint set of
//! slots; see the module documentation of [`crate::prefix`] for that
//! argument. Writes from different workers may touch neighbouring cache lines,
//! which costs some performance but never correctness.

use crate::params::{Params, ENTRIES_PER_BLOCK};
use crate::prefix::Cursor;
use std::marker::PhantomData;

/// Shared write access to the value and index bucket arrays
///
/// Built from two mutable slices, which stay exclusively borrowed for the
/// lifetime `'a`. Copies of this view can be sent to every worker thread.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BucketSlots<'a> {
    /// Start of the encoded value array
    values: *mut u32,
    /// Start of the index array
    indices: *mut u32,
    /// Number of slots in each array
    len: usize,
    /// Ties the raw pointers to the borrowed slices
    _borrow: PhantomData<&'a mut [u32]>,
}

// SAFETY: The view only permits writes through `write`, whose contract
//         requires every concurrent writer to own a distinct set of slots.
unsafe impl Send for BucketSlots<'_> {}
// SAFETY: As above, shared references only ever write disjoint slots.
unsafe impl Sync for BucketSlots<'_> {}

impl<'a> BucketSlots<'a> {
    /// Wrap the two bucket arrays. Both must be the same length.
    pub(crate) fn new(values: &'a mut [u32], indices: &'a mut [u32]) -> Self {
        assert_eq!(values.len(), indices.len());
        Self {
            values: values.as_mut_ptr(),
            indices: indices.as_mut_ptr(),
            len: values.len(),
            _borrow: PhantomData,
        }
    }

    /// Wrap two bucket arrays without holding their borrow.
    ///
    /// # Safety
    ///
    /// The memory behind both slices must stay allocated, and must not be
    /// accessed except through this view, for as long as the returned view or
    /// any copy of it is in use.
    pub(crate) unsafe fn from_raw_parts(values: &mut [u32], indices: &mut [u32]) -> Self {
        assert_eq!(values.len(), indices.len());
        Self {
            values: values.as_mut_ptr(),
            indices: indices.as_mut_ptr(),
            len: values.len(),
            _borrow: PhantomData,
        }
    }

    /// Number of slots in each array
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Store one entry.
    ///
    /// # Safety
    ///
    /// `slot` must be less than [`Self::len`], and no other thread may read
    /// or write `slot` until every writer of this pass has finished.
    #[inline(always)]
    pub(crate) unsafe fn write(&self, slot: usize, value: u32, index: u32) {
        debug_assert!(slot < self.len);
        // SAFETY: In bounds and unshared, per this function's contract.
        unsafe {
            self.values.add(slot).write(value);
            self.indices.add(slot).write(index);
        }
    }
}

/// Scatter the first `entry_count` generated words into their buckets.
///
/// Entry `i` of `words` has index `first_index + i`. For each entry in
/// order, the bucket is recomputed from the word, a slot is claimed from the
/// cursor, and the encoded value and index are stored in that slot.
///
/// # Safety
///
/// `cursor` must come from a [`crate::prefix::PrefixSum`] whose regions fit
/// inside `slots`, and it must have been derived with this worker's own
/// position among the participants, so that the slots it yields are claimed by
/// no other concurrent writer. `entry_count` must equal the total of the
/// counts this worker published for the same words.
pub(crate) unsafe fn scatter(
    params: &Params,
    words: &[u32],
    entry_count: usize,
    first_index: u32,
    cursor: &mut Cursor,
    slots: &BucketSlots<'_>,
) {
    let blocks = words[..entry_count].chunks_exact(ENTRIES_PER_BLOCK);
    let trailing = blocks.remainder();
    let mut index = first_index;

    for block in blocks {
        let block: &[u32; ENTRIES_PER_BLOCK] =
            block.try_into().expect("chunks_exact yields whole blocks");

        // Compute the whole block's values and slots before storing anything
        let mut values = [0u32; ENTRIES_PER_BLOCK];
        let mut targets = [0usize; ENTRIES_PER_BLOCK];
        for ((value, target), &word) in values.iter_mut().zip(targets.iter_mut()).zip(block) {
            *value = params.value_of(word);
            *target = cursor.take(params.bucket_of(*value));
        }

        for (offset, (&value, &target)) in values.iter().zip(&targets).enumerate() {
            let x = index + offset as u32;
            // SAFETY: The cursor only yields slots owned by this worker.
            unsafe { slots.write(target, params.encode(value, x), x) };
        }
        // The last block of a full-width table ends at index 2^32
        index = index.wrapping_add(ENTRIES_PER_BLOCK as u32);
    }

    for (offset, &word) in trailing.iter().enumerate() {
        let value = params.value_of(word);
        let target = cursor.take(params.bucket_of(value));
        let x = index + offset as u32;
        // SAFETY: As above.
        unsafe { slots.write(target, params.encode(value, x), x) };
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]

    use super::{scatter, BucketSlots};
    use crate::counter::count_buckets;
    use crate::params::Params;
    use crate::prefix::PrefixSum;

    fn words(n: usize) -> Vec<u32> {
        (0..n as u32).map(|i| i.wrapping_mul(0x2545_f491) ^ 0x5bd1_e995).collect()
    }

    #[test]
    fn reverse_encounter_order_within_bucket() {
        let params = Params::new(10).unwrap();
        let words = words(16 * 3 + 5);
        let counts = count_buckets(&params, &words, words.len());
        let pfx = PrefixSum::new(counts, None);
        let mut values = vec![0u32; pfx.len()];
        let mut indices = vec![u32::MAX; pfx.len()];

        let slots = BucketSlots::new(&mut values, &mut indices);
        let mut cursor = pfx.cursor(None);
        // SAFETY: Single writer, cursor derived from this pass's prefix sum.
        unsafe { scatter(&params, &words, words.len(), 100, &mut cursor, &slots) };

        for bucket in 0..64 {
            let expected: Vec<u32> = (0..words.len() as u32)
                .filter(|&i| params.bucket_of_word(words[i as usize]) == bucket)
                .map(|i| i + 100)
                .rev()
                .collect();
            assert_eq!(&indices[pfx.data(bucket)], &expected[..]);

            for (&stored, &x) in values[pfx.data(bucket)].iter().zip(&indices[pfx.data(bucket)]) {
                let value = params.value_of(words[(x - 100) as usize]);
                assert_eq!(stored, params.encode(value, x));
                assert_eq!(params.decode_value(bucket, stored), value);
            }
        }
    }

    #[test]
    fn padding_is_untouched() {
        let params = Params::new(8).unwrap();
        let words = words(32);
        let counts = count_buckets(&params, &words, words.len());
        let pfx = PrefixSum::new(counts, Some(16));
        let mut values = vec![u32::MAX; pfx.len()];
        let mut indices = vec![u32::MAX; pfx.len()];

        let slots = BucketSlots::new(&mut values, &mut indices);
        let mut cursor = pfx.cursor(None);
        // SAFETY: Single writer, cursor derived from this pass's prefix sum.
        unsafe { scatter(&params, &words, words.len(), 0, &mut cursor, &slots) };

        for bucket in 0..64 {
            let data = pfx.data(bucket);
            let region = pfx.region(bucket);
            assert!(indices[data.clone()].iter().all(|&x| x < 32));
            assert!(indices[data.end..region.end].iter().all(|&x| x == u32::MAX));
        }
    }
}
