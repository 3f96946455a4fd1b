//! First pass over generated words: count entries per bucket

use crate::params::{BucketCounts, Params, BUCKET_COUNT, ENTRIES_PER_BLOCK};

/// Count how many of the first `entry_count` words fall in each bucket.
///
/// Whole blocks go through an unrolled loop. The trailing entries of a
/// partially filled last block are counted one at a time.
///
/// Panics if `entry_count` exceeds `words.len()`.
pub fn count_buckets(params: &Params, words: &[u32], entry_count: usize) -> BucketCounts {
    let mut counts = [0u32; BUCKET_COUNT];

    let blocks = words[..entry_count].chunks_exact(ENTRIES_PER_BLOCK);
    let trailing = blocks.remainder();

    for block in blocks {
        let block = block.try_into().expect("chunks_exact yields whole blocks");
        count_block(params, block, &mut counts);
    }

    for &word in trailing {
        counts[params.bucket_of_word(word)] += 1;
    }

    counts
}

/// Count one whole block.
#[inline(always)]
fn count_block(params: &Params, block: &[u32; ENTRIES_PER_BLOCK], counts: &mut BucketCounts) {
    let mut buckets = [0usize; ENTRIES_PER_BLOCK];
    for (bucket, &word) in buckets.iter_mut().zip(block) {
        *bucket = params.bucket_of_word(word);
    }
    for bucket in buckets {
        counts[bucket] += 1;
    }
}

#[cfg(test)]
mod test {
    use super::count_buckets;
    use crate::params::{Params, BUCKET_COUNT};

    fn naive(params: &Params, words: &[u32]) -> [u32; BUCKET_COUNT] {
        let mut counts = [0u32; BUCKET_COUNT];
        for &word in words {
            counts[params.bucket_of(params.value_of(word))] += 1;
        }
        counts
    }

    fn words(n: usize) -> Vec<u32> {
        (0..n as u32)
            .map(|i| i.wrapping_mul(0x9e37_79b9).rotate_left(7))
            .collect()
    }

    #[test]
    fn whole_blocks() {
        let params = Params::new(20).unwrap();
        let words = words(16 * 40);
        let counts = count_buckets(&params, &words, words.len());
        assert_eq!(counts, naive(&params, &words));
        assert_eq!(counts.iter().sum::<u32>(), 640);
    }

    #[test]
    fn trailing_entries() {
        let params = Params::new(8).unwrap();
        let words = words(16 * 4);
        for entry_count in [0, 1, 15, 16, 17, 33, 63, 64] {
            let counts = count_buckets(&params, &words, entry_count);
            assert_eq!(counts.iter().sum::<u32>() as usize, entry_count);
            assert_eq!(counts, naive(&params, &words[..entry_count]));
        }
    }

    #[test]
    #[should_panic]
    fn entry_count_beyond_buffer() {
        let params = Params::new(8).unwrap();
        let _ = count_buckets(&params, &[0u32; 16], 17);
    }
}
