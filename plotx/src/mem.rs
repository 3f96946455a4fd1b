//! In-memory driver: the whole table in one pass
//!
//! The caller supplies two buffers of at least `2^K` entries. Every thread
//! generates an even share of the blocks, and the whole table is scattered
//! into the buffers grouped by bucket, with no alignment padding.

use crate::err::Error;
use crate::job::F1Job;
use crate::keystream::{Keystream, KEY_SIZE};
use crate::params::{BucketCounts, Params};
use crate::plan::ChunkSpec;
use crate::scatter::BucketSlots;
use crate::workers::{AbortOnUnwind, ActiveSet, WorkerGroup};
use std::thread;

/// Generate the whole table into `values` and `indices`.
///
/// Returns the number of entries in each bucket. Bucket `b` occupies the
/// range following the entries of buckets `0..b` in both buffers.
pub(crate) fn generate_into<S: Keystream>(
    params: &Params,
    key: &[u8; KEY_SIZE],
    threads: usize,
    values: &mut [u32],
    indices: &mut [u32],
) -> Result<BucketCounts, Error> {
    let required = usize::try_from(params.entry_count()).unwrap_or(usize::MAX);
    let provided = values.len().min(indices.len());
    if provided < required {
        return Err(Error::BufferTooSmall { provided, required });
    }

    let spec = ChunkSpec::whole(params.block_count(), threads);
    let set = ActiveSet::new(spec.participants);
    let group = WorkerGroup::new(spec.participants);
    let slots = BucketSlots::new(&mut values[..required], &mut indices[..required]);

    tracing::debug!(
        k = params.k(),
        participants = spec.participants,
        entries = spec.entries(),
        "generating table in memory"
    );

    let pfx = thread::scope(|scope| {
        for id in 1..spec.participants {
            let (group, slots) = (&group, &slots);
            let _ = scope.spawn(move || {
                let _guard = AbortOnUnwind;
                let mut job = F1Job::<S>::new(group.worker(id), *params, key);
                let _ = job.run_pass(&set, spec.thread_blocks(id), slots, None);
            });
        }

        let _guard = AbortOnUnwind;
        let mut job = F1Job::<S>::new(group.worker(0), *params, key);
        job.run_pass(&set, spec.thread_blocks(0), &slots, None)
    });

    Ok(*pfx.totals())
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]

    use super::generate_into;
    use crate::err::Error;
    use crate::keystream::{ChaCha8Keystream, Keystream};
    use crate::params::Params;

    #[test]
    fn matches_scalar_reference() {
        let params = Params::new(10).unwrap();
        let key = [3u8; 32];
        let mut words = vec![0u32; 1 << 10];
        ChaCha8Keystream::new(&key).produce(0, &mut words);

        for threads in [1, 3] {
            let mut values = vec![0u32; 1 << 10];
            let mut indices = vec![0u32; 1 << 10];
            let counts =
                generate_into::<ChaCha8Keystream>(&params, &key, threads, &mut values, &mut indices)
                    .unwrap();

            let mut start = 0;
            for (bucket, &count) in counts.iter().enumerate() {
                let mut got = indices[start..start + count as usize].to_vec();
                got.sort_unstable();
                let expected: Vec<u32> = (0..1u32 << 10)
                    .filter(|&x| params.bucket_of_word(words[x as usize]) == bucket)
                    .collect();
                assert_eq!(got, expected);
                start += count as usize;
            }
            assert_eq!(start, 1 << 10);
        }
    }

    #[test]
    fn short_buffers_are_rejected() {
        let params = Params::new(8).unwrap();
        let mut values = vec![0u32; 256];
        let mut indices = vec![0u32; 255];
        let err = generate_into::<ChaCha8Keystream>(&params, &[0; 32], 1, &mut values, &mut indices)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::BufferTooSmall {
                provided: 255,
                required: 256
            }
        ));
    }
}
