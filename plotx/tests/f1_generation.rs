//! End to end checks of in-memory generation against a scalar model

use plotx::{
    plot_key, ChaCha8Keystream, Error, F1Builder, Keystream, MemoryBuckets, Params, BUCKET_COUNT,
    MAX_THREADS,
};

/// Raw keystream words for a whole table, generated one block at a time
fn reference_words(k: u32, plot_id: &[u8; 32]) -> Vec<u32> {
    let mut stream = ChaCha8Keystream::new(&plot_key(plot_id));
    let mut words = vec![0u32; 1 << k];
    for (block, chunk) in words.chunks_mut(16).enumerate() {
        stream.produce(block as u64, chunk);
    }
    words
}

fn generate(k: u32, threads: usize, plot_id: &[u8; 32]) -> MemoryBuckets {
    F1Builder::new()
        .k(k)
        .threads(threads)
        .build_from_plot_id(plot_id)
        .unwrap()
        .generate_mem()
        .unwrap()
}

/// Every bucket's (encoded value, index) pairs in sorted order
fn sorted_pairs(buckets: &MemoryBuckets, bucket: usize) -> Vec<(u32, u32)> {
    let mut pairs: Vec<_> = buckets
        .values(bucket)
        .iter()
        .copied()
        .zip(buckets.indices(bucket).iter().copied())
        .collect();
    pairs.sort_unstable();
    pairs
}

#[test]
fn k8_single_thread_matches_scalar_model() {
    let plot_id = [0x5au8; 32];
    let params = Params::new(8).unwrap();
    let words = reference_words(8, &plot_id);
    let buckets = generate(8, 1, &plot_id);

    let mut seen = 0;
    for bucket in 0..BUCKET_COUNT {
        // A single thread fills each bucket from the top down
        let expected: Vec<u32> = (0..256u32)
            .rev()
            .filter(|&x| params.bucket_of(params.value_of(words[x as usize])) == bucket)
            .collect();
        assert_eq!(buckets.indices(bucket), &expected[..], "bucket {bucket}");

        for (&stored, &x) in buckets.values(bucket).iter().zip(&expected) {
            let value = params.value_of(words[x as usize]);
            assert_eq!(stored, params.encode(value, x));
        }
        seen += expected.len();
    }
    assert_eq!(seen, 256);
}

#[test]
fn thread_counts_agree() {
    let plot_id = [0x11u8; 32];
    let single = generate(12, 1, &plot_id);
    for threads in [2, 3, 7, 64, 256] {
        let multi = generate(12, threads, &plot_id);
        assert_eq!(multi.counts(), single.counts());
        for bucket in 0..BUCKET_COUNT {
            assert_eq!(sorted_pairs(&multi, bucket), sorted_pairs(&single, bucket));
        }
    }
}

#[test]
fn threads_fill_bucket_ranges_in_id_order() {
    // Two threads split 16 blocks evenly, so indices below 128 belong to
    // thread 0 and sit below thread 1's entries in every bucket
    let buckets = generate(8, 2, &[3u8; 32]);
    for bucket in 0..BUCKET_COUNT {
        let indices = buckets.indices(bucket);
        let split = indices.iter().position(|&x| x >= 128).unwrap_or(indices.len());
        assert!(indices[..split].iter().all(|&x| x < 128));
        assert!(indices[split..].iter().all(|&x| x >= 128));
    }
}

#[test]
fn decoded_values_match_keystream() {
    let plot_id = [0xc3u8; 32];
    for k in [9, 16] {
        let params = Params::new(k).unwrap();
        let words = reference_words(k, &plot_id);
        let buckets = generate(k, 4, &plot_id);

        let mut total = 0u64;
        for bucket in 0..BUCKET_COUNT {
            for (value, x) in buckets.entries(bucket) {
                assert_eq!(value, params.value_of(words[x as usize]));
                assert_eq!(params.bucket_of(value), bucket);
                total += 1;
            }
        }
        assert_eq!(total, 1 << k);
        let counted: u64 = buckets.counts().iter().map(|&c| u64::from(c)).sum();
        assert_eq!(counted, 1 << k);
    }
}

#[test]
fn caller_buffers_may_be_larger() {
    let plot_id = [9u8; 32];
    let generator = F1Builder::new().k(10).threads(3).build_from_plot_id(&plot_id).unwrap();
    let mut values = vec![u32::MAX; 1500];
    let mut indices = vec![u32::MAX; 1500];
    let counts = generator.generate_mem_into(&mut values, &mut indices).unwrap();

    assert_eq!(counts.iter().sum::<u32>(), 1024);
    assert!(indices[1024..].iter().all(|&x| x == u32::MAX));
    let mut all: Vec<u32> = indices[..1024].to_vec();
    all.sort_unstable();
    assert!(all.iter().copied().eq(0..1024));
}

#[test]
fn plot_id_and_key_agree() {
    let plot_id = [0x42u8; 32];
    let by_id = F1Builder::new().k(8).threads(1).build_from_plot_id(&plot_id).unwrap();
    let by_key = F1Builder::new().k(8).threads(1).build_from_key(&plot_key(&plot_id)).unwrap();
    let a = by_id.generate_mem().unwrap();
    let b = by_key.generate_mem().unwrap();
    for bucket in 0..BUCKET_COUNT {
        assert_eq!(a.values(bucket), b.values(bucket));
        assert_eq!(a.indices(bucket), b.indices(bucket));
    }
}

#[test]
fn rejected_settings() {
    let id = [0u8; 32];
    assert!(matches!(
        F1Builder::new().k(7).build_from_plot_id(&id),
        Err(Error::InvalidK { k: 7, .. })
    ));
    assert!(matches!(
        F1Builder::new().k(33).build_from_plot_id(&id),
        Err(Error::InvalidK { k: 33, .. })
    ));
    assert!(matches!(
        F1Builder::new().k(8).threads(0).build_from_plot_id(&id),
        Err(Error::ThreadCount { threads: 0, .. })
    ));
    assert!(matches!(
        F1Builder::new().k(8).threads(MAX_THREADS + 1).build_from_plot_id(&id),
        Err(Error::ThreadCount { .. })
    ));

    let generator = F1Builder::new().k(8).threads(2).build_from_plot_id(&id).unwrap();
    let mut values = vec![0u32; 256];
    let mut indices = vec![0u32; 200];
    assert!(matches!(
        generator.generate_mem_into(&mut values, &mut indices),
        Err(Error::BufferTooSmall {
            provided: 200,
            required: 256
        })
    ));
}
