//! Chunked generation through the in-memory and file-backed disk queues

use plotx::{
    DiskQueue, Error, F1Builder, F1Report, FileQueue, MemoryBuckets, MemoryQueue, Stream,
    BUCKET_COUNT, ENTRY_SIZE,
};
use std::collections::HashMap;

/// Smallest chunk size that holds `blocks` keystream blocks
fn chunk_size(blocks: usize, block_size: usize) -> usize {
    2 * BUCKET_COUNT * block_size + blocks * 128
}

fn reference(k: u32, plot_id: &[u8; 32]) -> MemoryBuckets {
    F1Builder::new()
        .k(k)
        .threads(1)
        .build_from_plot_id(plot_id)
        .unwrap()
        .generate_mem()
        .unwrap()
}

fn sorted_reference(buckets: &MemoryBuckets, bucket: usize) -> Vec<(u32, u32)> {
    let mut pairs: Vec<_> = buckets
        .values(bucket)
        .iter()
        .copied()
        .zip(buckets.indices(bucket).iter().copied())
        .collect();
    pairs.sort_unstable();
    pairs
}

fn sorted_streams(values: Vec<u32>, indices: Vec<u32>) -> Vec<(u32, u32)> {
    assert_eq!(values.len(), indices.len());
    let mut pairs: Vec<_> = values.into_iter().zip(indices).collect();
    pairs.sort_unstable();
    pairs
}

fn run_disk(
    k: u32,
    threads: usize,
    chunk: usize,
    queue: &MemoryQueue,
    plot_id: &[u8; 32],
) -> F1Report {
    F1Builder::new()
        .k(k)
        .threads(threads)
        .chunk_size(chunk)
        .build_from_plot_id(plot_id)
        .unwrap()
        .generate_disk(queue)
        .unwrap()
}

/// Check every bucket's streams against the in-memory table.
fn assert_matches_memory(queue: &MemoryQueue, expected: &MemoryBuckets) {
    for bucket in 0..BUCKET_COUNT {
        let got = sorted_streams(
            queue.stream_words(Stream::Value, bucket),
            queue.stream_words(Stream::Index, bucket),
        );
        assert_eq!(got, sorted_reference(expected, bucket), "bucket {bucket}");
    }
}

/// Compares each bucket's records as a sorted set, not as a byte stream.
///
/// Every chunk scatters its own entries in reverse order, and a chunk's
/// unaligned tail reaches the stream only after later chunks' whole blocks.
/// The record order within a bucket therefore depends on the chunking, and
/// only the single chunk, single thread layout reproduces the in-memory
/// order exactly (see `single_chunk_single_thread_is_bucket_order`).
#[test]
fn k8_four_chunks_match_single_chunk() {
    let plot_id = [0x77u8; 32];
    let expected = reference(8, &plot_id);
    for threads in [1, 2] {
        let queue = MemoryQueue::new(16);
        let report = run_disk(8, threads, 2560, &queue, &plot_id);
        assert_eq!(report.chunks, 4);
        assert_eq!(report.total_entries(), 256);
        for (bucket, &count) in expected.counts().iter().enumerate() {
            assert_eq!(report.bucket_counts[bucket], u64::from(count));
        }
        assert_matches_memory(&queue, &expected);
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.outstanding_buffers(), 0);
    }
}

#[test]
fn single_chunk_single_thread_is_bucket_order() {
    // One chunk and one thread: each bucket's stream is exactly the
    // in-memory bucket, descending indices included
    let plot_id = [0x21u8; 32];
    let expected = reference(10, &plot_id);
    let queue = MemoryQueue::new(64);
    let report = run_disk(10, 1, chunk_size(64, 64), &queue, &plot_id);
    assert_eq!(report.chunks, 1);
    for bucket in 0..BUCKET_COUNT {
        assert_eq!(queue.stream_words(Stream::Value, bucket), expected.values(bucket));
        assert_eq!(queue.stream_words(Stream::Index, bucket), expected.indices(bucket));
    }
}

#[test]
fn writes_stay_block_aligned() {
    let plot_id = [0x0fu8; 32];
    for (threads, blocks, block_size) in [(1, 8, 16), (3, 9, 32), (4, 40, 64), (2, 6, 4)] {
        let queue = MemoryQueue::new(block_size);
        let _ = run_disk(11, threads, chunk_size(blocks, block_size), &queue, &plot_id);

        let submissions = queue.submissions();
        let mut last: HashMap<(Stream, usize), usize> = HashMap::new();
        for (i, sub) in submissions.iter().enumerate() {
            assert_eq!(sub.offset % block_size as u64, 0);
            assert_eq!(sub.data.len() % ENTRY_SIZE, 0);
            let _ = last.insert((sub.stream, sub.bucket), i);
        }
        // Only the final write of a stream may be a partial block
        for (i, sub) in submissions.iter().enumerate() {
            if last[&(sub.stream, sub.bucket)] != i {
                assert_eq!(sub.data.len() % block_size, 0, "write {i}");
            }
        }
    }
}

#[test]
fn remainder_accounting() {
    let plot_id = [0xeeu8; 32];
    let expected = reference(10, &plot_id);
    let cases = [(1, 4, 16), (2, 10, 64), (3, 7, 8), (5, 20, 128), (8, 64, 512)];
    for (threads, blocks, block_size) in cases {
        let queue = MemoryQueue::new(block_size);
        let report = run_disk(10, threads, chunk_size(blocks, block_size), &queue, &plot_id);

        assert_eq!(report.direct_bytes + report.remainder_bytes, 1024 * ENTRY_SIZE as u64);
        for bucket in 0..BUCKET_COUNT {
            let bytes = queue.stream_bytes(Stream::Value, bucket).len();
            assert_eq!(bytes, expected.counts()[bucket] as usize * ENTRY_SIZE);
            assert_eq!(queue.stream_bytes(Stream::Index, bucket).len(), bytes);
        }
        assert_matches_memory(&queue, &expected);
    }
}

#[test]
fn trailing_chunk_with_fewer_threads() {
    let plot_id = [0x99u8; 32];
    let expected = reference(8, &plot_id);

    // Three threads at three blocks each leave seven trailing blocks
    let queue = MemoryQueue::new(16);
    let report = run_disk(8, 3, chunk_size(10, 16), &queue, &plot_id);
    assert_eq!(report.chunks, 2);
    assert_matches_memory(&queue, &expected);

    // Five threads leave a single trailing block for one participant
    let queue = MemoryQueue::new(16);
    let report = run_disk(8, 5, chunk_size(15, 16), &queue, &plot_id);
    assert_eq!(report.chunks, 2);
    assert_matches_memory(&queue, &expected);

    // More threads than blocks in the only chunk
    let queue = MemoryQueue::new(16);
    let report = run_disk(8, 32, chunk_size(64, 16), &queue, &plot_id);
    assert_eq!(report.chunks, 1);
    assert_matches_memory(&queue, &expected);
}

#[test]
fn one_buffer_at_a_time() {
    let queue = MemoryQueue::new(16);
    let report = run_disk(9, 2, chunk_size(4, 16), &queue, &[1u8; 32]);
    assert_eq!(report.chunks, 8);
    assert_eq!(queue.peak_buffers(), 1);
    assert_eq!(queue.outstanding_buffers(), 0);
}

#[test]
fn rejected_disk_settings() {
    let generator = F1Builder::new()
        .k(10)
        .threads(4)
        .chunk_size(chunk_size(3, 16))
        .build_from_plot_id(&[0u8; 32])
        .unwrap();
    assert!(matches!(
        generator.generate_disk(&MemoryQueue::new(16)),
        Err(Error::ChunkTooSmall { threads: 4, .. })
    ));
    assert!(matches!(
        generator.generate_disk(&MemoryQueue::new(6)),
        Err(Error::BlockSize { block_size: 6, .. })
    ));
}

#[test]
fn file_queue_end_to_end() {
    let plot_id = [0x5eu8; 32];
    let expected = reference(10, &plot_id);
    let dir = std::env::temp_dir().join(format!("plotx-disk-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);

    let queue = FileQueue::create(&dir, 64, 4 * chunk_size(16, 64)).unwrap();
    let generator = F1Builder::new()
        .k(10)
        .threads(2)
        .chunk_size(chunk_size(16, 64))
        .build_from_plot_id(&plot_id)
        .unwrap();
    let report = generator.generate_disk(&queue).unwrap();
    assert_eq!(report.chunks, 4);
    assert_eq!(queue.block_size(), 64);

    let read_words = |stream, bucket| -> Vec<u32> {
        std::fs::read(queue.path(stream, bucket))
            .unwrap()
            .chunks_exact(ENTRY_SIZE)
            .map(|b| u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    };
    for bucket in 0..BUCKET_COUNT {
        let got = sorted_streams(
            read_words(Stream::Value, bucket),
            read_words(Stream::Index, bucket),
        );
        assert_eq!(got, sorted_reference(&expected, bucket));
    }

    queue.finish().unwrap();
    std::fs::remove_dir_all(&dir).unwrap();
}
