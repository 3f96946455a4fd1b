//! Chunked driver: generate the table to a [`DiskQueue`]
//!
//! Every chunk goes through the same cycle on all participating threads:
//!
//! 1. The control thread borrows a chunk buffer from the queue, which may
//!    block on the queue's budget, and publishes its bucket slots.
//! 2. A barrier releases the other participants.
//! 3. Every participant generates, counts, and scatters its block range,
//!    with a barrier inside the prefix sum and another after scattering.
//! 4. The control thread submits the block-aligned part of each bucket for
//!    both streams, hands the tails to the [`RemainderTracker`], and returns
//!    the buffer's budget to the queue.
//! 5. A final barrier releases everyone to the next chunk.
//!
//! Chunk buffers hold the value stream followed by the index stream. Buckets
//! are laid out with storage block rounding, so each bucket's direct write
//! starts on a block boundary in the buffer and covers whole blocks.

use crate::err::Error;
use crate::job::F1Job;
use crate::keystream::{Keystream, KEY_SIZE};
use crate::params::{Params, BUCKET_COUNT, ENTRY_SIZE};
use crate::plan::{ChunkPlan, ChunkSpec};
use crate::prefix::PrefixSum;
use crate::queue::{DiskQueue, IoBuffer, Stream};
use crate::remainder::RemainderTracker;
use crate::scatter::BucketSlots;
use crate::workers::{AbortOnUnwind, ActiveSet, WorkerGroup};
use std::sync::{Mutex, PoisonError};
use std::thread;

/// Totals gathered by the control thread over a whole run
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ChunkTotals {
    /// Entries per bucket over every chunk
    pub(crate) bucket_counts: [u64; BUCKET_COUNT],
    /// Number of chunks generated
    pub(crate) chunks: u64,
    /// Bytes per stream written directly from chunk buffers
    pub(crate) direct_bytes: u64,
    /// Bytes per stream written from remainder staging
    pub(crate) remainder_bytes: u64,
}

impl Default for ChunkTotals {
    fn default() -> Self {
        Self {
            bucket_counts: [0; BUCKET_COUNT],
            chunks: 0,
            direct_bytes: 0,
            remainder_bytes: 0,
        }
    }
}

/// Control thread state that lives across chunks
struct Control<'q, Q: DiskQueue + ?Sized> {
    /// Destination for every write
    queue: &'q Q,
    /// Storage block size in bytes
    block_size: usize,
    /// Words per stream in a chunk buffer
    stream_words: usize,
    /// Staging for unaligned tails
    tracker: RemainderTracker,
    /// Buffer of the chunk in progress
    buffer: Option<IoBuffer>,
    /// Running totals
    totals: ChunkTotals,
}

impl<'q, Q: DiskQueue + ?Sized> Control<'q, Q> {
    /// Borrow the next chunk buffer and describe its bucket slots.
    fn begin_chunk<'a>(&mut self) -> BucketSlots<'a> {
        let mut buffer = self.queue.acquire_buffer(2 * self.stream_words);
        let (values, indices) = buffer.words_mut().split_at_mut(self.stream_words);
        // SAFETY: The buffer's heap allocation stays in place while the
        //         buffer is held in `self.buffer`, and the control thread
        //         doesn't touch it again until every participant has passed
        //         the barrier that follows scattering.
        let slots = unsafe { BucketSlots::from_raw_parts(values, indices) };
        self.buffer = Some(buffer);
        slots
    }

    /// Submit a finished chunk and return its buffer.
    fn end_chunk(&mut self, pfx: &PrefixSum) {
        let Some(buffer) = self.buffer.take() else {
            return;
        };
        let (bytes, lease) = buffer.freeze();
        let stream_bytes = self.stream_words * ENTRY_SIZE;
        let block_size = self.block_size;

        for bucket in 0..BUCKET_COUNT {
            let data = pfx.data(bucket);
            let start = data.start * ENTRY_SIZE;
            let len = data.len() * ENTRY_SIZE;
            let aligned = len / block_size * block_size;
            if aligned > 0 {
                for (stream, base) in [(Stream::Value, 0), (Stream::Index, stream_bytes)] {
                    let offset = base + start;
                    debug_assert_eq!(offset % block_size, 0);
                    self.queue.submit_write(stream, bucket, bytes.slice(offset..offset + aligned));
                }
            }
            self.totals.direct_bytes += aligned as u64;
            self.totals.remainder_bytes += (len - aligned) as u64;
        }
        self.queue.commit();

        for bucket in 0..BUCKET_COUNT {
            let data = pfx.data(bucket);
            let start = data.start * ENTRY_SIZE;
            let end = data.end * ENTRY_SIZE;
            let tail = start + (end - start) / block_size * block_size;
            self.tracker.save(
                self.queue,
                bucket,
                &bytes[tail..end],
                &bytes[stream_bytes + tail..stream_bytes + end],
            );
        }
        drop(bytes);
        self.queue.release_buffer(lease);
        self.queue.commit();

        for (total, &count) in self.totals.bucket_counts.iter_mut().zip(pfx.totals()) {
            *total += u64::from(count);
        }
        self.totals.chunks += 1;
    }

    /// Write all staged tails and wait until every write has been carried out.
    fn finish(mut self) -> ChunkTotals {
        self.tracker.finish(self.queue);
        let fence = self.queue.add_fence();
        self.queue.commit();
        fence.wait();
        tracing::debug!(
            flushed_blocks = self.tracker.flushed_blocks(),
            "remainder staging drained"
        );
        self.totals
    }
}

/// Slots of the chunk in progress, shared by the control thread
type Handoff<'a> = Mutex<Option<BucketSlots<'a>>>;

/// Generate the whole table through `queue`, one chunk at a time.
pub(crate) fn generate_chunked<S: Keystream, Q: DiskQueue + ?Sized>(
    params: &Params,
    key: &[u8; KEY_SIZE],
    threads: usize,
    chunk_size: usize,
    queue: &Q,
) -> Result<ChunkTotals, Error> {
    let block_size = queue.block_size();
    if block_size == 0 || block_size % ENTRY_SIZE != 0 {
        return Err(Error::BlockSize {
            block_size,
            entry_size: ENTRY_SIZE,
        });
    }
    let plan = ChunkPlan::new(params, threads, chunk_size, block_size)?;
    tracing::debug!(
        chunks = plan.chunk_count(),
        blocks_per_chunk = plan.full_chunk_blocks(),
        trailing_participants = plan.trailing_participants(),
        "chunk plan ready"
    );

    let group = WorkerGroup::new(threads);
    Ok(drive::<S, Q>(&group, params, key, &plan, queue))
}

/// Run every chunk of `plan` on the threads of `group`.
fn drive<S: Keystream, Q: DiskQueue + ?Sized>(
    group: &WorkerGroup,
    params: &Params,
    key: &[u8; KEY_SIZE],
    plan: &ChunkPlan,
    queue: &Q,
) -> ChunkTotals {
    let block_size = queue.block_size();
    let handoff: Handoff<'_> = Mutex::new(None);
    let control = Control {
        queue,
        block_size,
        stream_words: plan.stream_words(),
        tracker: RemainderTracker::new(block_size),
        buffer: None,
        totals: ChunkTotals::default(),
    };

    let control = thread::scope(|scope| {
        for id in 1..group.threads() {
            let handoff = &handoff;
            let _ = scope.spawn(move || {
                let _guard = AbortOnUnwind;
                let job = F1Job::<S>::new(group.worker(id), *params, key);
                let _ = run_chunks::<S, Q>(job, plan, handoff, block_size, None);
            });
        }

        let _guard = AbortOnUnwind;
        let job = F1Job::<S>::new(group.worker(0), *params, key);
        run_chunks(job, plan, &handoff, block_size, Some(control))
    });

    control.map_or_else(ChunkTotals::default, Control::finish)
}

/// One thread's loop over every chunk of the plan.
///
/// Returns the control state on the control thread.
fn run_chunks<'q, S: Keystream, Q: DiskQueue + ?Sized>(
    mut job: F1Job<'_, S>,
    plan: &ChunkPlan,
    handoff: &Handoff<'_>,
    block_size: usize,
    mut control: Option<Control<'q, Q>>,
) -> Option<Control<'q, Q>> {
    let id = job.worker().id();
    debug_assert_eq!(control.is_some(), job.worker().is_control());

    for spec in plan.chunks() {
        let set = ActiveSet::new(spec.participants);
        if !set.contains(id) {
            return control;
        }
        run_chunk(&mut job, &spec, &set, handoff, block_size, control.as_mut());
    }
    control
}

/// One thread's part in a single chunk.
fn run_chunk<S: Keystream, Q: DiskQueue + ?Sized>(
    job: &mut F1Job<'_, S>,
    spec: &ChunkSpec,
    set: &ActiveSet,
    handoff: &Handoff<'_>,
    block_size: usize,
    mut control: Option<&mut Control<'_, Q>>,
) {
    let lock = move || handoff.lock().unwrap_or_else(PoisonError::into_inner);
    let worker = *job.worker();

    if let Some(control) = control.as_deref_mut() {
        tracing::debug!(
            first_block = spec.first_block,
            blocks = spec.blocks,
            participants = spec.participants,
            "starting chunk"
        );
        *lock() = Some(control.begin_chunk());
    }
    worker.barrier(set);

    let Some(slots) = *lock() else {
        unreachable!("control thread publishes slots before the release barrier");
    };
    let blocks = spec.thread_blocks(worker.id());
    let pfx = job.run_pass(set, blocks, &slots, Some(block_size));
    worker.barrier(set);

    if let Some(control) = control {
        *lock() = None;
        control.end_chunk(&pfx);
    }
    worker.barrier(set);
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]

    use super::drive;
    use crate::keystream::ChaCha8Keystream;
    use crate::params::{Params, BUCKET_COUNT, ENTRY_SIZE};
    use crate::plan::ChunkPlan;
    use crate::queue::{MemoryQueue, Stream};
    use crate::workers::WorkerGroup;

    #[test]
    fn idle_threads_leave_count_board_alone() {
        // 16 blocks at one block per thread: a single trailing chunk that
        // only threads 0..16 take part in
        let params = Params::new(8).unwrap();
        let threads = 32;
        let chunk_size = 2 * BUCKET_COUNT * 16 + threads * 128;
        let plan = ChunkPlan::new(&params, threads, chunk_size, 16).unwrap();
        assert_eq!(plan.chunk_count(), 1);
        assert_eq!(plan.trailing_participants(), 16);

        let group = WorkerGroup::new(threads);
        let untouched = [u32::MAX; BUCKET_COUNT];
        for id in 0..threads {
            group.board().publish(id, &untouched);
        }

        let queue = MemoryQueue::new(16);
        let totals = drive::<ChaCha8Keystream, _>(&group, &params, &[9u8; 32], &plan, &queue);
        assert_eq!(totals.chunks, 1);
        assert_eq!(totals.bucket_counts.iter().sum::<u64>(), 256);

        for id in 0..16 {
            assert_ne!(group.board().read(id), untouched, "thread {id}");
        }
        for id in 16..threads {
            assert_eq!(group.board().read(id), untouched, "thread {id}");
        }

        let written: usize = (0..BUCKET_COUNT)
            .map(|bucket| queue.stream_bytes(Stream::Index, bucket).len())
            .sum();
        assert_eq!(written, 256 * ENTRY_SIZE);
    }
}
