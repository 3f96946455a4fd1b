//! Worker thread coordination
//!
//! A [`WorkerGroup`] is the shared state behind a fixed set of scoped worker
//! threads with stable ids `0..threads`. Thread 0 is the control thread. The
//! group owns one reusable [`Barrier`] per possible participant count, so a
//! pass over fewer blocks than threads can shrink to an [`ActiveSet`] of the
//! lowest ids while the others return early.
//!
//! Counts are exchanged through a [`CountBoard`]: one slot of atomic counters
//! per thread id, written before a barrier and read after it. The barrier
//! orders every publication before every read, so relaxed atomics suffice.
//!
//! A participant that unwinds would leave the rest of its set waiting at the
//! next barrier, so every worker thread holds an [`AbortOnUnwind`] guard.

use crate::params::{BucketCounts, BUCKET_COUNT};
use crate::prefix::{Cursor, PrefixSum};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Barrier;

/// Upper limit on the number of worker threads
pub const MAX_THREADS: usize = 256;

/// Per-thread published bucket counts, indexed by thread id
#[derive(Debug)]
pub(crate) struct CountBoard {
    /// One row of counters per thread
    slots: Vec<[AtomicU32; BUCKET_COUNT]>,
}

impl CountBoard {
    /// Allocate zeroed slots for `threads` ids.
    fn new(threads: usize) -> Self {
        Self {
            slots: (0..threads)
                .map(|_| std::array::from_fn(|_| AtomicU32::new(0)))
                .collect(),
        }
    }

    /// Overwrite the counts published by one thread.
    pub(crate) fn publish(&self, id: usize, counts: &BucketCounts) {
        for (slot, &count) in self.slots[id].iter().zip(counts) {
            slot.store(count, Ordering::Relaxed);
        }
    }

    /// Read the counts last published by one thread.
    ///
    /// Only meaningful after a barrier that follows the publication.
    pub(crate) fn read(&self, id: usize) -> BucketCounts {
        std::array::from_fn(|bucket| self.slots[id][bucket].load(Ordering::Relaxed))
    }
}

/// The threads taking part in one pass: ids `0..len`
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct ActiveSet {
    /// Number of participants, at least one
    len: usize,
}

impl ActiveSet {
    /// Participants `0..len`.
    pub(crate) fn new(len: usize) -> Self {
        debug_assert!(len >= 1);
        Self { len }
    }

    /// Number of participating threads
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Does this thread take part?
    pub(crate) fn contains(&self, id: usize) -> bool {
        id < self.len
    }

    /// Ids that follow `id` in this set
    fn later(&self, id: usize) -> std::ops::Range<usize> {
        id + 1..self.len
    }
}

/// Shared coordination state for one run's worker threads
#[derive(Debug)]
pub(crate) struct WorkerGroup {
    /// `barriers[n - 1]` synchronizes a set of `n` participants
    barriers: Vec<Barrier>,
    /// Published per-thread counts for the current pass
    board: CountBoard,
}

impl WorkerGroup {
    /// Coordination state for `threads` workers.
    pub(crate) fn new(threads: usize) -> Self {
        debug_assert!((1..=MAX_THREADS).contains(&threads));
        Self {
            barriers: (1..=threads).map(Barrier::new).collect(),
            board: CountBoard::new(threads),
        }
    }

    /// Total thread count
    pub(crate) fn threads(&self) -> usize {
        self.barriers.len()
    }

    /// Published counts, for inspecting a finished run
    #[cfg(test)]
    pub(crate) fn board(&self) -> &CountBoard {
        &self.board
    }

    /// The view of this group held by one thread.
    pub(crate) fn worker(&self, id: usize) -> Worker<'_> {
        debug_assert!(id < self.threads());
        Worker { id, group: self }
    }
}

/// Aborts the process when dropped during a panic
///
/// Held for the whole life of a worker thread. The other participants can't
/// get past their next barrier without it, so the run can't finish anyway.
#[derive(Debug)]
pub(crate) struct AbortOnUnwind;

impl Drop for AbortOnUnwind {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!("worker thread panicked, aborting");
            std::process::abort();
        }
    }
}

/// One thread's handle on its [`WorkerGroup`]
#[derive(Copy, Clone, Debug)]
pub(crate) struct Worker<'g> {
    /// Stable thread id
    id: usize,
    /// Shared coordination state
    group: &'g WorkerGroup,
}

impl<'g> Worker<'g> {
    /// This thread's id
    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Is this the control thread?
    pub(crate) fn is_control(&self) -> bool {
        self.id == 0
    }

    /// Wait until every member of `set` arrives.
    ///
    /// The caller must be a member of `set`.
    pub(crate) fn barrier(&self, set: &ActiveSet) {
        debug_assert!(set.contains(self.id));
        let _ = self.group.barriers[set.len() - 1].wait();
    }

    /// Agree on write offsets with the rest of `set`.
    ///
    /// Publishes this thread's `counts`, waits for all participants, and then
    /// independently builds the same global [`PrefixSum`] on every thread.
    /// The returned [`Cursor`] starts below the entries of every higher id, so
    /// this thread's slots never overlap another participant's.
    ///
    /// The board must not be published to again until every participant has
    /// returned from this call, which the caller ensures with a later barrier.
    pub(crate) fn prefix_sum(
        &self,
        set: &ActiveSet,
        counts: &BucketCounts,
        file_block_size: Option<usize>,
    ) -> (PrefixSum, Cursor) {
        let board = &self.group.board;
        board.publish(self.id, counts);
        self.barrier(set);

        let mut totals = [0u32; BUCKET_COUNT];
        for id in 0..set.len() {
            for (total, count) in totals.iter_mut().zip(board.read(id)) {
                *total += count;
            }
        }

        let pfx = PrefixSum::new(totals, file_block_size);
        let cursor = pfx.cursor(set.later(self.id).map(|id| board.read(id)));
        (pfx, cursor)
    }
}
