//! Disk write service used by the chunked driver
//!
//! The engine never touches storage directly. Instead, its control thread
//! talks to a [`DiskQueue`]: it borrows chunk buffers against a memory
//! budget, queues writes of buffer slices to per-bucket streams, and commits
//! batches of queued commands to the storage backend. A [`Fence`] lets the
//! engine wait until everything queued before it has been carried out.
//!
//! Commands for one stream and bucket are carried out in the order they were
//! submitted, so each bucket's stream is the concatenation of its writes.

use bytes::Bytes;
use crossbeam_channel::TryRecvError;
use strum::{EnumIter, IntoStaticStr};

mod file;
mod memory;

pub use file::{FileQueue, DEFAULT_BUDGET};
pub use memory::{MemoryQueue, Submission};

/// One of the two record streams written for each bucket
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, EnumIter, IntoStaticStr)]
#[allow(clippy::exhaustive_enums)] // Every entry has exactly these two halves
pub enum Stream {
    /// Encoded values
    #[strum(serialize = "y0")]
    Value,
    /// Entry indices
    #[strum(serialize = "x")]
    Index,
}

impl Stream {
    /// Short name used for stream files
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Position of this stream in per-stream tables
    pub(crate) fn ordinal(self) -> usize {
        match self {
            Stream::Value => 0,
            Stream::Index => 1,
        }
    }
}

/// Claim on part of a queue's buffer budget
///
/// Returned to the queue with [`DiskQueue::release_buffer`] once the buffer's
/// contents have been handed off for writing.
#[derive(Debug)]
#[must_use = "a lease must be released back to its queue"]
pub struct Lease {
    /// Budget held, in bytes
    bytes: usize,
}

impl Lease {
    /// Record a claim of `bytes`. Only queue implementations create leases.
    pub fn new(bytes: usize) -> Self {
        Self { bytes }
    }

    /// Budget held, in bytes
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

/// Zero-initialized chunk buffer borrowed from a [`DiskQueue`]
#[derive(Debug)]
pub struct IoBuffer {
    /// Buffer contents
    words: Vec<u32>,
    /// Budget backing this buffer
    lease: Lease,
}

impl IoBuffer {
    /// Allocate a buffer of `words` entries against a lease.
    pub fn new(words: usize, lease: Lease) -> Self {
        Self {
            words: vec![0u32; words],
            lease,
        }
    }

    /// Mutable access to the contents
    pub fn words_mut(&mut self) -> &mut [u32] {
        &mut self.words
    }

    /// Convert the contents to shared bytes without copying.
    ///
    /// Slices of the returned [`Bytes`] can be queued as writes and stay valid
    /// for as long as the queue needs them. The lease goes back to the caller.
    pub fn freeze(self) -> (Bytes, Lease) {
        (Bytes::from_owner(WordBytes(self.words)), self.lease)
    }
}

/// Byte view of a word vector, for [`Bytes::from_owner`]
struct WordBytes(Vec<u32>);

impl AsRef<[u8]> for WordBytes {
    fn as_ref(&self) -> &[u8] {
        bytemuck::cast_slice(&self.0)
    }
}

/// Completion handle for a point in a queue's command stream
///
/// Completes once every command queued before it has been carried out, or
/// once its queue shuts down.
#[derive(Debug)]
#[must_use]
pub struct Fence {
    /// Closed or signalled when the fence is reached
    done: crossbeam_channel::Receiver<()>,
}

/// Queue-side half of a [`Fence`]
#[derive(Debug)]
pub struct FenceSignal {
    /// Wakes the waiting side
    done: crossbeam_channel::Sender<()>,
}

impl Fence {
    /// A connected pair of signal and fence.
    pub fn channel() -> (FenceSignal, Fence) {
        let (done, wait) = crossbeam_channel::bounded(1);
        (FenceSignal { done }, Fence { done: wait })
    }

    /// A fence that has already completed.
    pub fn completed() -> Fence {
        let (signal, fence) = Self::channel();
        signal.signal();
        fence
    }

    /// Has the fence completed?
    pub fn is_done(&self) -> bool {
        // The signal side drops its sender right after sending, so a taken
        // message leaves the channel disconnected
        match self.done.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => true,
            Err(TryRecvError::Empty) => false,
        }
    }

    /// Block until the fence completes.
    pub fn wait(self) {
        // A dropped signal means the queue has stopped, so nothing is pending
        let _ = self.done.recv();
    }
}

impl FenceSignal {
    /// Complete the fence.
    pub fn signal(self) {
        // The waiting side may have lost interest
        let _ = self.done.send(());
    }
}

/// Asynchronous storage backend for chunked generation
///
/// All methods take `&self` and may be called from any thread, although the
/// engine only ever calls them from its control thread. Every method except
/// [`DiskQueue::acquire_buffer`] and [`Fence::wait`] must return promptly;
/// the actual storage work happens behind [`DiskQueue::commit`].
pub trait DiskQueue: Send + Sync {
    /// Storage block size in bytes, a nonzero multiple of the entry size
    fn block_size(&self) -> usize;

    /// Borrow a zeroed buffer of `words` entries.
    ///
    /// Blocks while the queue's buffer budget is exhausted.
    fn acquire_buffer(&self, words: usize) -> IoBuffer;

    /// Queue the return of a buffer's budget.
    ///
    /// The budget becomes available again once every earlier queued write has
    /// been carried out.
    fn release_buffer(&self, lease: Lease);

    /// Queue a write, appending `data` to one bucket's stream.
    fn submit_write(&self, stream: Stream, bucket: usize, data: Bytes);

    /// Hand every queued command to the backend.
    fn commit(&self);

    /// Queue a fence behind every command queued so far.
    ///
    /// The fence only completes after a later [`DiskQueue::commit`].
    fn add_fence(&self) -> Fence;
}
