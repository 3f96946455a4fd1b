//! Disk queue backed by one file per stream and bucket
//!
//! Commands accumulate in a pending batch until [`DiskQueue::commit`], which
//! sends the batch to a single writer thread over a channel. The writer
//! carries out commands strictly in order, so writes are appended to each
//! file in submission order, and fences and budget releases take effect only
//! after every earlier write.
//!
//! A failed write doesn't stop the writer. The first error is kept and later
//! writes are skipped, but fences and releases are still honored so the
//! engine never deadlocks on a broken disk. [`FileQueue::finish`] reports the
//! error.

use super::{DiskQueue, Fence, FenceSignal, IoBuffer, Lease, Stream};
use crate::err::Error;
use crate::params::{BUCKET_COUNT, ENTRY_SIZE};
use bytes::Bytes;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use strum::IntoEnumIterator;

/// Default buffer budget, enough for a few chunks of the default size
pub const DEFAULT_BUDGET: usize = 1 << 30;

/// One queued operation for the writer thread
#[derive(Debug)]
enum Command {
    /// Append bytes to a stream file
    Write(Stream, usize, Bytes),
    /// Return budget
    Release(Lease),
    /// Wake a waiter
    Fence(FenceSignal),
}

/// Byte budget shared by the queue and its writer thread
#[derive(Debug)]
struct Budget {
    /// Total budget in bytes
    total: usize,
    /// Bytes not currently leased
    available: Mutex<usize>,
    /// Signalled whenever budget is returned
    returned: Condvar,
}

impl Budget {
    /// Lock the available byte count.
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.available.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for and claim budget for `bytes`.
    ///
    /// A request larger than the whole budget waits for all of it.
    fn acquire(&self, bytes: usize) -> Lease {
        let claim = bytes.min(self.total);
        let mut available = self
            .returned
            .wait_while(self.lock(), |available| *available < claim)
            .unwrap_or_else(PoisonError::into_inner);
        *available -= claim;
        Lease::new(claim)
    }

    /// Return a lease's budget and wake any waiters.
    fn release(&self, lease: Lease) {
        *self.lock() += lease.bytes();
        self.returned.notify_all();
    }
}

/// [`DiskQueue`] writing each stream of each bucket to its own file
///
/// Files are named `<stream>_<bucket>.tmp` inside the output directory, for
/// example `y0_12.tmp` and `x_12.tmp`. They are created, or truncated, when
/// the queue is created.
#[derive(Debug)]
pub struct FileQueue {
    /// Storage block size in bytes
    block_size: usize,
    /// Directory holding the stream files
    dir: PathBuf,
    /// Buffer budget shared with the writer
    budget: Arc<Budget>,
    /// Commands queued since the last commit
    pending: Mutex<Vec<Command>>,
    /// Channel to the writer thread, dropped on shutdown
    sender: Option<crossbeam_channel::Sender<Vec<Command>>>,
    /// Writer thread, joined on shutdown
    writer: Option<JoinHandle<Result<(), Error>>>,
}

impl FileQueue {
    /// Create the stream files in `dir` and start the writer thread.
    ///
    /// `block_size` must be a nonzero multiple of the entry size.
    /// `budget` bounds the bytes of chunk buffer handed out at once.
    pub fn create(dir: impl AsRef<Path>, block_size: usize, budget: usize) -> Result<Self, Error> {
        if block_size == 0 || block_size % ENTRY_SIZE != 0 {
            return Err(Error::BlockSize {
                block_size,
                entry_size: ENTRY_SIZE,
            });
        }

        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let mut files = Vec::with_capacity(2 * BUCKET_COUNT);
        for stream in Stream::iter() {
            for bucket in 0..BUCKET_COUNT {
                files.push(File::create(stream_path(&dir, stream, bucket))?);
            }
        }

        let budget = Arc::new(Budget {
            total: budget.max(1),
            available: Mutex::new(budget.max(1)),
            returned: Condvar::new(),
        });
        let (sender, receiver) = crossbeam_channel::unbounded();
        let writer = {
            let budget = budget.clone();
            std::thread::Builder::new()
                .name("plotx-writer".into())
                .spawn(move || write_loop(files, &receiver, &budget))?
        };

        tracing::debug!(dir = %dir.display(), block_size, "file queue started");
        Ok(Self {
            block_size,
            dir,
            budget,
            pending: Mutex::new(Vec::new()),
            sender: Some(sender),
            writer: Some(writer),
        })
    }

    /// Directory holding the stream files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of one stream file
    pub fn path(&self, stream: Stream, bucket: usize) -> PathBuf {
        stream_path(&self.dir, stream, bucket)
    }

    /// Commit anything pending, wait for the writer, and report its first error.
    pub fn finish(mut self) -> Result<(), Error> {
        self.commit();
        self.shutdown()
    }

    /// Close the channel and join the writer thread.
    fn shutdown(&mut self) -> Result<(), Error> {
        drop(self.sender.take());
        match self.writer.take().map(JoinHandle::join) {
            None => Ok(()),
            Some(Ok(result)) => result,
            Some(Err(panic)) => std::panic::resume_unwind(panic),
        }
    }

    /// Add a command to the pending batch.
    fn push(&self, command: Command) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
    }
}

impl Drop for FileQueue {
    fn drop(&mut self) {
        // Errors can only be observed through finish()
        if !std::thread::panicking() {
            let _ = self.shutdown();
        }
    }
}

impl DiskQueue for FileQueue {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn acquire_buffer(&self, words: usize) -> IoBuffer {
        let lease = self.budget.acquire(words * ENTRY_SIZE);
        IoBuffer::new(words, lease)
    }

    fn release_buffer(&self, lease: Lease) {
        self.push(Command::Release(lease));
    }

    fn submit_write(&self, stream: Stream, bucket: usize, data: Bytes) {
        debug_assert!(bucket < BUCKET_COUNT);
        self.push(Command::Write(stream, bucket, data));
    }

    fn commit(&self) {
        let batch = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *pending)
        };
        if batch.is_empty() {
            return;
        }
        if let Some(sender) = &self.sender {
            // The writer only exits after the sender is dropped
            let _ = sender.send(batch);
        }
    }

    fn add_fence(&self) -> Fence {
        let (signal, fence) = Fence::channel();
        self.push(Command::Fence(signal));
        fence
    }
}

/// Location of one stream file
fn stream_path(dir: &Path, stream: Stream, bucket: usize) -> PathBuf {
    dir.join(format!("{}_{}.tmp", stream.name(), bucket))
}

/// Writer thread body: run batches in order until the channel closes.
fn write_loop(
    mut files: Vec<File>,
    receiver: &crossbeam_channel::Receiver<Vec<Command>>,
    budget: &Budget,
) -> Result<(), Error> {
    let mut first_error: Option<std::io::Error> = None;
    for batch in receiver {
        for command in batch {
            match command {
                Command::Write(stream, bucket, data) => {
                    if first_error.is_some() {
                        continue;
                    }
                    let file = &mut files[stream.ordinal() * BUCKET_COUNT + bucket];
                    if let Err(err) = file.write_all(&data) {
                        tracing::error!(stream = stream.name(), bucket, %err, "stream write failed");
                        first_error = Some(err);
                    }
                }
                Command::Release(lease) => budget.release(lease),
                Command::Fence(signal) => signal.signal(),
            }
        }
    }

    for file in &mut files {
        if first_error.is_none() {
            if let Err(err) = file.flush() {
                first_error = Some(err);
            }
        }
    }
    first_error.map_or(Ok(()), |err| Err(err.into()))
}
