#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg))]
#![doc = include_str!("../README.md")]
// @@ begin lint list maintained by maint/add_warning @@
#![allow(renamed_and_removed_lints)] // @@REMOVE_WHEN(ci_arti_stable)
#![allow(unknown_lints)] // @@REMOVE_WHEN(ci_arti_nightly)
#![warn(missing_docs)]
#![warn(noop_method_call)]
#![warn(unreachable_pub)]
#![warn(clippy::all)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::cargo_common_metadata)]
#![deny(clippy::cast_lossless)]
#![deny(clippy::checked_conversions)]
#![warn(clippy::cognitive_complexity)]
#![deny(clippy::debug_assert_with_mut_call)]
#![deny(clippy::exhaustive_enums)]
#![deny(clippy::exhaustive_structs)]
#![deny(clippy::expl_impl_clone_on_copy)]
#![deny(clippy::fallible_impl_from)]
#![deny(clippy::implicit_clone)]
#![deny(clippy::large_stack_arrays)]
#![warn(clippy::manual_ok_or)]
#![deny(clippy::missing_docs_in_private_items)]
#![warn(clippy::needless_borrow)]
#![warn(clippy::needless_pass_by_value)]
#![warn(clippy::option_option)]
#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]
#![warn(clippy::rc_buffer)]
#![deny(clippy::ref_option_ref)]
#![warn(clippy::semicolon_if_nothing_returned)]
#![warn(clippy::trait_duplication_in_bounds)]
#![deny(clippy::unchecked_duration_subtraction)]
#![deny(clippy::unnecessary_wraps)]
#![warn(clippy::unseparated_literal_suffix)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::mod_module_files)]
#![allow(clippy::let_unit_value)] // This can reasonably be done for explicitness
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::significant_drop_in_scrutinee)]
#![allow(clippy::result_large_err)]
#![allow(clippy::needless_raw_string_hashes)] // complained-about code is fine, often best
#![allow(clippy::needless_lifetimes)]
//! <!-- @@ end lint list maintained by maint/add_warning @@ -->

mod chunk;
mod counter;
mod err;
mod job;
mod keystream;
mod mem;
mod params;
mod plan;
mod prefix;
mod queue;
mod remainder;
mod scatter;
mod workers;

use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::ops::Range;
use std::time::Instant;

pub use counter::count_buckets;
pub use err::Error;
pub use keystream::{ChaCha8Keystream, Keystream, KEY_SIZE};
pub use params::{
    plot_key, BucketCounts, Params, BLOCK_SIZE, BUCKET_COUNT, BUCKET_MASK, ENTRIES_PER_BLOCK,
    ENTRY_SIZE, EXTRA_BITS, MAX_K, MIN_K,
};
pub use prefix::{Cursor, PrefixSum};
pub use queue::{
    DiskQueue, Fence, FenceSignal, FileQueue, IoBuffer, Lease, MemoryQueue, Stream, Submission,
    DEFAULT_BUDGET,
};
pub use workers::MAX_THREADS;

/// Default table size exponent
pub const DEFAULT_K: u32 = 32;

/// Default chunk buffer size for disk generation, in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 64 << 20;

/// Generation settings, loadable with serde
///
/// Missing fields take their default values.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct Config {
    /// Table size exponent, the table holds `2^k` entries
    pub k: u32,
    /// Number of worker threads
    pub threads: usize,
    /// Chunk buffer size for disk generation, in bytes
    pub chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            threads: std::thread::available_parallelism()
                .map_or(1, usize::from)
                .min(MAX_THREADS),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Builder for [`F1Generator`] instances with custom settings
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct F1Builder {
    /// Settings applied at build time
    config: Config,
}

impl F1Builder {
    /// Create a new [`F1Builder`] with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a complete [`Config`].
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// The settings as currently configured
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Select the table size exponent.
    pub fn k(&mut self, k: u32) -> &mut Self {
        self.config.k = k;
        self
    }

    /// Select the number of worker threads.
    pub fn threads(&mut self, threads: usize) -> &mut Self {
        self.config.threads = threads;
        self
    }

    /// Select the chunk buffer size for disk generation, in bytes.
    pub fn chunk_size(&mut self, chunk_size: usize) -> &mut Self {
        self.config.chunk_size = chunk_size;
        self
    }

    /// Build a ChaCha8 generator for a plot id.
    ///
    /// The keystream key is derived with [`plot_key`].
    pub fn build_from_plot_id(&self, plot_id: &[u8; 32]) -> Result<F1Generator, Error> {
        self.build_from_key(&plot_key(plot_id))
    }

    /// Build a ChaCha8 generator for a raw keystream key.
    pub fn build_from_key(&self, key: &[u8; KEY_SIZE]) -> Result<F1Generator, Error> {
        self.build_with_keystream(key)
    }

    /// Build a generator using any [`Keystream`] implementation.
    pub fn build_with_keystream<S: Keystream>(
        &self,
        key: &[u8; KEY_SIZE],
    ) -> Result<F1Generator<S>, Error> {
        let params = Params::new(self.config.k)?;
        let threads = self.config.threads;
        if !(1..=MAX_THREADS).contains(&threads) {
            return Err(Error::ThreadCount {
                threads,
                max: MAX_THREADS,
            });
        }
        Ok(F1Generator {
            params,
            key: *key,
            threads,
            chunk_size: self.config.chunk_size,
            _stream: PhantomData,
        })
    }
}

/// F1 table generator for one keystream key
///
/// Generation is deterministic: every run with the same key and `k` produces
/// the same entries in the same buckets, whatever the thread count or chunk
/// size. Only the order of entries within a bucket may differ.
pub struct F1Generator<S: Keystream = ChaCha8Keystream> {
    /// Validated table parameters
    params: Params,
    /// Keystream key
    key: [u8; KEY_SIZE],
    /// Worker thread count
    threads: usize,
    /// Chunk buffer size for disk generation
    chunk_size: usize,
    /// Keystream implementation in use
    _stream: PhantomData<fn() -> S>,
}

impl<S: Keystream> std::fmt::Debug for F1Generator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Leave the key out of logs
        f.debug_struct("F1Generator")
            .field("params", &self.params)
            .field("threads", &self.threads)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl F1Generator {
    /// Make a ChaCha8 generator for a plot id with default options
    /// apart from `k`.
    pub fn new(k: u32, plot_id: &[u8; 32]) -> Result<Self, Error> {
        F1Builder::new().k(k).build_from_plot_id(plot_id)
    }
}

impl<S: Keystream> F1Generator<S> {
    /// Table parameters in effect
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Worker thread count in effect
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Chunk buffer size for disk generation, in bytes
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Generate the whole table into newly allocated memory.
    pub fn generate_mem(&self) -> Result<MemoryBuckets, Error> {
        let entries = self.params.entry_count() as usize;
        let mut values = vec![0u32; entries];
        let mut indices = vec![0u32; entries];
        let counts = self.generate_mem_into(&mut values, &mut indices)?;
        Ok(MemoryBuckets::new(self.params, values, indices, counts))
    }

    /// Generate the whole table into caller-provided buffers.
    ///
    /// Both buffers must hold at least `2^k` entries. Buckets are stored
    /// back to back from the start of each buffer, in bucket order, without
    /// padding. Returns the number of entries in each bucket.
    pub fn generate_mem_into(
        &self,
        values: &mut [u32],
        indices: &mut [u32],
    ) -> Result<BucketCounts, Error> {
        let started = Instant::now();
        let counts =
            mem::generate_into::<S>(&self.params, &self.key, self.threads, values, indices)?;
        tracing::info!(
            k = self.params.k(),
            threads = self.threads,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generated F1 table in memory"
        );
        Ok(counts)
    }

    /// Generate the whole table to a [`DiskQueue`], one chunk at a time.
    ///
    /// Each bucket's two streams receive whole storage blocks while the
    /// chunks are generated, followed by one partial block at the end if the
    /// bucket's size isn't block aligned. Returns once every write has been
    /// carried out by the queue.
    pub fn generate_disk<Q: DiskQueue + ?Sized>(&self, queue: &Q) -> Result<F1Report, Error> {
        let started = Instant::now();
        let totals = chunk::generate_chunked::<S, Q>(
            &self.params,
            &self.key,
            self.threads,
            self.chunk_size,
            queue,
        )?;
        let report = F1Report {
            bucket_counts: totals.bucket_counts,
            chunks: totals.chunks,
            direct_bytes: totals.direct_bytes,
            remainder_bytes: totals.remainder_bytes,
        };
        tracing::info!(
            k = self.params.k(),
            threads = self.threads,
            chunks = report.chunks,
            entries = report.total_entries(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generated F1 table to disk queue"
        );
        Ok(report)
    }
}

/// Summary of one disk generation run
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct F1Report {
    /// Entries written to each bucket
    pub bucket_counts: [u64; BUCKET_COUNT],
    /// Number of chunks generated
    pub chunks: u64,
    /// Bytes per stream written directly from chunk buffers
    pub direct_bytes: u64,
    /// Bytes per stream written through remainder staging
    pub remainder_bytes: u64,
}

impl F1Report {
    /// Entries written over all buckets
    pub fn total_entries(&self) -> u64 {
        self.bucket_counts.iter().sum()
    }
}

/// A whole F1 table in memory, grouped by bucket
#[derive(Clone, Debug)]
pub struct MemoryBuckets {
    /// Parameters the table was generated with
    params: Params,
    /// Encoded values of every bucket, back to back
    values: Vec<u32>,
    /// Indices of every bucket, back to back
    indices: Vec<u32>,
    /// Entries per bucket
    counts: BucketCounts,
    /// Start of each bucket, plus the end of the last
    starts: [usize; BUCKET_COUNT + 1],
}

impl MemoryBuckets {
    /// Wrap generated buffers.
    fn new(params: Params, values: Vec<u32>, indices: Vec<u32>, counts: BucketCounts) -> Self {
        let mut starts = [0usize; BUCKET_COUNT + 1];
        for (bucket, &count) in counts.iter().enumerate() {
            starts[bucket + 1] = starts[bucket] + count as usize;
        }
        Self {
            params,
            values,
            indices,
            counts,
            starts,
        }
    }

    /// Parameters the table was generated with
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Entries in each bucket
    pub fn counts(&self) -> &BucketCounts {
        &self.counts
    }

    /// Entry range of one bucket within the flat buffers
    pub fn range(&self, bucket: usize) -> Range<usize> {
        self.starts[bucket]..self.starts[bucket + 1]
    }

    /// Encoded values of one bucket
    pub fn values(&self, bucket: usize) -> &[u32] {
        &self.values[self.range(bucket)]
    }

    /// Indices of one bucket
    pub fn indices(&self, bucket: usize) -> &[u32] {
        &self.indices[self.range(bucket)]
    }

    /// Full `(value, index)` pairs of one bucket, with values decoded.
    pub fn entries(&self, bucket: usize) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.values(bucket)
            .iter()
            .zip(self.indices(bucket))
            .map(move |(&stored, &index)| (self.params.decode_value(bucket, stored), index))
    }

    /// The flat value and index buffers
    pub fn into_inner(self) -> (Vec<u32>, Vec<u32>) {
        (self.values, self.indices)
    }
}
