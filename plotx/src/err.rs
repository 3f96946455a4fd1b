//! Error types for the `plotx` crate

use std::sync::Arc;

/// Errors applicable to configuring and running F1 generation
///
/// Every variant except [`Error::Io`] describes a configuration that the
/// generator refuses before any worker thread starts. Once a run has begun,
/// generation is a pure function of the key and cannot fail; storage failures
/// belong to the [`crate::DiskQueue`] implementation.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The table size exponent is outside the supported range.
    #[error("k={k} is not supported, expected {min} <= k <= {max}")]
    InvalidK {
        /// Requested table size exponent
        k: u32,
        /// Smallest supported exponent
        min: u32,
        /// Largest supported exponent
        max: u32,
    },

    /// The worker thread count is zero or too large.
    #[error("thread count {threads} is not supported, expected 1 <= threads <= {max}")]
    ThreadCount {
        /// Requested thread count
        threads: usize,
        /// Largest supported thread count
        max: usize,
    },

    /// The storage block size can't hold a whole number of entries.
    #[error("block size {block_size} must be a nonzero multiple of {entry_size} bytes")]
    BlockSize {
        /// Block size reported by the disk queue
        block_size: usize,
        /// Size of one stored record
        entry_size: usize,
    },

    /// A chunk buffer of this size can't give every thread at least one block.
    #[error("chunk size {chunk_size} is too small for {threads} threads, need at least {required} bytes")]
    ChunkTooSmall {
        /// Requested chunk buffer size in bytes
        chunk_size: usize,
        /// Configured worker thread count
        threads: usize,
        /// Smallest chunk buffer size that would work, in bytes
        required: usize,
    },

    /// Caller-supplied bucket buffers can't hold the whole table.
    #[error("bucket buffers hold {provided} entries, need {required}")]
    BufferTooSmall {
        /// Entries that fit in the smaller of the two buffers
        provided: usize,
        /// Entries in the whole table
        required: usize,
    },

    /// A configuration file could not be understood.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The file-backed disk queue failed, with a [`std::io::Error`].
    #[error("disk queue I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
