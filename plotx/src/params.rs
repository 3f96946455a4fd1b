//! Table parameters, bucket selection, and entry encoding
//!
//! Every generated entry starts life as one raw 32-bit keystream word. The
//! word is byte-swapped (the keystream is read as big endian) and masked to
//! `K` bits to form the value `y`. The top [`EXTRA_BITS`] bits of `y` select
//! the bucket. What gets stored is `y` with those bucket bits shifted out,
//! carrying the top [`EXTRA_BITS`] bits of the entry's index `x` in their place.

use crate::err::Error;

/// Number of output buckets
pub const BUCKET_COUNT: usize = 64;

/// Bits of `y` used to select a bucket, and bits of `x` embedded in each stored value
pub const EXTRA_BITS: u32 = 6;

/// Mask for a bucket id
pub const BUCKET_MASK: u32 = (1 << EXTRA_BITS) - 1;

/// Size of one keystream block, in bytes
pub const BLOCK_SIZE: usize = 64;

/// Size of one stored record, in bytes
pub const ENTRY_SIZE: usize = std::mem::size_of::<u32>();

/// Entries produced by one keystream block
pub const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / ENTRY_SIZE;

/// Smallest supported table size exponent
pub const MIN_K: u32 = 8;

/// Largest supported table size exponent
pub const MAX_K: u32 = 32;

/// Per-bucket entry counts
pub type BucketCounts = [u32; BUCKET_COUNT];

/// Validated table parameters
///
/// Holds the table size exponent `K` and the derived masks. All per-entry
/// operations are `#[inline(always)]` since they sit in the innermost loops
/// of counting and scattering.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Params {
    /// Table size exponent
    k: u32,
    /// Mask of the low `k` bits
    value_mask: u32,
}

impl Params {
    /// Check `k` and build a new parameter set.
    pub fn new(k: u32) -> Result<Self, Error> {
        if !(MIN_K..=MAX_K).contains(&k) {
            return Err(Error::InvalidK {
                k,
                min: MIN_K,
                max: MAX_K,
            });
        }
        Ok(Self {
            k,
            value_mask: (u64::MAX >> (64 - k)) as u32,
        })
    }

    /// Table size exponent
    pub fn k(&self) -> u32 {
        self.k
    }

    /// Number of entries in the whole table, `2^k`
    pub fn entry_count(&self) -> u64 {
        1 << self.k
    }

    /// Number of keystream blocks in the whole table
    pub fn block_count(&self) -> u64 {
        self.entry_count() / ENTRIES_PER_BLOCK as u64
    }

    /// Shift that moves the top [`EXTRA_BITS`] of a `k`-bit value to the bottom.
    #[inline(always)]
    fn bucket_shift(&self) -> u32 {
        self.k - EXTRA_BITS
    }

    /// The `k`-bit value `y` for one raw keystream word.
    #[inline(always)]
    pub fn value_of(&self, word: u32) -> u32 {
        word.swap_bytes() & self.value_mask
    }

    /// The bucket holding a `k`-bit value.
    #[inline(always)]
    pub fn bucket_of(&self, value: u32) -> usize {
        ((value >> self.bucket_shift()) & BUCKET_MASK) as usize
    }

    /// The bucket for one raw keystream word, without materializing the value.
    #[inline(always)]
    pub fn bucket_of_word(&self, word: u32) -> usize {
        ((word.swap_bytes() >> self.bucket_shift()) & BUCKET_MASK) as usize
    }

    /// Encode a value and its index into the stored form.
    ///
    /// The bucket bits leave through the top and the high [`EXTRA_BITS`] of
    /// `index` enter at the bottom. Later plotting stages depend on this
    /// exact layout.
    #[inline(always)]
    pub fn encode(&self, value: u32, index: u32) -> u32 {
        ((value << EXTRA_BITS) | (index >> self.bucket_shift())) & self.value_mask
    }

    /// Recover the full `k`-bit value from a stored value and its bucket.
    pub fn decode_value(&self, bucket: usize, stored: u32) -> u32 {
        ((bucket as u32) << self.bucket_shift()) | (stored >> EXTRA_BITS)
    }

    /// The index bits carried by a stored value.
    ///
    /// These equal `index >> (k - EXTRA_BITS)` for the entry's own index.
    pub fn index_bits(&self, stored: u32) -> u32 {
        stored & BUCKET_MASK
    }
}

/// Derive the keystream key from a plot id.
///
/// The first key byte is fixed at 1 and the remaining 31 bytes come from the
/// start of the plot id.
pub fn plot_key(plot_id: &[u8; 32]) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[0] = 1;
    key[1..].copy_from_slice(&plot_id[..31]);
    key
}
