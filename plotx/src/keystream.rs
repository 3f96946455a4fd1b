//! Keystream sources for F1 generation
//!
//! The generator treats its pseudorandom source as a keyed stream with a
//! block interface: given a block offset it must reproduce exactly the same
//! words on every thread and in every process. Each worker owns its own
//! [`Keystream`] instance, seeks to its assigned block range, and expands it
//! into raw 32-bit words.
//!
//! The default source is ChaCha8 with a zero nonce, using the RustCrypto
//! implementation.

use crate::params::{BLOCK_SIZE, ENTRIES_PER_BLOCK};
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::{ChaCha8, Key, Nonce};

/// Size of a keystream key, in bytes
pub const KEY_SIZE: usize = 32;

/// A deterministic, seekable keystream producing whole blocks of words
pub trait Keystream: Send + Sized {
    /// Set up a keystream for a particular key.
    fn new(key: &[u8; KEY_SIZE]) -> Self;

    /// Fill `words` with keystream blocks starting at `block_offset`.
    ///
    /// The length of `words` must be a whole number of blocks. Words are the
    /// little endian interpretation of the keystream bytes.
    fn produce(&mut self, block_offset: u64, words: &mut [u32]);
}

/// ChaCha8 keystream with a zero nonce
pub struct ChaCha8Keystream {
    /// Stream cipher state, repositioned for every request
    cipher: ChaCha8,
}

impl std::fmt::Debug for ChaCha8Keystream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Don't print the key schedule
        f.debug_struct("ChaCha8Keystream").finish_non_exhaustive()
    }
}

impl Keystream for ChaCha8Keystream {
    fn new(key: &[u8; KEY_SIZE]) -> Self {
        let key = Key::from(*key);
        let nonce = Nonce::default();
        Self {
            cipher: ChaCha8::new(&key, &nonce),
        }
    }

    fn produce(&mut self, block_offset: u64, words: &mut [u32]) {
        debug_assert_eq!(words.len() % ENTRIES_PER_BLOCK, 0);

        // Encrypting zeroes yields the raw keystream
        words.fill(0);
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(words);
        self.cipher.seek(block_offset * BLOCK_SIZE as u64);
        self.cipher.apply_keystream(bytes);

        for word in words.iter_mut() {
            *word = u32::from_le(*word);
        }
    }
}
