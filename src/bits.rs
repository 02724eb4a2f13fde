use crate::error::SieveError;
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of sieve bits stored per storage word
pub const WORD_BITS: usize = u64::BITS as usize;

/// Number of storage words needed to hold `bits` bits
pub const fn words_for_bits(bits: usize) -> usize {
    bits.div_ceil(WORD_BITS)
}

/// Packed composite markers shared by all sieving threads
///
/// Bit `i` is set once the candidate at index `i` is known to be composite.
/// Bits are only ever set, never cleared, while the sieve is shared.
///
/// Marking is an atomic `fetch_or`, so two threads setting different bits of
/// the same word cannot lose each other's update, and two threads setting the
/// same bit end up with the same state as a single call.
///
/// All accesses are `Relaxed`: the ordering that makes a `test` trustworthy
/// is provided by the frontier lock, not by the bits themselves.
///
pub struct BitSieve {
    words: Box<[AtomicU64]>,
    len: usize,
}
//
impl BitSieve {
    /// Allocate a sieve of `len` clear bits
    ///
    /// Allocation failure is reported instead of aborting the process.
    ///
    pub fn new(len: usize) -> Result<Self, SieveError> {
        let num_words = words_for_bits(len);
        let mut words = Vec::new();
        words
            .try_reserve_exact(num_words)
            .map_err(|_| SieveError::ResourceExhaustion { words: num_words })?;
        words.extend((0..num_words).map(|_| AtomicU64::new(0)));
        Ok(Self {
            words: words.into_boxed_slice(),
            len,
        })
    }

    /// Number of addressable bits
    pub fn len(&self) -> usize {
        self.len
    }

    /// Truth that no bit is addressable
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Truth that the candidate at index `i` is known to be composite
    #[inline(always)]
    pub fn test(&self, i: usize) -> bool {
        debug_assert!(i < self.len, "sieve index {i} out of bounds");
        let mask = 1u64 << (i % WORD_BITS);
        self.words[i / WORD_BITS].load(Ordering::Relaxed) & mask != 0
    }

    /// Record that the candidate at index `i` is composite
    #[inline(always)]
    pub fn mark_composite(&self, i: usize) {
        debug_assert!(i < self.len, "sieve index {i} out of bounds");
        let mask = 1u64 << (i % WORD_BITS);
        self.words[i / WORD_BITS].fetch_or(mask, Ordering::Relaxed);
    }

    /// Number of bits currently set
    ///
    /// Padding bits past `len` are never set, so no masking is needed.
    ///
    pub fn count_composites(&self) -> usize {
        self.words
            .iter()
            .map(|word| word.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    /// Freeze the sieve into plain words once no other thread can access it
    pub fn into_words(self) -> Box<[u64]> {
        self.words
            .into_vec()
            .into_iter()
            .map(AtomicU64::into_inner)
            .collect()
    }
}
//
impl std::fmt::Debug for BitSieve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitSieve")
            .field("len", &self.len)
            .field("words", &self.words.len())
            .finish()
    }
}
