//! Parallel sieve of Eratosthenes over a shared bit-packed buffer
//!
//! Sieving threads share one buffer of composite markers, which they update
//! without locking, and one [`Frontier`] which tells them when a marker can
//! be trusted. See [`sieve()`] for the entry point.

pub mod bits;
pub mod error;
pub mod frontier;
pub mod index;
pub mod partition;
pub mod sieve;
pub mod worker;

pub use crate::{
    bits::BitSieve,
    error::{SieveError, Stopped},
    frontier::{CondvarFrontier, Frontier, FutexFrontier},
    index::IndexMapping,
    partition::WorkPartitioner,
    sieve::{sieve, sieve_with, Sieve, SieveConfig, SieveStats},
};
