//! Shared barrier telling sieving threads which sieve bits can be trusted
//!
//! The frontier stores the square of the lowest source candidate that has not
//! been fully processed yet. Every candidate whose square lies below the
//! stored value has finished its crossing-off pass (or was found composite),
//! so any sieve bit for a number below the stored value is final.
//!
//! Threads complete candidates out of order, so early completions are parked
//! under the lock until every smaller candidate has caught up. This keeps the
//! stored value meaningful for all threads at once, not only for the thread
//! that published it.

pub mod condvar;
pub mod futex;

pub use self::{condvar::CondvarFrontier, futex::FutexFrontier};
use crate::error::Stopped;
use std::{cmp::Reverse, collections::BinaryHeap, time::Duration};

// ANCHOR: spin_loop
/// Spin until a condition is validated
///
/// Start with busy waiting in userspace with a cheap condition check. For longer
/// waits, burn less CPU cycles by yielding to the OS and allow the waiter to
/// switch to a more expensive check along the way.
///
/// Gives up after a while and returns None to allow for proper OS-controlled
/// blocking to take place.
///
fn spin_loop<Ready>(
    mut cheap_check: impl FnMut() -> Option<Ready>,
    mut expensive_check: impl FnMut() -> Option<Ready>,
) -> Option<Ready> {
    use std::time::Instant;
    const SPIN_ITERS: usize = 300;
    const MAX_BACKOFF: usize = 1 << 2;
    const OS_SPIN_DELAY: Duration = Duration::from_nanos(1);
    const OS_SPIN_BOUND: Duration = Duration::from_micros(20);

    // Start with a userspace busy loop with a bit of exponential backoff
    let mut backoff = 1;
    for _ in 0..SPIN_ITERS {
        if let Some(ready) = cheap_check() {
            return Some(ready);
        }
        for _ in 0..backoff {
            std::hint::spin_loop();
        }
        backoff = (2 * backoff).min(MAX_BACKOFF);
    }

    // Switch to yielding to the OS once it's clear it's gonna take a while.
    // yield_now() would be semantically more correct but is broken on Linux,
    // the CFS scheduler just reschedules us.
    let start = Instant::now();
    while start.elapsed() < OS_SPIN_BOUND {
        if let Some(ready) = expensive_check() {
            return Some(ready);
        }
        std::thread::sleep(OS_SPIN_DELAY);
    }
    expensive_check()
}
// ANCHOR_END: spin_loop

// ANCHOR: Frontier
/// Monotonic record of sieving progress, shared by all sieving threads
pub trait Frontier: Sync {
    /// Set up a frontier where no candidate has been processed yet
    ///
    /// `initial` is the square of the first candidate of the sieve.
    /// `stall_warning` asks for a diagnostic when a waiter sees no progress for
    /// that long. Implementations which cannot time their waits ignore it.
    ///
    fn new(initial: u64, stall_warning: Option<Duration>) -> Self;

    /// Block until the stored value is at least `target`, or the stop signal
    /// is raised
    ///
    /// A spurious or unrelated wakeup is never taken as permission to
    /// proceed, the stored value is re-checked after every wakeup.
    ///
    fn await_at_least(&self, target: u64) -> Result<Done, Stopped>;

    /// Publish that the candidate whose square is `candidate_square` has been
    /// fully processed, wake up waiters if this moves the frontier forward
    fn advance(&self, candidate_square: u64);

    /// Stored value, as read under the lock
    fn current(&self) -> u64;

    /// Request all waiting threads to give up
    fn stop(&self);

    /// Check if the stop signal has been raised
    fn stopped(&self) -> bool;
}

/// Signal emitted by `await_at_least` to tell that the target was reached
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Done;
// ANCHOR_END: Frontier

/// Lock-protected part of the frontier state
#[derive(Debug)]
struct Progress {
    /// Square of the lowest candidate which has not been processed yet
    value: u64,

    /// Squares of candidates processed ahead of `value`
    early: BinaryHeap<Reverse<u64>>,
}
//
impl Progress {
    /// Start with nothing processed
    fn new(initial: u64) -> Self {
        Self {
            value: initial,
            early: BinaryHeap::new(),
        }
    }

    /// Account for a processed candidate, tell if `value` moved forward
    fn complete(&mut self, candidate_square: u64) -> bool {
        if candidate_square < self.value {
            return false;
        }
        self.early.push(Reverse(candidate_square));
        let initial = self.value;
        while let Some(&Reverse(square)) = self.early.peek() {
            if square > self.value {
                break;
            }
            self.early.pop();
            if square == self.value {
                self.value = next_candidate_square(square);
            }
        }
        self.value > initial
    }
}

/// Square of the odd number following the square root of `square`
fn next_candidate_square(square: u64) -> u64 {
    let root = square.isqrt();
    debug_assert_eq!(root * root, square, "{square} is not a perfect square");
    (root + 2).saturating_mul(root + 2)
}

/// Recover the guard of a lock poisoned by a panicking thread
///
/// The frontier state is updated atomically from the point of view of other
/// lock holders, so a panic cannot leave it inconsistent. Carrying on is
/// needed for the stop signal to reach the surviving threads.
///
fn relock<T>(result: std::sync::LockResult<T>) -> T {
    result.unwrap_or_else(std::sync::PoisonError::into_inner)
}
