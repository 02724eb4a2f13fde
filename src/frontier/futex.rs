use super::{relock, spin_loop, Done, Frontier, Progress};
use crate::error::Stopped;
use crossbeam_utils::CachePadded;
use std::{
    sync::{atomic::AtomicU32, Mutex},
    time::Duration,
};

// ANCHOR: FutexFrontier
/// Frontier whose waiters sleep on a futex instead of a condition variable
///
/// Updates still go through a mutex, since out-of-order completions must be
/// merged into the stored value one at a time. Waiters never touch that
/// mutex: they watch the lock-free copy of the stored value and sleep on an
/// epoch counter which is bumped after every change.
///
pub struct FutexFrontier {
    /// Copy of `progress.value`, written under the lock with Release ordering
    mirror: CachePadded<atomic::Atomic<u64>>,

    /// Counter which is incremented after every frontier change and every
    /// stop request, used as the futex that waiters sleep on
    epoch: CachePadded<AtomicU32>,

    /// Truth that the stop signal has been raised
    stop_flag: atomic::Atomic<bool>,

    /// Authoritative frontier state
    progress: Mutex<Progress>,
}
//
impl Frontier for FutexFrontier {
    fn new(initial: u64, stall_warning: Option<Duration>) -> Self {
        use atomic::Atomic;
        assert!(Atomic::<u64>::is_lock_free());
        if stall_warning.is_some() {
            log::debug!("futex frontier waits are untimed, stall warnings are disabled");
        }
        Self {
            mirror: CachePadded::new(Atomic::new(initial)),
            epoch: CachePadded::new(AtomicU32::new(0)),
            stop_flag: Atomic::new(false),
            progress: Mutex::new(Progress::new(initial)),
        }
    }

    fn await_at_least(&self, target: u64) -> Result<Done, Stopped> {
        use std::sync::atomic::Ordering;
        loop {
            // Spin for a while in case the frontier is about to move
            let check = || self.peek(target);
            if let Some(result) = spin_loop(check, check) {
                return result;
            }

            // Sample the epoch, then check again. If the frontier changes
            // after this check, the epoch changes too and the wait returns
            // immediately.
            let epoch = self.epoch.load(Ordering::Acquire);
            if let Some(result) = self.peek(target) {
                return result;
            }
            atomic_wait::wait(&self.epoch, epoch);
        }
    }

    fn advance(&self, candidate_square: u64) {
        use std::sync::atomic::Ordering;
        if candidate_square < self.mirror.load(atomic::Ordering::Relaxed) {
            return;
        }

        let advanced = {
            let mut progress = relock(self.progress.lock());
            let advanced = progress.complete(candidate_square);
            if advanced {
                self.mirror.store(progress.value, atomic::Ordering::Release);
            }
            advanced
        };
        if advanced {
            self.epoch.fetch_add(1, Ordering::Release);
            atomic_wait::wake_all(&*self.epoch);
        }
    }

    fn current(&self) -> u64 {
        relock(self.progress.lock()).value
    }

    fn stop(&self) {
        use std::sync::atomic::Ordering;
        self.stop_flag.store(true, atomic::Ordering::Release);
        self.epoch.fetch_add(1, Ordering::Release);
        atomic_wait::wake_all(&*self.epoch);
    }

    fn stopped(&self) -> bool {
        self.stop_flag.load(atomic::Ordering::Relaxed)
    }
}
//
impl FutexFrontier {
    /// Lock-free check for `await_at_least`, None means "go on waiting"
    fn peek(&self, target: u64) -> Option<Result<Done, Stopped>> {
        if self.mirror.load(atomic::Ordering::Acquire) >= target {
            Some(Ok(Done))
        } else if self.stop_flag.load(atomic::Ordering::Acquire) {
            Some(Err(Stopped))
        } else {
            None
        }
    }
}
// ANCHOR_END: FutexFrontier
