use super::{relock, spin_loop, Done, Frontier, Progress};
use crate::error::Stopped;
use crossbeam_utils::CachePadded;
use std::{
    sync::{Condvar, Mutex},
    time::Duration,
};

// ANCHOR: CondvarFrontier
/// Frontier built on a mutex and a broadcast condition variable
pub struct CondvarFrontier {
    /// Copy of `state.progress.value` for lock-free fast path checks
    ///
    /// Only written under the lock, with Release ordering, after the change
    /// has been made to the authoritative state. Readers which observe a
    /// value with Acquire ordering also observe the sieve bits marked by all
    /// candidates accounted for in that value.
    ///
    mirror: CachePadded<atomic::Atomic<u64>>,

    /// Copy of `state.stopped` for lock-free fast path checks
    stop_flag: atomic::Atomic<bool>,

    /// Authoritative frontier state
    state: Mutex<State>,

    /// Signaled whenever the stored value increases or the stop signal is
    /// raised
    changed: Condvar,

    /// Waiters that see no progress for this long emit a warning
    stall_warning: Option<Duration>,
}
//
/// Lock-protected state of a `CondvarFrontier`
#[derive(Debug)]
struct State {
    progress: Progress,
    stopped: bool,
}
//
impl Frontier for CondvarFrontier {
    fn new(initial: u64, stall_warning: Option<Duration>) -> Self {
        use atomic::Atomic;
        assert!(Atomic::<u64>::is_lock_free());
        Self {
            mirror: CachePadded::new(Atomic::new(initial)),
            stop_flag: Atomic::new(false),
            state: Mutex::new(State {
                progress: Progress::new(initial),
                stopped: false,
            }),
            changed: Condvar::new(),
            stall_warning,
        }
    }

    fn await_at_least(&self, target: u64) -> Result<Done, Stopped> {
        // Fast path: racy checks, with a short spin before going to sleep
        let check = || self.peek(target);
        if let Some(result) = spin_loop(check, check) {
            return result;
        }

        // Slow path: authoritative check and sleep under the lock
        let mut state = relock(self.state.lock());
        let mut last_seen = state.progress.value;
        loop {
            if state.progress.value >= target {
                return Ok(Done);
            }
            if state.stopped {
                return Err(Stopped);
            }
            let Some(period) = self.stall_warning else {
                state = relock(self.changed.wait(state));
                continue;
            };
            let (guard, timeout) = relock(self.changed.wait_timeout(state, period));
            state = guard;
            if timeout.timed_out() && state.progress.value == last_seen && !state.stopped {
                log::warn!(
                    "{:?} saw no frontier progress for {period:?} while awaiting {target} \
                     (frontier at {last_seen}, {} candidates parked ahead of it)",
                    std::thread::current().id(),
                    state.progress.early.len(),
                );
            }
            last_seen = state.progress.value;
        }
    }

    fn advance(&self, candidate_square: u64) {
        use atomic::Ordering;

        // The stored value never goes down, so a candidate below it is
        // already accounted for
        if candidate_square < self.mirror.load(Ordering::Relaxed) {
            return;
        }

        let mut state = relock(self.state.lock());
        if state.progress.complete(candidate_square) {
            self.mirror.store(state.progress.value, Ordering::Release);
            self.changed.notify_all();
        }
    }

    fn current(&self) -> u64 {
        relock(self.state.lock()).progress.value
    }

    fn stop(&self) {
        let mut state = relock(self.state.lock());
        state.stopped = true;
        self.stop_flag.store(true, atomic::Ordering::Relaxed);
        self.changed.notify_all();
    }

    fn stopped(&self) -> bool {
        self.stop_flag.load(atomic::Ordering::Relaxed)
    }
}
//
impl CondvarFrontier {
    /// Lock-free check for `await_at_least`, None means "go on waiting"
    fn peek(&self, target: u64) -> Option<Result<Done, Stopped>> {
        if self.mirror.load(atomic::Ordering::Acquire) >= target {
            Some(Ok(Done))
        } else if self.stopped() {
            Some(Err(Stopped))
        } else {
            None
        }
    }
}
// ANCHOR_END: CondvarFrontier

#[cfg(test)]
mod tests {
    use super::CondvarFrontier;
    use crate::frontier::{Done, Frontier};
    use std::time::Duration;

    #[test]
    fn stall_warning_keeps_waiting() {
        let frontier = CondvarFrontier::new(9, Some(Duration::from_millis(1)));
        std::thread::scope(|s| {
            let waiter = s.spawn(|| frontier.await_at_least(26));
            std::thread::sleep(Duration::from_millis(20));
            assert!(!waiter.is_finished());
            frontier.advance(9);
            frontier.advance(25);
            assert_eq!(waiter.join().unwrap(), Ok(Done));
        });
        assert_eq!(frontier.current(), 49);
    }
}
