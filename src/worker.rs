use crate::{bits::BitSieve, frontier::Frontier, index::IndexMapping, partition::ThreadShare};

/// Everything one sieving thread needs to know about its work
///
/// Built by the orchestrator before any thread is spawned and never modified
/// afterwards.
///
#[derive(Debug)]
pub struct WorkItem<'sieve, F> {
    /// Which source candidates this thread processes
    pub share: ThreadShare,

    /// Total number of sieving threads
    pub num_threads: usize,

    /// Translation between sieve indices and candidates
    pub mapping: IndexMapping,

    /// Exclusive upper bound of the sieve
    pub max: u64,

    /// Shared composite markers
    pub sieve: &'sieve BitSieve,

    /// Shared sieving progress
    pub frontier: &'sieve F,
}

/// What one sieving thread did
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct WorkerStats {
    /// Source candidates whose sieve bit was examined
    pub checked: usize,

    /// Candidates found prime, which ran a crossing-off pass
    pub passes: usize,

    /// Bits marked by crossing-off passes, including already-set ones
    pub marks: usize,

    /// Truth that the thread gave up because the stop signal was raised
    pub stopped: bool,
}

impl<F: Frontier> WorkItem<'_, F> {
    /// Run this thread's share of the sieve
    ///
    /// If this panics, the frontier's stop signal is raised before unwinding
    /// so that other threads do not wait forever for this thread's progress.
    ///
    pub fn run(&self) -> WorkerStats {
        use std::panic::AssertUnwindSafe;
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.process())) {
            Ok(stats) => stats,
            Err(payload) => {
                self.debug_log("panicking!");
                self.frontier.stop();
                std::panic::resume_unwind(payload);
            }
        }
    }

    /// Sieving loop
    fn process(&self) -> WorkerStats {
        let mut stats = WorkerStats::default();
        self.debug_log("starting");
        for i in self.share.indices() {
            let value = self.mapping.to_value(i);
            let square = value * value;
            debug_assert!(square < self.max, "{value} is not a source candidate");

            // The sieve bit of `value` is final once every candidate whose
            // square is <= value has been processed
            if self.frontier.await_at_least(value + 1).is_err() {
                self.debug_log("stopping early");
                stats.stopped = true;
                break;
            }
            stats.checked += 1;

            if !self.sieve.test(i) {
                // `max` fits in usize, and so does any step below it
                let step = (2 * value) as usize;
                for multiple in (square..self.max).step_by(step) {
                    self.sieve.mark_composite(self.mapping.to_index(multiple));
                    stats.marks += 1;
                }
                stats.passes += 1;
            }

            // Composites are published too, the frontier tracks processing
            self.frontier.advance(square);
        }
        self.debug_log("done");
        stats
    }

    /// Logs to ease debugging
    fn debug_log(&self, action: &str) {
        log::trace!(
            "Sieving thread {}/{} ({:?}) is {action}",
            self.share.tid,
            self.num_threads,
            std::thread::current().id()
        );
    }
}
