use crate::{
    bits::{BitSieve, WORD_BITS},
    error::SieveError,
    frontier::{CondvarFrontier, Frontier},
    index::IndexMapping,
    partition::WorkPartitioner,
    worker::{WorkItem, WorkerStats},
};
use std::{io, thread::Builder, time::Duration};

/// Parameters of a sieve run
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SieveConfig {
    /// First odd number handled by the sieving threads (at least 3)
    ///
    /// Primes below it are found by a sequential sieve and their multiples
    /// are crossed off before the sieving threads start.
    ///
    pub start: u64,

    /// Exclusive upper bound of the primes to be found
    pub max: u64,

    /// Number of sieving threads
    pub threads: usize,

    /// Warn when a sieving thread waits this long without frontier progress
    pub stall_warning: Option<Duration>,
}
//
impl SieveConfig {
    /// Find primes below `max` using every CPU of the host
    pub fn new(max: u64) -> Self {
        Self {
            start: 3,
            max,
            threads: std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(2),
            stall_warning: None,
        }
    }

    /// Use a different first sieving candidate
    pub fn with_start(mut self, start: u64) -> Self {
        self.start = start;
        self
    }

    /// Use a different number of sieving threads
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Warn about sieving threads which are stuck for `period`
    pub fn with_stall_warning(mut self, period: Duration) -> Self {
        self.stall_warning = Some(period);
        self
    }

    /// Check that the run can be carried out, compute its index mapping
    fn validate(&self) -> Result<IndexMapping, SieveError> {
        if self.start < 3 || self.start % 2 == 0 {
            return Err(SieveError::InvalidStart(self.start));
        }
        if self.threads == 0 {
            return Err(SieveError::NoThreads);
        }
        let out_of_range = SieveError::InputOutOfRange { max: self.max };
        if usize::try_from(self.max).is_err() {
            return Err(out_of_range);
        }
        if self.start.checked_mul(self.start).is_none() {
            return Err(out_of_range);
        }
        Ok(IndexMapping::new(self.start))
    }
}

/// Aggregated statistics of a sieve run
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SieveStats {
    /// Number of sieving threads
    pub threads: usize,

    /// Candidates whose square is below the bound
    pub sources: usize,

    /// Primes below the first candidate, crossed off before sieving
    pub seeds: usize,

    /// Source candidates examined by the sieving threads
    pub checked: usize,

    /// Crossing-off passes run by the sieving threads
    pub passes: usize,

    /// Bits marked by the sieving threads, duplicates included
    pub marks: usize,
}
//
impl SieveStats {
    /// Merge one thread's statistics
    fn merge(&mut self, worker: WorkerStats) {
        self.checked += worker.checked;
        self.passes += worker.passes;
        self.marks += worker.marks;
    }
}

/// Outcome of a sieve run
///
/// A clear bit at index `i` means that `mapping().to_value(i)` is prime.
///
#[derive(Clone, Debug)]
pub struct Sieve {
    mapping: IndexMapping,
    max: u64,
    len: usize,
    words: Box<[u64]>,
    small_primes: Vec<u64>,
    stats: SieveStats,
}
//
impl Sieve {
    /// Translation between sieve indices and candidates
    pub fn mapping(&self) -> IndexMapping {
        self.mapping
    }

    /// Exclusive upper bound of the sieve
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Number of candidates in the sieve
    pub fn len(&self) -> usize {
        self.len
    }

    /// Truth that no candidate lies in `[start, max)`
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Packed composite markers, bit `i` of the sieve is bit `i % 64` of word
    /// `i / 64`
    pub fn bits(&self) -> &[u64] {
        &self.words
    }

    /// Truth that the candidate at index `i` is composite
    pub fn is_composite(&self, i: usize) -> bool {
        assert!(i < self.len, "sieve index {i} out of bounds");
        self.words[i / WORD_BITS] & (1 << (i % WORD_BITS)) != 0
    }

    /// Primes below the first candidate, 2 included
    pub fn small_primes(&self) -> &[u64] {
        &self.small_primes
    }

    /// All primes below `max`, in increasing order
    pub fn primes(&self) -> impl Iterator<Item = u64> + '_ {
        let sieved = (0..self.len)
            .filter(|&i| !self.is_composite(i))
            .map(|i| self.mapping.to_value(i));
        self.small_primes.iter().copied().chain(sieved)
    }

    /// Number of primes below `max`
    pub fn count(&self) -> usize {
        use rayon::prelude::*;
        let composites = self
            .words
            .par_iter()
            .map(|word| word.count_ones() as usize)
            .sum::<usize>();
        self.small_primes.len() + self.len - composites
    }

    /// What the run did
    pub fn stats(&self) -> &SieveStats {
        &self.stats
    }
}

/// Find the primes below `config.max` using the default frontier
pub fn sieve(config: &SieveConfig) -> Result<Sieve, SieveError> {
    sieve_with::<CondvarFrontier>(config)
}

/// Find the primes below `config.max` using a specific frontier
pub fn sieve_with<F: Frontier>(config: &SieveConfig) -> Result<Sieve, SieveError> {
    sieve_using::<F>(config, |tid| Ok(Builder::new().name(format!("psieve-{tid}"))))
}

/// Sieve with a custom way of setting up the sieving threads
///
/// `builder` is called with the thread id of each sieving thread before it is
/// spawned. An error from it is handled like a failure to spawn that thread.
///
fn sieve_using<F: Frontier>(
    config: &SieveConfig,
    builder: impl Fn(usize) -> io::Result<Builder>,
) -> Result<Sieve, SieveError> {
    let mapping = config.validate()?;
    let max = config.max;

    // Size the run. Both fit in usize since max does.
    let len = mapping.len_below(max) as usize;
    let itop = mapping.sources_below(max) as usize;
    let bits = BitSieve::new(len)?;
    log::debug!(
        "sieving {len} candidates in [{}, {max}) with {} threads, {itop} of them sources",
        mapping.start(),
        config.threads,
    );

    // Handle the primes that the sieving threads will not see
    let small_primes = primes_below(mapping.start().min(max))?;
    let seeds = seed(&bits, mapping, max, &small_primes);

    // Prepare per-thread work
    let frontier = F::new(mapping.start() * mapping.start(), config.stall_warning);
    let partitioner = WorkPartitioner::new(itop, config.threads);
    let mut items = Vec::new();
    items
        .try_reserve_exact(config.threads)
        .map_err(|_| SieveError::ResourceExhaustion {
            words: config.threads,
        })?;
    items.extend(partitioner.shares().map(|share| WorkItem {
        share,
        num_threads: partitioner.num_threads(),
        mapping,
        max,
        sieve: &bits,
        frontier: &frontier,
    }));

    // Run the sieving threads
    let mut stats = run(&items, &frontier, builder)?;
    stats.sources = itop;
    stats.seeds = seeds;
    log::debug!("sieve done: {stats:?}");

    drop(items);
    Ok(Sieve {
        mapping,
        max,
        len,
        words: bits.into_words(),
        small_primes,
        stats,
    })
}

/// Spawn one thread per work item, wait for all of them
///
/// If a thread cannot be spawned, the threads which already run are told to
/// stop, and the failure is reported once they are done.
///
fn run<F: Frontier>(
    items: &[WorkItem<'_, F>],
    frontier: &F,
    builder: impl Fn(usize) -> io::Result<Builder>,
) -> Result<SieveStats, SieveError> {
    std::thread::scope(|s| -> Result<SieveStats, SieveError> {
        let mut handles = Vec::new();
        handles
            .try_reserve_exact(items.len())
            .map_err(|_| SieveError::ResourceExhaustion { words: items.len() })?;

        let mut failure = None;
        for item in items {
            let tid = item.share.tid;
            let spawned = builder(tid).and_then(|b| b.spawn_scoped(s, move || item.run()));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    log::error!("failed to spawn sieving thread #{tid}: {source}");
                    frontier.stop();
                    failure = Some(SieveError::ThreadCreation {
                        thread: tid,
                        source,
                    });
                    break;
                }
            }
        }

        let mut stats = SieveStats {
            threads: items.len(),
            ..SieveStats::default()
        };
        for (tid, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(worker) => {
                    log::debug!("sieving thread #{tid} finished: {worker:?}");
                    stats.merge(worker);
                }
                Err(payload) => std::panic::resume_unwind(payload),
            }
        }
        failure.map_or(Ok(stats), Err)
    })
}

/// Primes below `bound`, found by a sequential sieve over odd numbers
fn primes_below(bound: u64) -> Result<Vec<u64>, SieveError> {
    let mapping = IndexMapping::new(3);
    // `bound` is at most `max`, so this fits in usize
    let odd = BitSieve::new(mapping.len_below(bound) as usize)?;
    for i in 0..mapping.sources_below(bound) as usize {
        if odd.test(i) {
            continue;
        }
        let prime = mapping.to_value(i);
        for multiple in (prime * prime..bound).step_by(2 * prime as usize) {
            odd.mark_composite(mapping.to_index(multiple));
        }
    }
    let primes = (bound > 2).then_some(2).into_iter();
    Ok(primes
        .chain(
            (0..odd.len())
                .filter(|&i| !odd.test(i))
                .map(|i| mapping.to_value(i)),
        )
        .collect())
}

/// Cross off the multiples of odd primes below the first candidate, return
/// how many primes were used
fn seed(bits: &BitSieve, mapping: IndexMapping, max: u64, small_primes: &[u64]) -> usize {
    let start = mapping.start();
    let mut seeds = 0;
    for &prime in small_primes.iter().filter(|&&p| p % 2 == 1) {
        // First odd multiple of `prime` which is a candidate, skipping `prime`
        let mut factor = start.div_ceil(prime).max(prime);
        factor += 1 - factor % 2;
        let Some(first) = prime.checked_mul(factor) else {
            continue;
        };
        // `max` fits in usize, and so does any step below it
        for multiple in (first..max).step_by(2 * prime as usize) {
            bits.mark_composite(mapping.to_index(multiple));
        }
        seeds += 1;
    }
    seeds
}

#[cfg(test)]
mod tests {
    use super::{primes_below, sieve, sieve_using, sieve_with, SieveConfig};
    use crate::{
        error::{SieveError, Stopped},
        frontier::{CondvarFrontier, Done, Frontier, FutexFrontier},
        test_utils,
    };
    use std::{io, thread::Builder, time::Duration};

    crate::test_sieves!(
        (condvar_frontier, CondvarFrontier),
        (futex_frontier, FutexFrontier)
    );

    #[test]
    fn small_bounds() {
        for max in 0..60 {
            for threads in [1, 2, 5] {
                let config = SieveConfig::new(max).with_threads(threads);
                test_utils::check_sieve(&sieve(&config).unwrap(), max);
            }
        }
    }

    #[test]
    fn boundary() {
        for threads in [1, 2, 8] {
            let config = SieveConfig::new(25).with_start(5).with_threads(threads);
            let result = sieve(&config).unwrap();

            // 5² = 25 is excluded, so no candidate crosses anything off
            assert_eq!(result.stats().sources, 0);
            assert_eq!(result.stats().passes, 0);
            assert_eq!(result.small_primes(), [2, 3]);
            assert_eq!(
                result.primes().collect::<Vec<_>>(),
                [2, 3, 5, 7, 11, 13, 17, 19, 23]
            );
        }
    }

    #[test]
    fn any_odd_start() {
        for start in [3, 5, 7, 9, 11, 31, 101, 1001] {
            for threads in [1, 3, 8] {
                let config = SieveConfig::new(20_000)
                    .with_start(start)
                    .with_threads(threads);
                let result = sieve(&config).unwrap();
                test_utils::check_sieve(&result, 20_000);
                assert_eq!(result.small_primes(), primes_below(start).unwrap());
            }
        }
    }

    #[test]
    fn start_beyond_max() {
        let config = SieveConfig::new(30).with_start(101).with_threads(2);
        let result = sieve(&config).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.max(), 30);
        assert_eq!(result.primes().collect::<Vec<_>>(), primes_below(30).unwrap());
    }

    #[test]
    fn single_thread_equivalence() {
        let max = 100_000;
        let config = SieveConfig::new(max).with_threads(1);
        let result = sieve(&config).unwrap();
        let sequential = test_utils::sequential_sieve(max);
        for i in 0..result.len() {
            let value = result.mapping().to_value(i) as usize;
            assert_eq!(result.is_composite(i), !sequential[value], "mismatch at {value}");
        }
    }

    #[test]
    fn thread_count_does_not_change_the_result() {
        let max = 300_000;
        let reference = sieve(&SieveConfig::new(max).with_threads(1)).unwrap();
        for threads in [2, 3, 4, 7, 16, 64] {
            let result = sieve_with::<FutexFrontier>(&SieveConfig::new(max).with_threads(threads))
                .unwrap();
            assert_eq!(result.bits(), reference.bits());
        }
    }

    #[test]
    fn stall_warning_does_not_change_the_result() {
        let config = SieveConfig::new(50_000)
            .with_threads(4)
            .with_stall_warning(Duration::from_micros(1));
        test_utils::check_sieve(&sieve(&config).unwrap(), 50_000);
    }

    #[test]
    fn stats() {
        let result = sieve(&SieveConfig::new(100).with_threads(3)).unwrap();
        let stats = result.stats();
        assert_eq!(stats.threads, 3);
        assert_eq!(stats.sources, 4);
        assert_eq!(stats.checked, 4);
        assert_eq!(stats.seeds, 0);
        assert_eq!(stats.passes, 3);
        assert_eq!(stats.marks, 16 + 8 + 4);

        let result = sieve(&SieveConfig::new(100).with_start(7).with_threads(2)).unwrap();
        assert_eq!(result.stats().seeds, 2);
        assert_eq!(result.stats().sources, 2);
    }

    #[test]
    fn rejected_configs() {
        let rejected = |config: SieveConfig| sieve(&config).unwrap_err();
        assert!(matches!(
            rejected(SieveConfig::new(100).with_start(1)),
            SieveError::InvalidStart(1)
        ));
        assert!(matches!(
            rejected(SieveConfig::new(100).with_start(6)),
            SieveError::InvalidStart(6)
        ));
        assert!(matches!(
            rejected(SieveConfig::new(100).with_threads(0)),
            SieveError::NoThreads
        ));
        assert!(matches!(
            rejected(SieveConfig::new(100).with_start(u64::MAX)),
            SieveError::InputOutOfRange { max: 100 }
        ));
        #[cfg(target_pointer_width = "64")]
        assert!(matches!(
            rejected(SieveConfig::new(u64::MAX)),
            SieveError::ResourceExhaustion { .. }
        ));
        #[cfg(not(target_pointer_width = "64"))]
        assert!(matches!(
            rejected(SieveConfig::new(u64::MAX)),
            SieveError::InputOutOfRange { max: u64::MAX }
        ));
    }

    #[test]
    fn small_primes_match_trial_division() {
        for bound in 0..300 {
            assert_eq!(
                primes_below(bound).unwrap(),
                test_utils::reference_primes(bound)
            );
        }
    }

    #[test]
    fn large_start() {
        let (start, max) = (20_000_001, 20_000_300);
        let result = sieve(&SieveConfig::new(max).with_start(start).with_threads(4)).unwrap();
        let reference = sieve(&SieveConfig::new(max).with_threads(4)).unwrap();
        assert_eq!(result.len(), 150);
        assert_eq!(result.stats().sources, 0);
        assert_eq!(
            result.primes().collect::<Vec<_>>(),
            reference.primes().collect::<Vec<_>>()
        );
        assert_eq!(result.count(), reference.count());
    }

    #[test]
    fn thread_creation_failure() {
        for (threads, failing) in [(1, 0), (4, 0), (4, 2), (8, 7)] {
            let config = SieveConfig::new(1_000_000).with_threads(threads);
            let result = sieve_using::<CondvarFrontier>(&config, |tid| {
                if tid == failing {
                    Err(io::Error::other("out of threads"))
                } else {
                    Ok(Builder::new())
                }
            });
            match result {
                Err(SieveError::ThreadCreation { thread, source }) => {
                    assert_eq!(thread, failing);
                    assert_eq!(source.to_string(), "out of threads");
                }
                other => panic!("expected a thread creation failure, got {other:?}"),
            }
        }
    }

    /// Condvar frontier which panics when the candidate 5 is published
    struct PanickingFrontier(CondvarFrontier);
    //
    impl PanickingFrontier {
        const MESSAGE: &'static str = "cannot publish 5";
    }
    //
    impl Frontier for PanickingFrontier {
        fn new(initial: u64, stall_warning: Option<Duration>) -> Self {
            Self(CondvarFrontier::new(initial, stall_warning))
        }

        fn await_at_least(&self, target: u64) -> Result<Done, Stopped> {
            self.0.await_at_least(target)
        }

        fn advance(&self, candidate_square: u64) {
            if candidate_square == 25 {
                panic!("{}", Self::MESSAGE);
            }
            self.0.advance(candidate_square)
        }

        fn current(&self) -> u64 {
            self.0.current()
        }

        fn stop(&self) {
            self.0.stop()
        }

        fn stopped(&self) -> bool {
            self.0.stopped()
        }
    }

    #[test]
    fn worker_panic_reaches_caller() {
        use std::panic::{catch_unwind, AssertUnwindSafe};
        for threads in [1, 2, 4] {
            // Every thread but the one handling 5 ends up waiting for it
            let config = SieveConfig::new(1_000_000).with_threads(threads);
            let payload = catch_unwind(AssertUnwindSafe(|| {
                sieve_with::<PanickingFrontier>(&config)
            }))
            .unwrap_err();
            let message = payload
                .downcast_ref::<String>()
                .map(String::as_str)
                .or_else(|| payload.downcast_ref::<&str>().copied());
            assert_eq!(message, Some(PanickingFrontier::MESSAGE));
        }
    }
}
