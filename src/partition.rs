//! Static assignment of source candidates to sieving threads
//!
//! Thread `tid` visits indices `tid, tid + tcount, tid + 2·tcount, …`, and
//! the remainder of the even split goes to the lowest thread ids. There is no
//! shared work queue: most candidates turn out to be composite and are
//! skipped in O(1), so the synchronization cost of a queue would dominate the
//! work it hands out. Interleaving also keeps every thread close to the
//! frontier, which is what the frontier barrier needs to make progress.

/// One thread's share of the source candidates
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ThreadShare {
    /// Thread id, which is also the first index visited
    pub tid: usize,

    /// Distance between two consecutive indices of this thread
    pub stride: usize,

    /// Number of indices visited by this thread
    pub iterations: usize,
}
//
impl ThreadShare {
    /// Indices visited by this thread, in increasing order
    pub fn indices(&self) -> impl Iterator<Item = usize> {
        let Self {
            tid,
            stride,
            iterations,
        } = *self;
        (0..iterations).map(move |k| tid + k * stride)
    }
}

/// Split `itop` source candidates across `tcount` threads
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WorkPartitioner {
    tcount: usize,
    base_share: usize,
    leftover: usize,
}
//
impl WorkPartitioner {
    /// Set up the split, `tcount` must not be zero
    pub fn new(itop: usize, tcount: usize) -> Self {
        assert_ne!(tcount, 0, "No progress possible in this configuration");
        Self {
            tcount,
            base_share: itop / tcount,
            leftover: itop % tcount,
        }
    }

    /// Number of threads work is split across
    pub fn num_threads(&self) -> usize {
        self.tcount
    }

    /// Number of indices that do not divide evenly across threads
    pub fn leftover(&self) -> usize {
        self.leftover
    }

    /// Share of thread `tid`
    pub fn share(&self, tid: usize) -> ThreadShare {
        debug_assert!(tid < self.tcount);
        ThreadShare {
            tid,
            stride: self.tcount,
            iterations: self.base_share + (tid < self.leftover) as usize,
        }
    }

    /// Shares of all threads, by increasing thread id
    pub fn shares(&self) -> impl Iterator<Item = ThreadShare> + '_ {
        (0..self.tcount).map(|tid| self.share(tid))
    }
}

#[cfg(test)]
mod tests {
    use super::WorkPartitioner;
    use proptest::prelude::*;

    #[test]
    fn leftover_goes_first() {
        let partitioner = WorkPartitioner::new(10, 3);
        assert_eq!(partitioner.num_threads(), 3);
        assert_eq!(partitioner.leftover(), 1);
        let assigned = partitioner
            .shares()
            .map(|share| share.indices().collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert_eq!(assigned, [vec![0, 3, 6, 9], vec![1, 4, 7], vec![2, 5, 8]]);
    }

    #[test]
    fn more_threads_than_work() {
        let partitioner = WorkPartitioner::new(2, 5);
        let iterations = partitioner
            .shares()
            .map(|share| share.iterations)
            .collect::<Vec<_>>();
        assert_eq!(iterations, [1, 1, 0, 0, 0]);
    }

    proptest! {
        #[test]
        fn exact_coverage(itop in 0usize..10_000, tcount in 1usize..300) {
            let partitioner = WorkPartitioner::new(itop, tcount);
            let mut seen = vec![false; itop];
            for share in partitioner.shares() {
                prop_assert_eq!(share.stride, tcount);
                for i in share.indices() {
                    prop_assert!(i < itop, "index {} out of range", i);
                    prop_assert!(!seen[i], "index {} assigned twice", i);
                    seen[i] = true;
                }
            }
            prop_assert!(seen.into_iter().all(|covered| covered));
        }
    }
}
