/// Translation between sieve indices and the odd numbers they stand for
///
/// Index `i` represents the odd number `start + 2 * i`. Ordering over indices
/// matches ordering over the numbers they represent.
///
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IndexMapping {
    /// First odd number covered by the sieve
    start: u64,
}
//
impl IndexMapping {
    /// Set up the mapping for a sieve whose first candidate is `start`
    ///
    /// `start` must be odd. The sieve itself only accepts `start >= 3`, but
    /// the mapping is valid for any odd number.
    ///
    pub const fn new(start: u64) -> Self {
        assert!(start % 2 == 1, "Sieve candidates must be odd");
        Self { start }
    }

    /// First candidate of the sieve
    pub const fn start(&self) -> u64 {
        self.start
    }

    /// Odd number represented by index `i`
    #[inline(always)]
    pub const fn to_value(&self, i: usize) -> u64 {
        self.start + 2 * i as u64
    }

    /// Index of the odd number `value`, which must be `>= start`
    #[inline(always)]
    pub const fn to_index(&self, value: u64) -> usize {
        debug_assert!(value >= self.start);
        ((value - self.start) / 2) as usize
    }

    /// Number of odd candidates in `[start, max)`
    pub const fn len_below(&self, max: u64) -> u64 {
        if max <= self.start {
            0
        } else {
            (max - self.start).div_ceil(2)
        }
    }

    /// Number of candidates whose square is strictly below `max`
    ///
    /// Only these candidates can start a crossing-off pass, larger ones can
    /// merely be crossed off.
    ///
    pub const fn sources_below(&self, max: u64) -> u64 {
        if max == 0 {
            return 0;
        }
        // Largest odd candidate c with c² <= max - 1
        let root = (max - 1).isqrt();
        if root < self.start {
            0
        } else {
            (root - self.start) / 2 + 1
        }
    }
}
