use std::fmt;

/// Reasons why a sieve run can be rejected or fail before producing a result
#[derive(Debug)]
pub enum SieveError {
    /// The first candidate must be an odd number no smaller than 3
    InvalidStart(u64),

    /// At least one sieving thread is needed
    NoThreads,

    /// The requested bound cannot be represented on this platform
    InputOutOfRange { max: u64 },

    /// Sieve buffer or per-thread bookkeeping could not be allocated
    ResourceExhaustion { words: usize },

    /// A worker thread could not be spawned
    ThreadCreation { thread: usize, source: std::io::Error },
}
//
impl fmt::Display for SieveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidStart(start) => {
                write!(f, "sieve start {start} is not an odd number >= 3")
            }
            Self::NoThreads => f.write_str("sieving needs at least one thread"),
            Self::InputOutOfRange { max } => {
                write!(f, "upper bound {max} is too large for this platform")
            }
            Self::ResourceExhaustion { words } => {
                write!(f, "failed to allocate {words} words of sieve state")
            }
            Self::ThreadCreation { thread, .. } => {
                write!(f, "failed to spawn sieving thread #{thread}")
            }
        }
    }
}
//
impl std::error::Error for SieveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ThreadCreation { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Error type used to signal that the stop signal was raised
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Stopped;
//
impl fmt::Display for Stopped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("the sieve was stopped")
    }
}
//
impl std::error::Error for Stopped {}
