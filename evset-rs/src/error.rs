use std::fmt;
use thiserror::Error;

/// Which traversal-time oracle rejected its ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oracle {
    Candidates,
    ConflictSet,
    EvictionSet(usize),
}

impl fmt::Display for Oracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Oracle::Candidates => write!(f, "candidate"),
            Oracle::ConflictSet => write!(f, "conflict-set"),
            Oracle::EvictionSet(i) => write!(f, "eviction-set {}", i),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// The backing region does not hold enough lines mapping to the target
    /// set. Usually means the region is too small or huge pages are not
    /// actually in use.
    #[error("only {found} candidate lines map to the target set, need at least {needed}")]
    InsufficientCandidates { found: usize, needed: usize },

    /// A probe never measured a latency inside the plausibility window.
    #[error("probe latency did not settle after {0} attempts")]
    ProbeUnstable(usize),

    /// An average traversal latency fell outside its window. Points at a
    /// misconfiguration (wrong thresholds, missing huge pages, wrong
    /// geometry) rather than transient noise.
    #[error("{oracle} ring averaged {cycles} cycles per access, outside [{lo}, {hi}]")]
    SanityOracleFailed {
        oracle: Oracle,
        cycles: u64,
        lo: u64,
        hi: u64,
    },

    /// The host refused to pin the calling thread.
    #[error("could not set cpu affinity")]
    AffinityRefused,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
