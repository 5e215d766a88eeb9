//! Empirical construction of last-level cache eviction sets on a sliced,
//! set-associative LLC, plus the pointer-chase timing primitives the
//! construction rests on.
//!
//! The approach follows Liu, Yarom, Ge, Heiser and Lee, "Last-Level Cache
//! Side-Channel Attacks are Practical" (IEEE S&P 2015), section IV.A: harvest
//! candidate lines for one cache set from a huge-page-backed region, grow a
//! conflict set that fills the set column on every slice, then partition the
//! conflict set into one eviction ring per slice by probing witnesses.

pub mod builder;
pub mod error;
pub mod geometry;
pub mod node;
pub mod oracle;
pub mod probe;
pub mod region;
pub mod ring;
pub mod timer;

pub use builder::EvictionSetBuilder;
pub use error::{Error, Oracle};
pub use geometry::{CacheGeometry, LatencyProfile, BROADWELL_EP, BROADWELL_EP_LATENCY};
pub use node::Node;
pub use region::Region;
pub use ring::Ring;
pub use timer::{Timer, TscTimer};

pub const KB: usize = 1024;
pub const MB: usize = 1024 * 1024;

/// Pin the calling thread to one logical CPU.
pub fn pin_to_core(core: usize) -> Result<(), Error> {
    affinity::set_thread_affinity([core]).map_err(|_| Error::AffinityRefused)
}
