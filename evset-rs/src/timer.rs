//! Serialized cycle-counter reads and a latency calibration diagnostic.

use crate::geometry::CacheGeometry;
use crate::node::Node;
use crate::region::Region;
use crate::ring::randomized_ring;
use core::arch::x86_64::{_mm_lfence, _rdtsc};
use core::ptr;
use std::hint::black_box;

/// A monotone cycle counter with serialized reads.
pub trait Timer {
    fn new() -> Self;

    /// Read the counter with a serializing barrier on both sides, so that no
    /// surrounding load straddles the timestamp.
    fn timestamp(&self) -> u64;

    /// Time a single load of the line at `line`, serialized on both sides.
    fn time_load(&self, line: *const Node) -> u64;
}

/// Timestamp counter read via `rdtsc`, fenced with `lfence` the way the
/// probe protocol requires.
pub struct TscTimer;

impl Timer for TscTimer {
    fn new() -> Self {
        Self
    }

    #[inline(always)]
    fn timestamp(&self) -> u64 {
        unsafe {
            _mm_lfence();
            let t = _rdtsc();
            _mm_lfence();
            t
        }
    }

    #[inline(always)]
    fn time_load(&self, line: *const Node) -> u64 {
        unsafe {
            _mm_lfence();
            let t0 = _rdtsc();
            _mm_lfence();
            let value = ptr::read_volatile(line);
            _mm_lfence();
            let t1 = _rdtsc();
            _mm_lfence();
            black_box(value);
            t1.wrapping_sub(t0)
        }
    }
}

/// Steps of the uncached chase used to estimate the DRAM reload latency.
const CALIBRATE_MISS_STEPS: u64 = 1_000_000;

/// Samples of the resident reload used to estimate the hit latency.
const CALIBRATE_HIT_SAMPLES: usize = 1_000;

/// Print hit and miss reload latencies measured on `region`, plus the
/// midpoint, as a starting point for deriving a
/// [`LatencyProfile`](crate::LatencyProfile) on an uncharacterized part.
///
/// Relinks the region's nodes; run it before building eviction sets, not
/// after.
pub fn calibrate<T: Timer>(timer: &T, region: &Region, geometry: &CacheGeometry) {
    // Hit latency: re-read one resident line.
    let line = region.node(0);
    let mut hits: Vec<u64> = (0..CALIBRATE_HIT_SAMPLES)
        .map(|_| timer.time_load(line))
        .collect();
    hits.sort_unstable();
    let hit = hits[hits.len() / 2];

    // Miss latency: chase a randomized ring over the whole region. The
    // region exceeds the LLC, so steady-state steps miss to DRAM.
    let all: Vec<*mut Node> = (0..region.len()).map(|i| region.node(i)).collect();
    let ring = randomized_ring(&all, 0);
    let t0 = timer.timestamp();
    let end = unsafe { ring.traverse(CALIBRATE_MISS_STEPS) };
    let t1 = timer.timestamp();
    black_box(end);
    let miss = t1.wrapping_sub(t0) / CALIBRATE_MISS_STEPS;

    println!(
        "[+] Calibration: hit {} cycles, miss {} cycles, midpoint {} (geometry: {} slices x {} ways x {} sets)",
        hit,
        miss,
        (hit + miss) / 2,
        geometry.slices,
        geometry.ways,
        geometry.sets,
    );
}
