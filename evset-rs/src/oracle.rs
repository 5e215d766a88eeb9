//! Traversal-time sanity checks over freshly built rings.
//!
//! Each oracle compares an average per-step chase latency against a window
//! from the [`LatencyProfile`]. A violation means the construction produced
//! a malformed ring (or the platform constants are wrong) and the whole
//! build should be restarted, so it surfaces as an error, not a retry.

use crate::error::{Error, Oracle};
use crate::geometry::{CacheGeometry, LatencyProfile};
use crate::ring::Ring;
use crate::timer::Timer;
use std::collections::HashSet;
use std::hint::black_box;

/// Chase steps per conflict-set line for the candidate-ring check. Fewer
/// laps than the LLC checks take, since every step pays a DRAM miss.
pub const CANDIDATE_CHECK_FACTOR: u64 = 100_000;

/// Chase steps per conflict-set line for the LLC-resident checks.
pub const LLC_CHECK_FACTOR: u64 = 10_000;

/// Average per-step latency over a long chase of `ring`.
pub fn average_step_latency<T: Timer>(timer: &T, ring: Ring, steps: u64) -> u64 {
    let t0 = timer.timestamp();
    let end = unsafe { ring.traverse(steps) };
    let t1 = timer.timestamp();
    black_box(end);
    t1.wrapping_sub(t0) / steps
}

fn check_window(oracle: Oracle, cycles: u64, window: (u64, u64)) -> Result<(), Error> {
    if cycles < window.0 || cycles > window.1 {
        return Err(Error::SanityOracleFailed {
            oracle,
            cycles,
            lo: window.0,
            hi: window.1,
        });
    }
    Ok(())
}

/// The randomized candidate ring must miss to DRAM on every step. Anything
/// faster means the set-index filter is unsound (no huge pages) or the
/// prefetcher won.
pub fn check_candidates<T: Timer>(
    timer: &T,
    geometry: &CacheGeometry,
    latency: &LatencyProfile,
    ring: Ring,
) -> Result<(), Error> {
    let steps = CANDIDATE_CHECK_FACTOR * geometry.conflict_set_size() as u64;
    let avg = average_step_latency(timer, ring, steps);
    println!("Average candidate access time: {}", avg);
    check_window(Oracle::Candidates, avg, latency.dram_window)?;
    println!("Validated candidates miss to DRAM");
    Ok(())
}

/// The conflict ring fills exactly one set column per slice, so a chase of
/// it must hit in the LLC throughout.
pub fn check_conflict_set<T: Timer>(
    timer: &T,
    geometry: &CacheGeometry,
    latency: &LatencyProfile,
    ring: Ring,
) -> Result<(), Error> {
    let steps = LLC_CHECK_FACTOR * geometry.conflict_set_size() as u64;
    let avg = average_step_latency(timer, ring, steps);
    println!("Average access time for conflict set: {}", avg);
    check_window(Oracle::ConflictSet, avg, latency.llc_window)?;
    println!("Validated conflict set access time");
    Ok(())
}

/// Structural and latency checks over the final partition: `slices` closed
/// rings of `ways` nodes each, pairwise disjoint, each LLC-resident.
/// Structural violations are construction bugs and fail hard; only the
/// latency windows report as oracle errors.
pub fn check_eviction_sets<T: Timer>(
    timer: &T,
    geometry: &CacheGeometry,
    latency: &LatencyProfile,
    rings: &[Ring],
) -> Result<(), Error> {
    verify_partition(geometry, rings);
    println!("Validated size of each eviction set");
    println!("Validated eviction sets are disjoint");

    let steps = LLC_CHECK_FACTOR * geometry.conflict_set_size() as u64;
    for (i, ring) in rings.iter().enumerate() {
        let avg = average_step_latency(timer, *ring, steps);
        println!("Average access time for eviction set {}: {}", i + 1, avg);
        check_window(Oracle::EvictionSet(i), avg, latency.eviction_window)?;
    }
    println!("Validated access time for each full eviction set");
    Ok(())
}

/// Panics unless `rings` is a well-formed partition of one conflict set.
pub fn verify_partition(geometry: &CacheGeometry, rings: &[Ring]) {
    assert_eq!(rings.len(), geometry.slices);

    let mut all = HashSet::new();
    for ring in rings {
        unsafe {
            assert!(ring.is_closed());
            let nodes = ring.nodes();
            assert_eq!(nodes.len(), geometry.ways);
            for node in nodes {
                assert!(all.insert(node), "node in two eviction sets");
            }
        }
    }
    assert_eq!(all.len(), geometry.conflict_set_size());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::ring::Ring;
    use crate::KB;

    const TINY: CacheGeometry = CacheGeometry {
        line_size: 64,
        slices: 2,
        ways: 3,
        sets: 16,
        region_size: 16 * KB,
    };

    fn ring_over(nodes: &mut [Node]) -> Ring {
        unsafe {
            let mut ring = Ring::singleton(&mut nodes[0] as *mut Node);
            for node in &mut nodes[1..] {
                ring.push(node as *mut Node);
            }
            ring
        }
    }

    #[test]
    fn partition_of_disjoint_rings_passes() {
        let mut a: Vec<Node> = (0..3).map(|_| Node::empty()).collect();
        let mut b: Vec<Node> = (0..3).map(|_| Node::empty()).collect();
        let rings = [ring_over(&mut a), ring_over(&mut b)];
        verify_partition(&TINY, &rings);
    }

    #[test]
    #[should_panic(expected = "node in two eviction sets")]
    fn shared_node_fails_disjointness() {
        let mut a: Vec<Node> = (0..3).map(|_| Node::empty()).collect();
        let mut b: Vec<Node> = (0..3).map(|_| Node::empty()).collect();
        let first = ring_over(&mut a);
        let _ = ring_over(&mut b);
        // Rebuild the second ring stealing a node from the first.
        let shared = unsafe {
            let mut ring = Ring::singleton(&mut b[0] as *mut Node);
            ring.push(&mut b[1] as *mut Node);
            ring.push(&mut a[0] as *mut Node);
            ring
        };
        verify_partition(&TINY, &[first, shared]);
    }

    #[test]
    #[should_panic]
    fn wrong_ring_size_fails() {
        let mut a: Vec<Node> = (0..3).map(|_| Node::empty()).collect();
        let mut b: Vec<Node> = (0..2).map(|_| Node::empty()).collect();
        let rings = [ring_over(&mut a), ring_over(&mut b)];
        verify_partition(&TINY, &rings);
    }
}
