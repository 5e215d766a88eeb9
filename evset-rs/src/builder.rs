//! Eviction-set construction for a sliced LLC.
//!
//! The builder turns a flat pool of candidate lines for one cache set into
//! one eviction ring per slice. It first grows a conflict ring that fills
//! the target set column on every slice, then repeatedly picks a leftover
//! witness the conflict ring evicts and locates the `ways` members
//! responsible, which form that witness's slice column.
//!
//! The builder is strictly single-threaded; its probes assume the calling
//! thread is the only aggressor on the measured sets.

use crate::error::Error;
use crate::geometry::{CacheGeometry, LatencyProfile};
use crate::node::Node;
use crate::oracle;
use crate::probe::Prober;
use crate::region::Region;
use crate::ring::{self, randomized_ring, Ring};
use crate::timer::Timer;
use core::mem;
use std::collections::HashSet;

/// Throwaway probes before the first real one, to settle the caches, the
/// branch predictors and the cycle counter.
const WARMUP_PROBES: usize = 10;

/// Confirmation probes per witness; all must agree. The knob trades wall
/// time against the false-positive rate of the partition step.
const WITNESS_TRIALS: usize = 100;

pub struct EvictionSetBuilder<'a, T: Timer> {
    region: &'a Region,
    geometry: &'a CacheGeometry,
    latency: &'a LatencyProfile,
    timer: &'a T,
    seed: u64,
}

impl<'a, T: Timer> EvictionSetBuilder<'a, T> {
    pub fn new(
        region: &'a Region,
        geometry: &'a CacheGeometry,
        latency: &'a LatencyProfile,
        timer: &'a T,
    ) -> Self {
        assert_eq!(geometry.line_size, mem::size_of::<Node>());
        assert!(geometry.line_size.is_power_of_two());
        assert!(geometry.sets.is_power_of_two());
        Self {
            region,
            geometry,
            latency,
            timer,
            seed: 0,
        }
    }

    /// Use a different permutation seed. Reruns with the same seed walk the
    /// same chain and produce comparable measurements.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Build one eviction ring per slice for `set_index`. The returned
    /// handles stay valid for as long as the backing region lives.
    pub fn build(&self, set_index: usize) -> Result<Vec<Ring>, Error> {
        assert!(set_index < self.geometry.sets);
        let prober = Prober::new(self.timer, self.geometry, self.latency);

        let candidates = self.region.candidates(self.geometry, set_index)?;
        println!("Number of candidates: {}", candidates.len());

        let candidate_ring = randomized_ring(&candidates, self.seed);
        unsafe {
            assert_eq!(candidate_ring.len(), candidates.len());
        }
        println!("Entries in linked list: {}", candidates.len());

        oracle::check_candidates(self.timer, self.geometry, self.latency, candidate_ring)?;

        let (conflict, leftover) =
            self.grow_conflict_set(&prober, candidate_ring, candidates.len())?;
        oracle::check_conflict_set(self.timer, self.geometry, self.latency, conflict)?;

        let sets = self.partition(&prober, conflict, leftover)?;
        oracle::check_eviction_sets(self.timer, self.geometry, self.latency, &sets)?;

        Ok(sets)
    }

    /// Grow a ring of exactly `slices * ways` nodes that between them fill
    /// the target set column on every slice.
    ///
    /// A candidate that survives a traversal of the ring maps to a slice
    /// whose column the ring does not fully cover yet, so it is admitted;
    /// one that gets evicted is already covered and stays out.
    fn grow_conflict_set(
        &self,
        prober: &Prober<'a, T>,
        mut candidates: Ring,
        total: usize,
    ) -> Result<(Ring, Ring), Error> {
        let ways = self.geometry.ways;
        let target = self.geometry.conflict_set_size();

        unsafe {
            // Seed with `ways` arbitrary candidates: not enough to fill any
            // single slice's column on their own. Peeling the handle node
            // `ways` times is pure pointer surgery, no membership container.
            let first = candidates.head();
            candidates.remove(first);
            let mut conflict = Ring::singleton(first);
            for _ in 1..ways {
                let node = candidates.head();
                candidates.remove(node);
                conflict.push(node);
            }
            assert_eq!(conflict.len(), ways);
            assert_eq!(candidates.len(), total - ways);

            let mut count = ways;
            let mut candidate = candidates.head();

            for _ in 0..WARMUP_PROBES {
                let _ = prober.probe(conflict, candidate)?;
            }

            while count < target {
                if prober.probe(conflict, candidate)? {
                    // Evicted: its slice column is already full.
                    candidate = (*candidate).next;
                } else {
                    let next = candidates.remove(candidate);
                    conflict.push(candidate);
                    count += 1;
                    candidate = next;
                }
            }

            assert_eq!(conflict.len(), target);
            println!("Conflict set size: {}, should be {}", target, target);

            let remaining = candidates.len();
            println!(
                "Remaining candidate set size: {}, should be {}",
                remaining,
                total - target
            );
            assert_eq!(remaining, total - target);

            Ok((conflict, candidates))
        }
    }

    /// Split the conflict ring into one ring per slice.
    ///
    /// Each round confirms a leftover witness the full conflict ring evicts,
    /// then scans the conflict ring: a member whose temporary removal stops
    /// the eviction is one of the `ways` lines in the witness's slice
    /// column. The column is spliced out as its own ring; after
    /// `slices - 1` rounds the remainder is the final slice's ring.
    fn partition(
        &self,
        prober: &Prober<'a, T>,
        mut conflict: Ring,
        mut leftover: Ring,
    ) -> Result<Vec<Ring>, Error> {
        let ways = self.geometry.ways;
        let mut sets = Vec::with_capacity(self.geometry.slices);

        unsafe {
            let mut witness = leftover.head();

            while sets.len() < self.geometry.slices - 1 {
                witness = self.confirm_witness(prober, conflict, &mut leftover, witness)?;

                // Scan the conflict ring, wrapping around as needed and
                // skipping members already attributed to this column.
                let mut column: HashSet<*mut Node> = HashSet::with_capacity(ways);
                let mut test = conflict.head();
                while column.len() < ways {
                    if column.contains(&test) {
                        test = (*test).next;
                        continue;
                    }

                    ring::detach(test);
                    // The detached node's stale links still name a live ring
                    // member to probe from.
                    let evicted = prober.probe(Ring::with_head((*test).next), witness)?;
                    ring::restore(test);

                    if !evicted {
                        column.insert(test);
                    }
                    test = (*test).next;
                }

                // Splice the column out as its own ring.
                let mut members = column.into_iter();
                let first = members.next().expect("column cannot be empty");
                conflict.remove(first);
                let mut evset = Ring::singleton(first);
                for node in members {
                    conflict.remove(node);
                    evset.push(node);
                }
                assert_eq!(evset.len(), ways);
                sets.push(evset);
                println!("Found eviction set: {}", sets.len());

                // This witness's column is gone; retire it.
                assert!((*witness).next != witness);
                witness = leftover.remove(witness);
            }
        }

        // Whatever remains of the conflict ring is the final slice's set.
        sets.push(conflict);
        println!("Remaining nodes form eviction set: {}", sets.len());

        Ok(sets)
    }

    /// Find a leftover candidate that the conflict ring evicts unanimously
    /// across [`WITNESS_TRIALS`] probes. A single agreeing probe is not
    /// enough: a context switch during the timed read can fake either
    /// outcome, and a false witness poisons the whole column scan.
    fn confirm_witness(
        &self,
        prober: &Prober<'a, T>,
        conflict: Ring,
        leftover: &mut Ring,
        mut witness: *mut Node,
    ) -> Result<*mut Node, Error> {
        unsafe {
            loop {
                while !prober.probe(conflict, witness)? {
                    // Still hits in the LLC; never usable as a witness.
                    assert!((*witness).next != witness, "ran out of witness candidates");
                    witness = leftover.remove(witness);
                }

                if prober.confirm(conflict, witness, WITNESS_TRIALS)? {
                    return Ok(witness);
                }

                assert!((*witness).next != witness, "ran out of witness candidates");
                witness = leftover.remove(witness);
            }
        }
    }
}
