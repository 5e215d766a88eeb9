//! The probe primitive: does a full traversal of a ring evict a given line?

use crate::error::Error;
use crate::geometry::{CacheGeometry, LatencyProfile};
use crate::node::Node;
use crate::ring::Ring;
use crate::timer::Timer;
use core::arch::x86_64::_mm_lfence;
use core::ptr;
use std::hint::black_box;

/// Traversal steps per probe, as a multiple of the conflict-set size. One
/// lap is not enough: the replacement policy may evict a ring member instead
/// of the candidate, and every member must be resident when the candidate is
/// re-read.
pub const PROBE_WARMUP_FACTOR: u64 = 100;

/// Attempts per probe before its latency is declared unstable.
pub const PROBE_RETRY_LIMIT: usize = 1_000;

pub struct Prober<'a, T: Timer> {
    timer: &'a T,
    geometry: &'a CacheGeometry,
    latency: &'a LatencyProfile,
}

impl<'a, T: Timer> Prober<'a, T> {
    pub fn new(timer: &'a T, geometry: &'a CacheGeometry, latency: &'a LatencyProfile) -> Self {
        Self {
            timer,
            geometry,
            latency,
        }
    }

    /// Whether a full traversal of `ring` evicts the line at `candidate`;
    /// true means the timed re-read missed to DRAM.
    ///
    /// A measured latency outside the plausibility window is discarded and
    /// the whole protocol retried; context switches and interrupts land out
    /// there. After [`PROBE_RETRY_LIMIT`] implausible rounds the probe gives
    /// up with [`Error::ProbeUnstable`].
    pub fn probe(&self, ring: Ring, candidate: *const Node) -> Result<bool, Error> {
        let steps = PROBE_WARMUP_FACTOR * self.geometry.conflict_set_size() as u64;

        for _ in 0..PROBE_RETRY_LIMIT {
            let time = unsafe {
                // Flush whatever the last probe left behind and install the
                // ring in the LLC.
                black_box(ring.traverse(steps));
                _mm_lfence();

                // Install the candidate; a node is exactly one line, so the
                // whole-struct read touches exactly that line.
                black_box(ptr::read_volatile(candidate));
                _mm_lfence();

                // Traverse again; if `ways` members collide with the
                // candidate on slice and set, one of them evicts it.
                black_box(ring.traverse(steps));

                // The timed re-read decides hit or miss.
                self.timer.time_load(candidate)
            };

            if time >= self.latency.probe_floor && time <= self.latency.probe_ceiling {
                return Ok(time > self.latency.llc_threshold);
            }
        }

        Err(Error::ProbeUnstable(PROBE_RETRY_LIMIT))
    }

    /// Probe `trials` times and require every run to report eviction.
    /// Single spurious outcomes are common enough that one agreeing probe is
    /// not evidence; unanimity is what the partition step needs.
    pub fn confirm(&self, ring: Ring, candidate: *const Node, trials: usize) -> Result<bool, Error> {
        for _ in 0..trials {
            if !self.probe(ring, candidate)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
