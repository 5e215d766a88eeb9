//! Cache-bank contention experiment.
//!
//! An attacker thread pinned to one core chases the eviction ring of its
//! local LLC slice and records one serialized timestamp per epoch of
//! accesses. Meanwhile batches of victim threads flood, slice by slice, the
//! eviction rings of a different cache set. Bucketing the attacker's epoch
//! deltas by victim bank window exposes contention on the shared slices and
//! the on-die interconnect, even though the two cache sets differ.

mod harness;
mod results;

use evset_rs::timer::calibrate;
use evset_rs::{
    Error, EvictionSetBuilder, Region, Ring, Timer, TscTimer, BROADWELL_EP, BROADWELL_EP_LATENCY,
};

/// Pointer-chase steps per victim thread per bank window.
const VICTIM_ITERATIONS: u64 = 5_000_000;

/// Untimed attacker accesses before the timed epochs begin.
const ATTACKER_WARMUP_ACCESSES: u64 = 50_000_000;

/// Timed attacker epochs; one timestamp is recorded per epoch.
const ATTACKER_TIMED_EPOCHS: usize = 5_000_000;

/// Pointer-chase accesses per attacker epoch.
const ACCESSES_PER_EPOCH: u64 = 100;

/// The experiment runs once for every victim-thread count up to this.
const MAX_VICTIM_THREADS: usize = 10;

/// Target cache sets. Arbitrary, as long as they differ.
const CACHE_SET_ATTACKER: usize = 27;
const CACHE_SET_VICTIM: usize = 1898;

/// Logical CPUs of the measured socket; the attacker and the slice profiler
/// run on the first.
const CORE_IDS: [usize; 24] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 24, 25, 26, 27, 28, 29, 30, 31, 32, 33, 34, 35,
];

/// Chase the slice with the longest baseline instead of the shortest. The
/// local slice gives the cleanest baseline, which is the default here.
const PREFER_FARTHEST: bool = false;

/// A build whose probe never settles is retried this many extra times
/// before the run is abandoned.
const BUILD_RETRIES: usize = 1;

fn build_eviction_sets(region: &Region, set_index: usize) -> Result<Vec<Ring>, Error> {
    let timer = TscTimer::new();
    for attempt in 0..=BUILD_RETRIES {
        let builder = EvictionSetBuilder::new(region, &BROADWELL_EP, &BROADWELL_EP_LATENCY, &timer);
        match builder.build(set_index) {
            Ok(sets) => return Ok(sets),
            Err(Error::ProbeUnstable(_)) if attempt < BUILD_RETRIES => {
                eprintln!(
                    "[!] probe would not settle, rebuilding eviction sets for set {}",
                    set_index
                );
            }
            Err(err) => return Err(err),
        }
    }
    unreachable!("loop either returns sets or an error");
}

fn main() -> Result<(), Error> {
    let timer = TscTimer::new();

    // Build both groups of eviction sets serially; two builders running in
    // parallel would perturb each other's timing measurements.
    println!("[+] Building eviction sets for cache set {}", CACHE_SET_ATTACKER);
    let region_attacker = Region::new(BROADWELL_EP.region_size);
    calibrate(&timer, &region_attacker, &BROADWELL_EP);
    let sets_attacker = build_eviction_sets(&region_attacker, CACHE_SET_ATTACKER)?;

    println!("[+] Building eviction sets for cache set {}", CACHE_SET_VICTIM);
    let region_victim = Region::new(BROADWELL_EP.region_size);
    let sets_victim = build_eviction_sets(&region_victim, CACHE_SET_VICTIM)?;

    println!("Made two groups of eviction sets for different cache sets.");

    let slice = harness::profile_slices(&sets_attacker, CORE_IDS[0], PREFER_FARTHEST)?;

    for victims in 0..=MAX_VICTIM_THREADS {
        let run = harness::run(
            sets_attacker[slice],
            &sets_victim,
            victims,
            harness::RunConfig {
                attacker_core: CORE_IDS[0],
                warmup_accesses: ATTACKER_WARMUP_ACCESSES,
                epochs: ATTACKER_TIMED_EPOCHS,
                accesses_per_epoch: ACCESSES_PER_EPOCH,
                victim_iterations: VICTIM_ITERATIONS,
            },
        )?;

        println!(
            "Average attacker access time: {:.2}",
            results::average_access_time(&run.timestamps, ACCESSES_PER_EPOCH)
        );

        results::emit(victims, &run)?;
        println!("Finished experiment with {} victim threads.", victims);
    }

    // The rings chased by the joined threads all point into these two
    // mappings; they must outlive every run.
    drop(region_attacker);
    drop(region_victim);

    println!("All done!");
    Ok(())
}
