//! Thread orchestration for one contention experiment.

use evset_rs::{pin_to_core, Error, Ring, Timer, TscTimer};
use std::hint::black_box;
use std::thread;
use std::time::Duration;

/// Chase steps used to profile each slice ring from the attacker core.
const PROFILE_ITERATIONS: u64 = 10_000_000;

/// Quiesce time for the attacker's untimed warmup accesses.
const WARMUP_SLEEP: Duration = Duration::from_millis(1000);

/// Spacing between consecutive bank windows.
const BANK_SLEEP: Duration = Duration::from_millis(300);

#[derive(Clone, Copy)]
pub struct RunConfig {
    pub attacker_core: usize,
    pub warmup_accesses: u64,
    pub epochs: usize,
    pub accesses_per_epoch: u64,
    pub victim_iterations: u64,
}

/// One experiment's raw material: the attacker's per-epoch timestamps and,
/// when victims ran, the start/end timestamp pair of each bank window.
pub struct RunOutput {
    pub timestamps: Box<[u64]>,
    pub windows: Vec<(u64, u64)>,
}

/// Time a long chase of every ring from `core` and return the index of the
/// attacker's local slice (minimum total time), or the farthest slice when
/// asked. Runs in a spawned thread so pinning does not stick to the caller.
pub fn profile_slices(rings: &[Ring], core: usize, prefer_farthest: bool) -> Result<usize, Error> {
    let rings = rings.to_vec();

    let profiler = thread::spawn(move || -> Result<usize, Error> {
        pin_to_core(core)?;
        let timer = TscTimer::new();

        let mut best: Option<(usize, u64)> = None;
        for (index, ring) in rings.iter().enumerate() {
            let t0 = timer.timestamp();
            let end = unsafe { ring.traverse(PROFILE_ITERATIONS) };
            let t1 = timer.timestamp();
            black_box(end);

            let total = t1.wrapping_sub(t0);
            let better = match best {
                None => true,
                Some((_, t)) if prefer_farthest => total > t,
                Some((_, t)) => total < t,
            };
            if better {
                best = Some((index, total));
            }
        }

        let (slice, total) = best.expect("no rings to profile");
        println!(
            "Found closest eviction set {} for attacker. Average access time: {:.2}",
            slice,
            total as f64 / PROFILE_ITERATIONS as f64
        );
        Ok(slice)
    });

    profiler.join().expect("slice profiler thread panicked")
}

/// Run one experiment: start the pinned attacker, then, if `victims > 0`,
/// flood each victim ring in turn with `victims` threads, bracketing every
/// flood with a timestamp pair.
pub fn run(
    attacker_ring: Ring,
    victim_rings: &[Ring],
    victims: usize,
    config: RunConfig,
) -> Result<RunOutput, Error> {
    let attacker = thread::spawn(move || -> Result<Box<[u64]>, Error> {
        pin_to_core(config.attacker_core)?;
        let timer = TscTimer::new();

        // The timestamp buffer lives on the heap; at millions of epochs it
        // does not fit a thread stack.
        let mut timestamps = vec![0u64; config.epochs].into_boxed_slice();

        unsafe {
            black_box(attacker_ring.traverse(config.warmup_accesses));

            // The timed loop performs no syscalls and no allocation; each
            // epoch ends with one serialized timestamp.
            for slot in timestamps.iter_mut() {
                black_box(attacker_ring.traverse(config.accesses_per_epoch));
                *slot = timer.timestamp();
            }
        }

        println!("Attacker finished");
        Ok(timestamps)
    });

    // Let the attacker get through its warmup before any victim runs.
    thread::sleep(WARMUP_SLEEP);

    let mut windows = Vec::new();
    if victims > 0 {
        let timer = TscTimer::new();

        for &ring in victim_rings {
            thread::sleep(BANK_SLEEP);
            let start = timer.timestamp();

            let floods: Vec<_> = (0..victims)
                .map(|_| {
                    thread::spawn(move || unsafe {
                        black_box(ring.traverse(config.victim_iterations));
                    })
                })
                .collect();
            for flood in floods {
                flood.join().expect("victim thread panicked");
            }

            let end = timer.timestamp();
            windows.push((start, end));
        }

        println!("Victim(s) done");
    }

    let timestamps = attacker.join().expect("attacker thread panicked")?;
    Ok(RunOutput { timestamps, windows })
}
