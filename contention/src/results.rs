//! Bucketing of the attacker timestamp stream and the output-file formats.
//!
//! Two files per victim-thread count, line-oriented decimal integers:
//!
//! * `constant_access_times_<v>_threads.txt`: the epoch count minus one,
//!   then every epoch delta in order.
//! * `per_bank_access_times_<v>_threads.txt`: with no victims, identical to
//!   the constant file; otherwise, per bank, the number of attacker epochs
//!   that fell inside the bank's window followed by their deltas.

use crate::harness::RunOutput;
use std::fs::File;
use std::io::{self, BufWriter, Write};

/// Bucket the attacker's epoch deltas by bank window. Epoch `i` (for
/// `i >= 1`) carries the delta `t[i] - t[i-1]` and belongs to the window
/// containing `t[i]`. Timestamps and windows are both walked monotonically.
///
/// Returns the per-bank delta lists and the number of windows cut short
/// because the attacker ran out of epochs first; the caller is expected to
/// report any truncation rather than read past the stream.
pub fn split_into_banks(timestamps: &[u64], windows: &[(u64, u64)]) -> (Vec<Vec<u64>>, usize) {
    let mut banks = Vec::with_capacity(windows.len());
    let mut truncated = 0;
    let mut i = 1;

    for &(start, end) in windows {
        while i < timestamps.len() && timestamps[i] < start {
            i += 1;
        }

        let mut deltas = Vec::new();
        while i < timestamps.len() && timestamps[i] < end {
            deltas.push(timestamps[i] - timestamps[i - 1]);
            i += 1;
        }

        if i == timestamps.len() {
            truncated += 1;
        }
        banks.push(deltas);
    }

    (banks, truncated)
}

/// Mean per-access latency across the whole timed phase.
pub fn average_access_time(timestamps: &[u64], accesses_per_epoch: u64) -> f64 {
    if timestamps.len() < 2 {
        return 0.0;
    }
    let total = timestamps[timestamps.len() - 1].wrapping_sub(timestamps[0]) as f64;
    total / ((timestamps.len() - 1) as f64 * accesses_per_epoch as f64)
}

pub fn write_constant_file(path: &str, timestamps: &[u64]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "{}", timestamps.len() - 1)?;
    for i in 1..timestamps.len() {
        writeln!(out, "{}", timestamps[i] - timestamps[i - 1])?;
    }
    out.flush()
}

pub fn write_per_bank_file(path: &str, banks: &[Vec<u64>]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for deltas in banks {
        writeln!(out, "{}", deltas.len())?;
        for delta in deltas {
            writeln!(out, "{}", delta)?;
        }
    }
    out.flush()
}

/// Write the two result files for one victim-thread count.
pub fn emit(victims: usize, run: &RunOutput) -> io::Result<()> {
    let constant = format!("constant_access_times_{}_threads.txt", victims);
    let per_bank = format!("per_bank_access_times_{}_threads.txt", victims);

    println!("Start writing to files");
    write_constant_file(&constant, &run.timestamps)?;

    if victims == 0 {
        // No bank windows; the per-bank stream degenerates to the constant
        // one.
        write_constant_file(&per_bank, &run.timestamps)?;
    } else {
        let (banks, truncated) = split_into_banks(&run.timestamps, &run.windows);
        if truncated > 0 {
            eprintln!(
                "[!] attacker finished before {} bank window(s) closed; results truncated",
                truncated
            );
        }
        write_per_bank_file(&per_bank, &banks)?;
    }

    println!("Finish writing to files");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("contention_test_{}_{}", std::process::id(), name))
    }

    #[test]
    fn deltas_land_in_their_windows() {
        // Epochs every 10 ticks from 100; two windows with a gap between.
        let timestamps: Vec<u64> = (0..20).map(|i| 100 + 10 * i).collect();
        let windows = [(120, 150), (200, 240)];

        let (banks, truncated) = split_into_banks(&timestamps, &windows);
        assert_eq!(truncated, 0);
        assert_eq!(banks.len(), 2);
        // Timestamps 120, 130, 140 fall in the first window.
        assert_eq!(banks[0], vec![10, 10, 10]);
        // Timestamps 200..=230 fall in the second.
        assert_eq!(banks[1], vec![10, 10, 10, 10]);
    }

    #[test]
    fn epoch_zero_carries_no_delta() {
        let timestamps = [100u64, 110, 120];
        // A window opening before the first timestamp cannot claim it.
        let (banks, _) = split_into_banks(&timestamps, &[(0, 115)]);
        assert_eq!(banks[0], vec![10]);
    }

    #[test]
    fn bank_counts_never_exceed_available_epochs() {
        let timestamps: Vec<u64> = (0..10).map(|i| 100 + 10 * i).collect();
        let windows = [(100, 500), (500, 900)];

        let (banks, truncated) = split_into_banks(&timestamps, &windows);
        let total: usize = banks.iter().map(|b| b.len()).sum();
        assert!(total <= timestamps.len() - 1);
        // The stream ends inside the first window; both are reported short.
        assert_eq!(truncated, 2);
        assert!(banks[1].is_empty());
    }

    #[test]
    fn windows_after_the_stream_are_empty_not_read_past() {
        let timestamps = [100u64, 110];
        let (banks, truncated) = split_into_banks(&timestamps, &[(1000, 2000)]);
        assert_eq!(banks, vec![Vec::<u64>::new()]);
        assert_eq!(truncated, 1);
    }

    #[test]
    fn constant_file_has_header_then_deltas() {
        let path = temp_path("constant.txt");
        let timestamps = [100u64, 130, 190, 200];
        write_constant_file(path.to_str().unwrap(), &timestamps).unwrap();

        let body = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines, vec!["3", "30", "60", "10"]);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn per_bank_file_interleaves_counts_and_deltas() {
        let path = temp_path("per_bank.txt");
        let banks = vec![vec![5u64, 7], vec![], vec![9]];
        write_per_bank_file(path.to_str().unwrap(), &banks).unwrap();

        let body = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines, vec!["2", "5", "7", "0", "1", "9"]);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn zero_victims_writes_identical_files() {
        let constant = temp_path("same_constant.txt");
        let per_bank = temp_path("same_per_bank.txt");
        let timestamps = [10u64, 25, 45, 50, 90];

        write_constant_file(constant.to_str().unwrap(), &timestamps).unwrap();
        write_constant_file(per_bank.to_str().unwrap(), &timestamps).unwrap();

        assert_eq!(
            fs::read_to_string(&constant).unwrap(),
            fs::read_to_string(&per_bank).unwrap()
        );
        fs::remove_file(&constant).unwrap();
        fs::remove_file(&per_bank).unwrap();
    }

    #[test]
    fn average_access_time_uses_the_whole_span() {
        // 4 epochs of 100 accesses spanning 3000 cycles.
        let timestamps = [0u64, 1000, 2000, 3000];
        assert_eq!(average_access_time(&timestamps, 100), 10.0);
        assert_eq!(average_access_time(&[42], 100), 0.0);
    }
}
