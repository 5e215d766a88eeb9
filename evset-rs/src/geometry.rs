//! Cache geometry and timing windows for the target part.

/// Set-associative LLC geometry plus the size of the backing region used to
/// harvest candidate lines.
///
/// `line_size` and `sets` must be powers of two; the set index of an address
/// is then a plain bit field above the line offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheGeometry {
    /// Bytes per cache line.
    pub line_size: usize,
    /// Number of LLC slices (banks) on the socket.
    pub slices: usize,
    /// Associativity of one slice.
    pub ways: usize,
    /// Sets per slice.
    pub sets: usize,
    /// Bytes of backing region to map; must be at least twice the LLC.
    pub region_size: usize,
}

impl CacheGeometry {
    pub const fn line_offset_bits(&self) -> u32 {
        self.line_size.trailing_zeros()
    }

    pub const fn set_index_bits(&self) -> u32 {
        self.sets.trailing_zeros()
    }

    /// The slice set selected by an address. Sound on virtual addresses only
    /// when the backing pages are large enough that all the index bits fall
    /// inside the page offset.
    pub const fn set_index_of(&self, addr: usize) -> usize {
        (addr >> self.line_offset_bits()) & (self.sets - 1)
    }

    /// One full set column across every slice.
    pub const fn conflict_set_size(&self) -> usize {
        self.slices * self.ways
    }

    pub const fn llc_size(&self) -> usize {
        self.slices * self.ways * self.sets * self.line_size
    }

    pub const fn region_nodes(&self) -> usize {
        self.region_size / self.line_size
    }
}

/// Empirical timing windows, in TSC cycles, for one part.
#[derive(Clone, Copy, Debug)]
pub struct LatencyProfile {
    /// A timed reload above this missed the LLC and went to DRAM.
    pub llc_threshold: u64,
    /// Probe latencies below this are discarded as implausible.
    pub probe_floor: u64,
    /// Probe latencies above this are discarded as implausible; context
    /// switches and interrupts land here.
    pub probe_ceiling: u64,
    /// Window for the average per-step latency of the candidate ring.
    pub dram_window: (u64, u64),
    /// Window for the average per-step latency of the conflict ring.
    pub llc_window: (u64, u64),
    /// Window for each per-slice eviction ring. Wider than `llc_window`
    /// because slice distance over the on-die interconnect varies.
    pub eviction_window: (u64, u64),
}

/// Intel Xeon E5-2650 v4 (Broadwell-EP): 30 MiB LLC organized as 12 slices,
/// 20 ways and 2048 sets per slice, 64-byte lines. The 64 MiB region gives
/// every set at least twice the candidates a conflict set needs.
pub const BROADWELL_EP: CacheGeometry = CacheGeometry {
    line_size: 64,
    slices: 12,
    ways: 20,
    sets: 2048,
    region_size: 64 * crate::MB,
};

/// Profiled on the same part: LLC hits average ~40 cycles, DRAM ~170-180.
pub const BROADWELL_EP_LATENCY: LatencyProfile = LatencyProfile {
    llc_threshold: 100,
    probe_floor: 20,
    probe_ceiling: 200,
    dram_window: (165, 190),
    llc_window: (30, 50),
    eviction_window: (25, 55),
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadwell_derived_values() {
        assert_eq!(BROADWELL_EP.line_offset_bits(), 6);
        assert_eq!(BROADWELL_EP.set_index_bits(), 11);
        assert_eq!(BROADWELL_EP.conflict_set_size(), 240);
        assert_eq!(BROADWELL_EP.llc_size(), 30 * crate::MB);
        assert_eq!(BROADWELL_EP.region_nodes(), 1 << 20);
        assert!(BROADWELL_EP.region_size >= 2 * BROADWELL_EP.llc_size());
    }

    #[test]
    fn set_index_ignores_line_offset_and_tag() {
        let geo = BROADWELL_EP;
        let addr = (1898 << 6) | 0x3f;
        assert_eq!(geo.set_index_of(addr), 1898);
        // Bits above the index field do not matter.
        assert_eq!(geo.set_index_of(addr | (1 << 40)), 1898);
        // One line below wraps to the previous set.
        assert_eq!(geo.set_index_of(1898 << 6).wrapping_sub(geo.set_index_of(1897 << 6)), 1);
    }

    #[test]
    fn set_index_wraps_per_slice() {
        let geo = BROADWELL_EP;
        // 2048 sets of 64 bytes repeat every 128 KiB.
        assert_eq!(geo.set_index_of(27 << 6), geo.set_index_of((27 << 6) + (geo.sets << 6)));
    }
}
