//! The backing region: one mapping of cache-line nodes, at least twice the
//! LLC, from which candidate lines for a target set are harvested.

use crate::error::Error;
use crate::geometry::CacheGeometry;
use crate::node::Node;
use mmap_rs::{MmapMut, MmapOptions};

pub struct Region {
    map: MmapMut,
    base: *mut Node,
    nodes: usize,
}

impl Region {
    /// Map `size` bytes and fault every page in. The mapping is page-aligned
    /// and therefore line-aligned.
    ///
    /// Transparent huge pages are requested so that the set-index bits of
    /// every node fall inside the page offset; actually providing them is the
    /// host's job (THP or a hugetlbfs preload). Without huge pages the
    /// address-based candidate filter is unsound, which the candidate oracle
    /// catches at build time.
    pub fn new(size: usize) -> Self {
        let mut map = MmapOptions::new(size)
            .map_mut()
            .expect("failed to map backing region");

        #[cfg(target_os = "linux")]
        unsafe {
            libc::madvise(
                map.as_mut_ptr() as *mut libc::c_void,
                map.len(),
                libc::MADV_HUGEPAGE,
            );
        }

        // Write every byte so the pages are actually allocated.
        map.fill(0x01);

        let base = map.as_mut_ptr() as *mut Node;
        let nodes = size / core::mem::size_of::<Node>();
        Self { map, base, nodes }
    }

    pub fn size_bytes(&self) -> usize {
        self.map.len()
    }

    /// Number of nodes the region holds.
    pub fn len(&self) -> usize {
        self.nodes
    }

    pub fn node(&self, index: usize) -> *mut Node {
        debug_assert!(index < self.nodes);
        unsafe { self.base.add(index) }
    }

    /// Every line-aligned node whose address bits select `set_index`, in
    /// address order.
    pub fn candidates(
        &self,
        geometry: &CacheGeometry,
        set_index: usize,
    ) -> Result<Vec<*mut Node>, Error> {
        assert!(set_index < geometry.sets);

        let mut found = Vec::new();
        for i in 0..self.nodes {
            let node = self.node(i);
            let addr = node as usize;
            assert_eq!(addr & (geometry.line_size - 1), 0);
            if geometry.set_index_of(addr) == set_index {
                found.push(node);
            }
        }

        // A conflict set needs slices * ways nodes and the partition step
        // needs witnesses on top, so demand twice that.
        let needed = 2 * geometry.conflict_set_size();
        if found.len() < needed {
            return Err(Error::InsufficientCandidates {
                found: found.len(),
                needed,
            });
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KB;

    // Small enough to exercise in a test, index bits inside a 4 KiB page.
    const TINY: CacheGeometry = CacheGeometry {
        line_size: 64,
        slices: 2,
        ways: 4,
        sets: 16,
        region_size: 16 * KB,
    };

    #[test]
    fn candidates_all_map_to_the_requested_set() {
        let region = Region::new(TINY.region_size);
        for set in [0, 7, 15] {
            let candidates = region.candidates(&TINY, set).unwrap();
            // 256 nodes spread over 16 sets.
            assert_eq!(candidates.len(), 16);
            for node in candidates {
                assert_eq!(TINY.set_index_of(node as usize), set);
            }
        }
    }

    #[test]
    fn candidates_are_distinct_lines() {
        let region = Region::new(TINY.region_size);
        let candidates = region.candidates(&TINY, 3).unwrap();
        let mut addrs: Vec<usize> = candidates.iter().map(|n| *n as usize).collect();
        addrs.dedup();
        assert_eq!(addrs.len(), 16);
        for pair in addrs.windows(2) {
            // Same set recurs once per set stride.
            assert_eq!(pair[1] - pair[0], TINY.sets * TINY.line_size);
        }
    }

    #[test]
    fn undersized_region_is_rejected() {
        let region = Region::new(8 * KB);
        match region.candidates(&TINY, 0) {
            Err(Error::InsufficientCandidates { found, needed }) => {
                assert_eq!(found, 8);
                assert_eq!(needed, 16);
            }
            other => panic!("expected InsufficientCandidates, got {:?}", other.map(|v| v.len())),
        }
    }
}
