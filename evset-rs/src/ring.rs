//! Intrusive rings of [`Node`]s.
//!
//! Every node belongs to exactly one closed doubly-linked ring at a time,
//! identified purely by its neighbor pointers. A [`Ring`] is a non-owning
//! handle to any one member; moving nodes between rings is pointer surgery
//! only, with no allocation and no external membership bookkeeping.

use crate::node::Node;
use core::ptr;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Non-owning handle to one member of a closed ring.
///
/// Handles stay valid while the backing region lives and the node is not
/// moved to another ring. They may be copied freely across threads once
/// construction is done; the measurement phase only ever reads the links.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ring {
    head: *mut Node,
}

unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    /// Wrap an existing ring member.
    ///
    /// # Safety
    /// `node` must be a member of a well-formed closed ring.
    pub unsafe fn with_head(node: *mut Node) -> Self {
        Self { head: node }
    }

    /// Close `node` onto itself as a one-element ring.
    ///
    /// # Safety
    /// `node` must not be a member of any other ring.
    pub unsafe fn singleton(node: *mut Node) -> Self {
        (*node).next = node;
        (*node).prev = node;
        Self { head: node }
    }

    pub fn head(&self) -> *mut Node {
        self.head
    }

    /// Number of members, counted by a full traversal.
    ///
    /// # Safety
    /// The ring must be well-formed.
    pub unsafe fn len(&self) -> usize {
        let mut n = 1;
        let mut cur = (*self.head).next;
        while cur != self.head {
            cur = (*cur).next;
            n += 1;
        }
        n
    }

    /// Splice `node` in just before the handle node.
    ///
    /// # Safety
    /// `node` must not currently be a member of any ring.
    pub unsafe fn push(&mut self, node: *mut Node) {
        let head = self.head;
        let tail = (*head).prev;
        (*node).next = head;
        (*node).prev = tail;
        (*tail).next = node;
        (*head).prev = node;
    }

    /// Permanently unsplice `node`, returning its former successor. The
    /// handle moves along if it pointed at `node`.
    ///
    /// # Safety
    /// `node` must be a member of this ring and not its only member.
    pub unsafe fn remove(&mut self, node: *mut Node) -> *mut Node {
        debug_assert!((*node).next != node);
        let next = (*node).next;
        let prev = (*node).prev;
        (*next).prev = prev;
        (*prev).next = next;
        if self.head == node {
            self.head = next;
        }
        next
    }

    /// Pointer-chase `steps` links forward from the handle, returning the
    /// final node. Every step is a volatile load of the `next` field, which
    /// is both the measured memory access and what keeps the compiler from
    /// eliding or reordering the loop.
    #[inline(always)]
    pub unsafe fn traverse(&self, steps: u64) -> *const Node {
        let mut cur = self.head as *const Node;
        for _ in 0..steps {
            cur = ptr::read_volatile(ptr::addr_of!((*cur).next)) as *const Node;
        }
        cur
    }

    /// Snapshot of the member pointers in ring order, starting at the handle.
    ///
    /// # Safety
    /// The ring must be well-formed.
    pub unsafe fn nodes(&self) -> Vec<*mut Node> {
        let mut out = vec![self.head];
        let mut cur = (*self.head).next;
        while cur != self.head {
            out.push(cur);
            cur = (*cur).next;
        }
        out
    }

    /// True when every member satisfies `next.prev == self` and
    /// `prev.next == self`.
    ///
    /// # Safety
    /// Following `next` from the handle must eventually return to it.
    pub unsafe fn is_closed(&self) -> bool {
        let mut cur = self.head;
        loop {
            let next = (*cur).next;
            if (*next).prev != cur || (*(*cur).prev).next != cur {
                return false;
            }
            cur = next;
            if cur == self.head {
                return true;
            }
        }
    }
}

/// Bypass `node` in its ring without touching `node`'s own links, so that
/// [`restore`] can splice it back into the exact same position.
///
/// # Safety
/// `node` must be a member of a ring with at least two other members, and no
/// other surgery may touch its neighbors before the matching [`restore`].
pub unsafe fn detach(node: *mut Node) {
    (*(*node).prev).next = (*node).next;
    (*(*node).next).prev = (*node).prev;
}

/// Undo [`detach`] using the stale links still held by `node`.
///
/// # Safety
/// `node` must have been detached by [`detach`] and its neighbors untouched
/// since.
pub unsafe fn restore(node: *mut Node) {
    (*(*node).prev).next = node;
    (*(*node).next).prev = node;
}

/// Link `nodes` into one closed ring visiting every node exactly once, in a
/// uniformly random order drawn from `seed`.
///
/// A strided or sorted traversal would let the stream prefetcher pull each
/// line in ahead of the access being timed; a random visiting order defeats
/// it. The fixed seed keeps reruns measurement-for-measurement comparable.
pub fn randomized_ring(nodes: &[*mut Node], seed: u64) -> Ring {
    assert!(!nodes.is_empty());

    let mut order: Vec<*mut Node> = nodes.to_vec();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    unsafe {
        for i in 0..order.len() {
            let a = order[i];
            let b = order[(i + 1) % order.len()];
            (*a).next = b;
            (*b).prev = a;
        }
        Ring::with_head(order[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    fn arena(n: usize) -> Vec<Node> {
        (0..n).map(|_| Node::empty()).collect()
    }

    fn pointers(arena: &mut [Node]) -> Vec<*mut Node> {
        arena.iter_mut().map(|n| n as *mut Node).collect()
    }

    #[test]
    fn singleton_push_remove_roundtrip() {
        let mut arena = arena(4);
        let ptrs = pointers(&mut arena);
        unsafe {
            let mut ring = Ring::singleton(ptrs[0]);
            assert_eq!(ring.len(), 1);
            assert!(ring.is_closed());

            for &p in &ptrs[1..] {
                ring.push(p);
            }
            assert_eq!(ring.len(), 4);
            assert!(ring.is_closed());
            assert_eq!(ring.nodes(), ptrs);

            let next = ring.remove(ptrs[2]);
            assert_eq!(next, ptrs[3]);
            assert_eq!(ring.len(), 3);
            assert!(ring.is_closed());
            assert!(!ring.nodes().contains(&ptrs[2]));
        }
    }

    #[test]
    fn remove_advances_the_handle() {
        let mut arena = arena(3);
        let ptrs = pointers(&mut arena);
        unsafe {
            let mut ring = Ring::singleton(ptrs[0]);
            ring.push(ptrs[1]);
            ring.push(ptrs[2]);
            assert_eq!(ring.head(), ptrs[0]);
            ring.remove(ptrs[0]);
            assert_eq!(ring.head(), ptrs[1]);
            assert_eq!(ring.len(), 2);
        }
    }

    #[test]
    fn detach_restore_preserves_order() {
        let mut arena = arena(5);
        let ptrs = pointers(&mut arena);
        unsafe {
            let mut ring = Ring::singleton(ptrs[0]);
            for &p in &ptrs[1..] {
                ring.push(p);
            }
            let before = ring.nodes();

            detach(ptrs[2]);
            assert_eq!(ring.len(), 4);
            assert!(!ring.nodes().contains(&ptrs[2]));
            // The detached node still names its old neighbors.
            assert_eq!((*ptrs[2]).next, ptrs[3]);
            assert_eq!((*ptrs[2]).prev, ptrs[1]);

            restore(ptrs[2]);
            assert_eq!(ring.nodes(), before);
            assert!(ring.is_closed());
        }
    }

    #[test]
    fn traverse_follows_links() {
        let mut arena = arena(3);
        let ptrs = pointers(&mut arena);
        unsafe {
            let mut ring = Ring::singleton(ptrs[0]);
            ring.push(ptrs[1]);
            ring.push(ptrs[2]);
            assert_eq!(ring.traverse(0), ptrs[0] as *const Node);
            assert_eq!(ring.traverse(1), ptrs[1] as *const Node);
            assert_eq!(ring.traverse(3), ptrs[0] as *const Node);
            assert_eq!(ring.traverse(7), ptrs[1] as *const Node);
        }
    }

    #[test]
    fn randomized_ring_visits_every_node_once() {
        let mut arena = arena(64);
        let ptrs = pointers(&mut arena);
        let ring = randomized_ring(&ptrs, 0);
        unsafe {
            assert_eq!(ring.len(), 64);
            assert!(ring.is_closed());
            let mut seen = ring.nodes();
            seen.sort_unstable();
            let mut expected = ptrs.clone();
            expected.sort_unstable();
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn randomized_ring_is_deterministic_per_seed() {
        let mut arena = arena(32);
        let ptrs = pointers(&mut arena);

        let first = unsafe { randomized_ring(&ptrs, 0).nodes() };
        let again = unsafe { randomized_ring(&ptrs, 0).nodes() };
        assert_eq!(first, again);

        let other = unsafe { randomized_ring(&ptrs, 1).nodes() };
        assert_ne!(first, other);
    }

    #[test]
    fn randomized_ring_breaks_monotone_strides() {
        let mut arena = arena(256);
        let ptrs = pointers(&mut arena);
        let order = unsafe { randomized_ring(&ptrs, 0).nodes() };

        let diffs: Vec<i64> = order
            .windows(2)
            .map(|w| w[1] as i64 - w[0] as i64)
            .collect();
        let sign_changes = diffs
            .windows(2)
            .filter(|w| (w[0] > 0) != (w[1] > 0))
            .count();

        // A monotone chain has zero sign changes; a random permutation
        // alternates directions about two thirds of the time.
        assert!(
            sign_changes * 2 > diffs.len(),
            "only {} sign changes across {} diffs",
            sign_changes,
            diffs.len()
        );
    }
}
