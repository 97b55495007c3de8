//! Trace strategy: classical mark-sweep over the region's object list.
//!
//! Marking is color-based: White objects are unvisited, Gray objects sit on
//! the worklist, Black objects are done. The sweep frees every object left
//! White, running its finalizer and invalidating any external-reference
//! slots before the memory is returned, then resets survivors to White.

use crate::descriptor::Descriptor;
use crate::object::{
    self, alloc_object, dealloc_object, Color, Obj, ObjectList, ObjectStack,
};
use crate::region::RegionBase;

pub(crate) struct TraceRegion {
    objects: ObjectList,
    bytes_used: usize,
    /// Set by `freeze`; a frozen region is an immutable RC graph and
    /// rejects further allocation and collection.
    pub(crate) frozen: bool,
}

impl TraceRegion {
    pub(crate) fn new() -> Self {
        Self {
            objects: ObjectList::new(),
            bytes_used: 0,
            frozen: false,
        }
    }

    pub(crate) fn alloc(&mut self, desc: &'static Descriptor) -> Obj {
        assert!(!self.frozen, "cannot allocate in a frozen region");
        let obj = alloc_object(desc, std::ptr::null_mut());
        self.objects.push(obj);
        self.bytes_used += object::allocation_size(desc);
        obj
    }

    pub(crate) fn objects(&mut self) -> &mut ObjectList {
        &mut self.objects
    }

    pub(crate) fn debug_size(&self) -> usize {
        self.objects.len()
    }

    pub(crate) fn memory_used(&self) -> usize {
        self.bytes_used
    }

    /// Marks everything reachable from `entry`, sweeps the rest.
    pub(crate) fn collect(&mut self, base: &RegionBase, entry: Obj) {
        assert!(!self.frozen, "cannot collect a frozen region");
        self.mark(entry);
        self.sweep_unreachable(base);
    }

    fn mark(&mut self, entry: Obj) {
        let mut worklist = ObjectStack::new();
        entry.set_color(Color::Gray);
        worklist.push(entry);
        while let Some(o) = worklist.pop() {
            if o.color() == Color::Black {
                continue;
            }
            o.set_color(Color::Black);
            // SAFETY: o is a live object of its descriptor's type.
            unsafe { (o.descriptor().trace)(o, &mut worklist) };
        }
    }

    /// Frees every object that the preceding mark left unvisited.
    pub(crate) fn sweep_unreachable(&mut self, base: &RegionBase) {
        let mut freed = 0usize;
        for o in self.objects.iter() {
            if o.color() == Color::Black {
                o.set_color(Color::White);
                continue;
            }
            if o.has_external() {
                // SAFETY: we hold the region exclusively during collection.
                unsafe { base.external_mut().invalidate_target(o) };
            }
            if let Some(finalize) = o.descriptor().finalize {
                // SAFETY: o is live until dealloc below.
                unsafe { finalize(o) };
            }
            self.bytes_used -= object::allocation_size(o.descriptor());
            self.objects.unlink(o);
            // SAFETY: unlinked and never referenced again.
            unsafe { dealloc_object(o) };
            freed += 1;
        }
        tracing::trace!(target: "gc", freed, live = self.objects.len(), "trace sweep");
    }

    pub(crate) fn absorb(&mut self, other: &mut TraceRegion) {
        self.bytes_used += other.bytes_used;
        other.bytes_used = 0;
        self.objects.append(&mut other.objects);
    }

    /// Finalizes and frees every object. Used by physical release only.
    pub(crate) fn release_objects(&mut self) {
        for o in self.objects.iter() {
            if let Some(finalize) = o.descriptor().finalize {
                // SAFETY: o is live until dealloc below.
                unsafe { finalize(o) };
            }
            // SAFETY: the whole list dies here; the iterator has already
            // read the successor pointer.
            unsafe { dealloc_object(o) };
        }
        self.objects = ObjectList::new();
        self.bytes_used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionBase;
    use crate::testutil::{f1, set_f1, set_f2, NODE2};

    fn test_base() -> RegionBase {
        RegionBase::new_for_tests()
    }

    /// Build the depth-2 binary tree from the pruning scenario: root plus
    /// two subtrees of three nodes each, seven objects total.
    fn build_tree(t: &mut TraceRegion) -> (Obj, Obj, Obj) {
        let root = t.alloc(&NODE2);
        let left = t.alloc(&NODE2);
        let right = t.alloc(&NODE2);
        set_f1(root, Some(left));
        set_f2(root, Some(right));
        for parent in [left, right] {
            let a = t.alloc(&NODE2);
            let b = t.alloc(&NODE2);
            set_f1(parent, Some(a));
            set_f2(parent, Some(b));
        }
        (root, left, right)
    }

    #[test]
    fn binary_tree_pruning() {
        let base = test_base();
        let mut t = TraceRegion::new();
        let (root, _, _) = build_tree(&mut t);
        assert_eq!(t.debug_size(), 7);

        set_f1(root, None);
        t.collect(&base, root);
        assert_eq!(t.debug_size(), 4);

        set_f2(root, None);
        t.collect(&base, root);
        assert_eq!(t.debug_size(), 1);
    }

    #[test]
    fn collect_is_idempotent() {
        let base = test_base();
        let mut t = TraceRegion::new();
        let (root, _, _) = build_tree(&mut t);
        set_f1(root, None);
        t.collect(&base, root);
        let after_first = t.debug_size();
        t.collect(&base, root);
        assert_eq!(t.debug_size(), after_first);
    }

    #[test]
    fn survivors_are_reset_to_white() {
        let base = test_base();
        let mut t = TraceRegion::new();
        let (root, left, _) = build_tree(&mut t);
        t.collect(&base, root);
        assert_eq!(root.color(), Color::White);
        assert_eq!(left.color(), Color::White);
    }

    #[test]
    fn cyclic_garbage_is_swept() {
        let base = test_base();
        let mut t = TraceRegion::new();
        let root = t.alloc(&NODE2);
        let a = t.alloc(&NODE2);
        let b = t.alloc(&NODE2);
        set_f1(a, Some(b));
        set_f1(b, Some(a));
        // The cycle is never referenced from the root.
        t.collect(&base, root);
        assert_eq!(t.debug_size(), 1);
    }

    #[test]
    fn absorb_joins_object_lists() {
        let base = test_base();
        let mut left = TraceRegion::new();
        let mut right = TraceRegion::new();
        let root = left.alloc(&NODE2);
        let keep = left.alloc(&NODE2);
        set_f1(root, Some(keep));
        let other_root = right.alloc(&NODE2);
        let other_child = right.alloc(&NODE2);
        set_f1(other_root, Some(other_child));

        let bytes = left.memory_used() + right.memory_used();
        left.absorb(&mut right);
        assert_eq!(left.debug_size(), 4);
        assert_eq!(left.memory_used(), bytes);
        assert_eq!(right.debug_size(), 0);

        // The merged graph is only kept alive through the root's edges.
        set_f2(root, Some(other_root));
        left.collect(&base, root);
        assert_eq!(left.debug_size(), 4);
        assert_eq!(f1(other_root), Some(other_child));
    }
}
