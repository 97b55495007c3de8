//! Deferred reference counting with a trial-deletion cycle detector.
//!
//! Objects carry their count in the header status word. A decrement that
//! does not reach zero marks the object as a cycle candidate; candidates
//! live on an intrusive doubly-linked buffer so a later deallocation can
//! remove them in O(1) before the memory is returned (a stale buffer entry
//! would let the detector walk freed memory and over-collect).
//!
//! Cycle collection is Lins-style trial deletion. From each candidate the
//! detector colors the reachable subgraph Red while trial-decrementing
//! per-edge counts; any object whose count stays positive lands on a jump
//! stack and anchors the restore pass. Whatever is still Red with a zero
//! count afterwards is an unreachable cycle and is freed.

use crate::descriptor::Descriptor;
use crate::object::{
    self, alloc_object, dealloc_object, Color, Obj, ObjectList, ObjectStack,
};
use crate::region::RegionBase;

pub(crate) struct RcRegion {
    objects: ObjectList,
    bytes_used: usize,
    cand_head: *mut object::Object,
    cand_tail: *mut object::Object,
    alloc_total: u64,
    dealloc_total: u64,
}

impl RcRegion {
    pub(crate) fn new() -> Self {
        Self {
            objects: ObjectList::new(),
            bytes_used: 0,
            cand_head: std::ptr::null_mut(),
            cand_tail: std::ptr::null_mut(),
            alloc_total: 0,
            dealloc_total: 0,
        }
    }

    pub(crate) fn alloc(&mut self, desc: &'static Descriptor) -> Obj {
        let obj = alloc_object(desc, std::ptr::null_mut());
        obj.set_rc(1);
        obj.set_color(Color::Black);
        self.objects.push(obj);
        self.bytes_used += object::allocation_size(desc);
        self.alloc_total += 1;
        obj
    }

    pub(crate) fn debug_size(&self) -> usize {
        self.objects.len()
    }

    pub(crate) fn memory_used(&self) -> usize {
        self.bytes_used
    }

    pub(crate) fn allocation_totals(&self) -> (u64, u64) {
        (self.alloc_total, self.dealloc_total)
    }

    // ── Candidate buffer ──────────────────────────────────────────────

    fn push_candidate(&mut self, o: Obj) {
        debug_assert!(!o.in_buffer());
        debug_assert!(!o.descriptor().is_acyclic());
        o.set_in_buffer(true);
        o.set_cand_prev(self.cand_tail);
        o.set_cand_next(std::ptr::null_mut());
        if self.cand_tail.is_null() {
            self.cand_head = o.as_ptr();
        } else {
            // SAFETY: tail is a live buffer member.
            unsafe { Obj::from_raw(self.cand_tail) }.set_cand_next(o.as_ptr());
        }
        self.cand_tail = o.as_ptr();
    }

    pub(crate) fn remove_candidate(&mut self, o: Obj) {
        if !o.in_buffer() {
            return;
        }
        let prev = o.cand_prev();
        let next = o.cand_next();
        if prev.is_null() {
            self.cand_head = next;
        } else {
            // SAFETY: prev is a live buffer member.
            unsafe { Obj::from_raw(prev) }.set_cand_next(next);
        }
        if next.is_null() {
            self.cand_tail = prev;
        } else {
            // SAFETY: next is a live buffer member.
            unsafe { Obj::from_raw(next) }.set_cand_prev(prev);
        }
        o.set_cand_next(std::ptr::null_mut());
        o.set_cand_prev(std::ptr::null_mut());
        o.set_in_buffer(false);
    }

    fn pop_candidate(&mut self) -> Option<Obj> {
        if self.cand_head.is_null() {
            return None;
        }
        // SAFETY: head is a live buffer member.
        let o = unsafe { Obj::from_raw(self.cand_head) };
        self.remove_candidate(o);
        Some(o)
    }

    #[cfg(test)]
    fn candidate_count(&self) -> usize {
        let mut n = 0;
        let mut cur = self.cand_head;
        while !cur.is_null() {
            n += 1;
            // SAFETY: live buffer member.
            cur = unsafe { Obj::from_raw(cur) }.cand_next();
        }
        n
    }

    // ── Reference counting ────────────────────────────────────────────

    pub(crate) fn incref(&mut self, o: Obj) {
        o.set_rc(o.rc() + 1);
        if o.in_buffer() {
            self.remove_candidate(o);
        }
    }

    pub(crate) fn decref(&mut self, base: &RegionBase, o: Obj) {
        self.apply_decrefs(base, vec![o]);
    }

    /// Drops one reference from each object in `pending`, cascading through
    /// objects that reach a zero count. Iterative so arbitrarily deep
    /// ownership chains cannot overflow the stack.
    fn apply_decrefs(&mut self, base: &RegionBase, mut pending: Vec<Obj>) {
        let mut children = ObjectStack::new();
        while let Some(o) = pending.pop() {
            let rc = o.rc();
            debug_assert!(rc > 0, "decref of an object with no references");
            o.set_rc(rc - 1);
            if rc - 1 == 0 {
                self.free_object(base, o, &mut pending, &mut children);
            } else if !o.in_buffer() && !o.descriptor().is_acyclic() {
                // The object survived losing a reference; it may be the
                // entry into an unreachable cycle.
                self.push_candidate(o);
            }
        }
    }

    fn free_object(
        &mut self,
        base: &RegionBase,
        o: Obj,
        pending: &mut Vec<Obj>,
        children: &mut ObjectStack,
    ) {
        // A dead object must leave the candidate buffer before its memory
        // goes away.
        self.remove_candidate(o);
        if o.has_external() {
            // SAFETY: region held exclusively.
            unsafe { base.external_mut().invalidate_target(o) };
        }
        debug_assert!(children.is_empty());
        // SAFETY: o is live until dealloc below.
        unsafe { (o.descriptor().trace)(o, children) };
        if let Some(finalize) = o.descriptor().finalize {
            // SAFETY: as above.
            unsafe { finalize(o) };
        }
        while let Some(c) = children.pop() {
            // A self edge was already consumed by the drop to zero.
            if c != o {
                pending.push(c);
            }
        }
        self.objects.unlink(o);
        self.bytes_used -= object::allocation_size(o.descriptor());
        self.dealloc_total += 1;
        // SAFETY: unlinked from every list, never referenced again.
        unsafe { dealloc_object(o) };
    }

    // ── Cycle detection ───────────────────────────────────────────────

    pub(crate) fn collect_cycles(&mut self, base: &RegionBase) {
        let mut jump: Vec<Obj> = Vec::new();
        let mut collected = 0usize;
        while let Some(s) = self.pop_candidate() {
            debug_assert_eq!(s.color(), Color::Black);
            self.mark_red(s, &mut jump);
            if s.rc() > 0 {
                restore(s);
            } else {
                while let Some(j) = jump.pop() {
                    if j.color() == Color::Red && j.rc() > 0 {
                        restore(j);
                    }
                }
                if s.color() == Color::Red && s.rc() == 0 {
                    collected += self.collect_red(base, s);
                }
            }
            jump.clear();
        }
        tracing::trace!(target: "gc", collected, live = self.objects.len(), "cycle collection");
    }

    /// Trial-deletes the subgraph reachable from `s`: every edge into a
    /// neighbor decrements its count once, every visited object turns Red.
    /// Neighbors left with a positive count go on the jump stack.
    fn mark_red(&mut self, s: Obj, jump: &mut Vec<Obj>) {
        s.set_color(Color::Red);
        let mut work = vec![s];
        let mut scratch = ObjectStack::new();
        while let Some(o) = work.pop() {
            // SAFETY: o is live; the buffer never holds freed objects.
            unsafe { (o.descriptor().trace)(o, &mut scratch) };
            while let Some(c) = scratch.pop() {
                if c.descriptor().is_acyclic() {
                    continue;
                }
                let rc = c.rc();
                debug_assert!(rc > 0, "edge into an object with no references");
                c.set_rc(rc - 1);
                if c.color() != Color::Red {
                    c.set_color(Color::Red);
                    work.push(c);
                }
                if rc - 1 > 0 {
                    jump.push(c);
                }
            }
        }
    }

    /// Frees the still-Red, zero-count subgraph rooted at `s`. Returns the
    /// number of objects collected.
    fn collect_red(&mut self, base: &RegionBase, s: Obj) -> usize {
        // Phase 1: condemn the garbage subgraph.
        let mut garbage: Vec<Obj> = Vec::new();
        let mut work = vec![s];
        let mut scratch = ObjectStack::new();
        while let Some(g) = work.pop() {
            if g.color() != Color::Red || g.rc() != 0 {
                continue;
            }
            g.set_color(Color::White);
            garbage.push(g);
            // SAFETY: g is live until phase 3.
            unsafe { (g.descriptor().trace)(g, &mut scratch) };
            while let Some(c) = scratch.pop() {
                work.push(c);
            }
        }

        // Phase 2: settle edges out of the garbage while everything is
        // still readable. Survivors already absorbed the trial decrement;
        // acyclic neighbors were never touched and take a real decref.
        let mut acyclic_pending: Vec<Obj> = Vec::new();
        for &g in &garbage {
            // SAFETY: as above.
            unsafe { (g.descriptor().trace)(g, &mut scratch) };
            while let Some(c) = scratch.pop() {
                if c.color() == Color::White {
                    continue;
                }
                if c.descriptor().is_acyclic() {
                    acyclic_pending.push(c);
                } else {
                    debug_assert!(c.rc() > 0);
                    if !c.in_buffer() {
                        // A cycle only reachable through the freed garbage
                        // must become a candidate itself.
                        self.push_candidate(c);
                    }
                }
            }
        }

        // Phase 3: finalize, then free.
        for &g in &garbage {
            if let Some(finalize) = g.descriptor().finalize {
                // SAFETY: memory is returned below.
                unsafe { finalize(g) };
            }
        }
        for &g in &garbage {
            self.remove_candidate(g);
            if g.has_external() {
                // SAFETY: region held exclusively.
                unsafe { base.external_mut().invalidate_target(g) };
            }
            self.objects.unlink(g);
            self.bytes_used -= object::allocation_size(g.descriptor());
            self.dealloc_total += 1;
            // SAFETY: unlinked, never referenced again.
            unsafe { dealloc_object(g) };
        }

        if !acyclic_pending.is_empty() {
            self.apply_decrefs(base, acyclic_pending);
        }
        garbage.len()
    }

    /// Finalizes and frees every object. Used by physical release only.
    pub(crate) fn release_objects(&mut self) {
        for o in self.objects.iter() {
            if let Some(finalize) = o.descriptor().finalize {
                // SAFETY: o is live until dealloc below.
                unsafe { finalize(o) };
            }
            self.dealloc_total += 1;
            // SAFETY: the whole list dies here; the iterator has already
            // read the successor pointer.
            unsafe { dealloc_object(o) };
        }
        self.objects = ObjectList::new();
        self.bytes_used = 0;
        self.cand_head = std::ptr::null_mut();
        self.cand_tail = std::ptr::null_mut();
    }
}

/// Undoes a trial deletion: repaints the subgraph Black and re-increments
/// the counts its edges took away.
fn restore(o: Obj) {
    o.set_color(Color::Black);
    let mut work = vec![o];
    let mut scratch = ObjectStack::new();
    while let Some(x) = work.pop() {
        // SAFETY: x is live; restoration happens before anything is freed.
        unsafe { (x.descriptor().trace)(x, &mut scratch) };
        while let Some(c) = scratch.pop() {
            if c.descriptor().is_acyclic() {
                continue;
            }
            c.set_rc(c.rc() + 1);
            if c.color() == Color::Red {
                c.set_color(Color::Black);
                work.push(c);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionBase;
    use crate::testutil::{set_f1, set_f2, NODE2};
    use std::cell::Cell;

    fn test_env() -> (RegionBase, RcRegion) {
        let base = RegionBase::new_for_tests();
        let mut rc = RcRegion::new();
        let entry = rc.alloc(&NODE2);
        entry.set_iso(true);
        (base, rc)
    }

    fn entry_of(rc: &RcRegion) -> Obj {
        rc.objects.iter().next().unwrap()
    }

    #[test]
    fn decref_to_zero_frees_immediately() {
        let (base, mut rc) = test_env();
        let o = rc.alloc(&NODE2);
        assert_eq!(rc.debug_size(), 2);
        rc.decref(&base, o);
        assert_eq!(rc.debug_size(), 1);
        assert_eq!(rc.allocation_totals(), (2, 1));
    }

    #[test]
    fn cascading_decref_follows_edges() {
        let (base, mut rc) = test_env();
        let a = rc.alloc(&NODE2);
        let b = rc.alloc(&NODE2);
        let c = rc.alloc(&NODE2);
        set_f1(a, Some(b));
        set_f1(b, Some(c));
        rc.decref(&base, a);
        assert_eq!(rc.debug_size(), 1);
    }

    #[test]
    fn deep_chain_does_not_overflow_the_stack() {
        let (base, mut rc) = test_env();
        let head = rc.alloc(&NODE2);
        let mut cur = head;
        for _ in 0..100_000 {
            let next = rc.alloc(&NODE2);
            set_f1(cur, Some(next));
            cur = next;
        }
        rc.decref(&base, head);
        assert_eq!(rc.debug_size(), 1);
    }

    #[test]
    fn survivor_of_a_dropped_reference_becomes_candidate() {
        let (base, mut rc) = test_env();
        let o = rc.alloc(&NODE2);
        rc.incref(o);
        rc.decref(&base, o);
        assert!(o.in_buffer());
        assert_eq!(rc.candidate_count(), 1);

        // incref clears the suspicion.
        rc.incref(o);
        assert!(!o.in_buffer());
        assert_eq!(rc.candidate_count(), 0);
        rc.decref(&base, o);
        rc.decref(&base, o);
        assert_eq!(rc.debug_size(), 1);
    }

    #[test]
    fn self_cycle_is_collected() {
        let (base, mut rc) = test_env();
        let o1 = rc.alloc(&NODE2);
        set_f1(o1, Some(o1));
        rc.incref(o1);
        rc.decref(&base, o1);
        assert_eq!(rc.debug_size(), 2);
        rc.collect_cycles(&base);
        assert_eq!(rc.debug_size(), 1);
    }

    #[test]
    fn diamond_cycle_is_collected() {
        let (base, mut rc) = test_env();
        let o1 = rc.alloc(&NODE2);
        let o2 = rc.alloc(&NODE2);
        let o3 = rc.alloc(&NODE2);
        let o4 = rc.alloc(&NODE2);

        set_f1(o1, Some(o2));
        set_f2(o1, Some(o3));
        set_f1(o2, Some(o4));
        set_f1(o3, Some(o4));
        rc.incref(o4);
        set_f1(o4, Some(o1));

        rc.incref(o1);
        rc.decref(&base, o1);

        assert_eq!(rc.debug_size(), 5);
        rc.collect_cycles(&base);
        assert_eq!(rc.debug_size(), 1);
    }

    #[test]
    fn multiple_disconnected_cycles_are_collected() {
        let (base, mut rc) = test_env();
        for _ in 0..3 {
            let a = rc.alloc(&NODE2);
            let b = rc.alloc(&NODE2);
            set_f1(a, Some(b));
            set_f1(b, Some(a));
            rc.incref(a);
            rc.decref(&base, a);
        }
        assert_eq!(rc.debug_size(), 7);
        rc.collect_cycles(&base);
        assert_eq!(rc.debug_size(), 1);
    }

    #[test]
    fn deep_cycle_is_collected_iteratively() {
        let (base, mut rc) = test_env();
        let head = rc.alloc(&NODE2);
        let mut cur = head;
        for _ in 0..50_000 {
            let next = rc.alloc(&NODE2);
            set_f1(cur, Some(next));
            cur = next;
        }
        set_f1(cur, Some(head));
        rc.incref(head);
        rc.decref(&base, head);
        rc.collect_cycles(&base);
        assert_eq!(rc.debug_size(), 1);
    }

    /// An object freed by a plain decref must leave the candidate buffer,
    /// otherwise the detector walks freed memory and over-collects its
    /// still-live neighbor.
    ///
    /// Graph: entry holds two references to n1; n1 -> n2.
    #[test]
    fn dealloc_removes_candidate_buffer_entry() {
        let (base, mut rc) = test_env();
        let entry = entry_of(&rc);
        let n1 = rc.alloc(&NODE2);
        let n2 = rc.alloc(&NODE2);

        set_f1(entry, Some(n1));
        set_f2(entry, Some(n1));
        rc.incref(n1);
        set_f1(n1, Some(n2));

        // Drop entry.f1; n1 keeps one reference and turns candidate.
        set_f1(entry, None);
        rc.decref(&base, n1);
        assert!(n1.in_buffer());

        // Retarget entry.f2 from n1 to n2, dropping the last n1 reference.
        set_f2(entry, Some(n2));
        rc.incref(n2);
        rc.decref(&base, n1);

        assert_eq!(rc.debug_size(), 2);
        rc.collect_cycles(&base);
        // n2 is still referenced by the entry and must survive.
        assert_eq!(rc.debug_size(), 2);
    }

    /// A cycle whose only external reference dies with a cascading decref
    /// must be picked up by the next cycle collection.
    ///
    /// Graph: entry -> n1 -> n2 <-> n3.
    #[test]
    fn distant_cycle_is_collected() {
        let (base, mut rc) = test_env();
        let entry = entry_of(&rc);
        let n1 = rc.alloc(&NODE2);
        let n2 = rc.alloc(&NODE2);
        let n3 = rc.alloc(&NODE2);

        set_f1(entry, Some(n1));
        set_f1(n1, Some(n2));
        set_f1(n2, Some(n3));
        set_f1(n3, Some(n2));
        rc.incref(n2);

        set_f1(entry, None);
        rc.decref(&base, n1);
        assert_eq!(rc.debug_size(), 3);

        rc.collect_cycles(&base);
        assert_eq!(rc.debug_size(), 1);
    }

    #[test]
    fn acyclic_descriptors_are_never_candidates() {
        thread_local! {
            static FINALIZED: Cell<usize> = const { Cell::new(0) };
        }
        unsafe fn count_finalize(_o: Obj) {
            FINALIZED.with(|c| c.set(c.get() + 1));
        }
        static LEAF: Descriptor = Descriptor {
            size: 16,
            align: 8,
            trace: crate::descriptor::trace_nothing,
            finalize: Some(count_finalize),
            flags: crate::descriptor::DescriptorFlags::ACYCLIC,
        };

        let (base, mut rc) = test_env();
        let o = rc.alloc(&LEAF);
        rc.incref(o);
        rc.decref(&base, o);
        assert!(!o.in_buffer());
        assert_eq!(rc.candidate_count(), 0);

        rc.decref(&base, o);
        assert_eq!(FINALIZED.with(Cell::get), 1);
        assert_eq!(rc.debug_size(), 1);
    }

    #[test]
    fn finalizer_runs_exactly_once_per_object() {
        thread_local! {
            static FINALIZED: Cell<usize> = const { Cell::new(0) };
        }
        unsafe fn count_finalize(o: Obj) {
            let _ = o;
            FINALIZED.with(|c| c.set(c.get() + 1));
        }
        static COUNTED: Descriptor = Descriptor {
            size: 16,
            align: 8,
            trace: crate::testutil::trace_node2,
            finalize: Some(count_finalize),
            flags: crate::descriptor::DescriptorFlags::empty(),
        };

        let (base, mut rc) = test_env();
        let a = rc.alloc(&COUNTED);
        let b = rc.alloc(&COUNTED);
        set_f1(a, Some(b));
        set_f1(b, Some(a));
        rc.incref(a);
        rc.decref(&base, a);
        rc.collect_cycles(&base);
        assert_eq!(FINALIZED.with(Cell::get), 2);
        assert_eq!(rc.debug_size(), 1);
    }
}
