//! Weak handle table for external references.
//!
//! Each region owns a slot table of `(epoch, target)` pairs. A handle keeps
//! the slot index plus the epoch observed at creation; invalidating or
//! reusing a slot bumps the epoch, so a stale handle can never resolve to a
//! different object (no ABA on slot reuse).

use std::ptr;

use crate::object::{Obj, Object};
use crate::region::Region;

/// Weak handle to an object inside a region.
///
/// Valid only while the source region is alive and the slot has not been
/// invalidated by a collection that freed the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalRef {
    pub(crate) region: *mut Region,
    pub(crate) index: u32,
    pub(crate) epoch: u32,
}

#[derive(Debug)]
struct Slot {
    epoch: u32,
    target: *mut Object,
}

pub(crate) struct ExternalRefTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl ExternalRefTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
        }
    }

    /// Reserves a slot for `o` and returns `(index, epoch)`.
    pub(crate) fn create(&mut self, o: Obj) -> (u32, u32) {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.target.is_null());
            slot.target = o.as_ptr();
            (index, slot.epoch)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                epoch: 0,
                target: o.as_ptr(),
            });
            (index, 0)
        }
    }

    pub(crate) fn resolve(&self, index: u32, epoch: u32) -> Option<Obj> {
        let slot = self.slots.get(index as usize)?;
        if slot.epoch != epoch || slot.target.is_null() {
            return None;
        }
        // SAFETY: a non-null target in a live-epoch slot is a live object;
        // collections clear the slot before freeing the target.
        Some(unsafe { Obj::from_raw(slot.target) })
    }

    /// Clears every slot pointing at `o`. Called before `o`'s memory is
    /// returned to the heap.
    pub(crate) fn invalidate_target(&mut self, o: Obj) {
        let target = o.as_ptr();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.target == target {
                slot.target = ptr::null_mut();
                slot.epoch = slot.epoch.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
    }

    pub(crate) fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{trace_nothing, Descriptor, DescriptorFlags};
    use crate::object::{alloc_object, dealloc_object};

    static LEAF: Descriptor = Descriptor {
        size: 8,
        align: 8,
        trace: trace_nothing,
        finalize: None,
        flags: DescriptorFlags::empty(),
    };

    #[test]
    fn create_and_resolve() {
        let o = alloc_object(&LEAF, ptr::null_mut());
        let mut table = ExternalRefTable::new(4);
        let (index, epoch) = table.create(o);
        assert_eq!(table.resolve(index, epoch), Some(o));
        assert_eq!(table.live_count(), 1);
        unsafe { dealloc_object(o) };
    }

    #[test]
    fn invalidation_clears_all_slots_for_target() {
        let o = alloc_object(&LEAF, ptr::null_mut());
        let mut table = ExternalRefTable::new(4);
        let (i1, e1) = table.create(o);
        let (i2, e2) = table.create(o);
        table.invalidate_target(o);
        assert_eq!(table.resolve(i1, e1), None);
        assert_eq!(table.resolve(i2, e2), None);
        assert_eq!(table.live_count(), 0);
        unsafe { dealloc_object(o) };
    }

    #[test]
    fn stale_handle_does_not_see_reused_slot() {
        let a = alloc_object(&LEAF, ptr::null_mut());
        let b = alloc_object(&LEAF, ptr::null_mut());
        let mut table = ExternalRefTable::new(4);
        let (index, epoch) = table.create(a);
        table.invalidate_target(a);

        // The freed slot is reused for a different object.
        let (index2, epoch2) = table.create(b);
        assert_eq!(index2, index);
        assert_ne!(epoch2, epoch);

        assert_eq!(table.resolve(index, epoch), None);
        assert_eq!(table.resolve(index2, epoch2), Some(b));
        unsafe {
            dealloc_object(a);
            dealloc_object(b);
        }
    }
}
