//! Per-region remembered set.
//!
//! Records objects outside the region that the region references. The set
//! only pins bookkeeping, not lifetime; it is merged into the surviving
//! region on `merge` and dropped with the region on physical release.

use std::collections::HashSet;

use ahash::RandomState;

use crate::object::Obj;

pub(crate) struct RememberedSet {
    entries: HashSet<Obj, RandomState>,
}

impl RememberedSet {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashSet::with_hasher(RandomState::new()),
        }
    }

    /// Returns true if the object was not already remembered.
    pub(crate) fn insert(&mut self, o: Obj) -> bool {
        self.entries.insert(o)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, o: Obj) -> bool {
        self.entries.contains(&o)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn merge(&mut self, other: &mut RememberedSet) {
        self.entries.extend(other.entries.drain());
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
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
    fn insert_is_idempotent() {
        let o = alloc_object(&LEAF, std::ptr::null_mut());
        let mut set = RememberedSet::new();
        assert!(set.insert(o));
        assert!(!set.insert(o));
        assert_eq!(set.len(), 1);
        assert!(set.contains(o));
        unsafe { dealloc_object(o) };
    }

    #[test]
    fn merge_moves_entries() {
        let a = alloc_object(&LEAF, std::ptr::null_mut());
        let b = alloc_object(&LEAF, std::ptr::null_mut());
        let mut left = RememberedSet::new();
        let mut right = RememberedSet::new();
        left.insert(a);
        right.insert(a);
        right.insert(b);
        left.merge(&mut right);
        assert_eq!(left.len(), 2);
        assert_eq!(right.len(), 0);
        unsafe {
            dealloc_object(a);
            dealloc_object(b);
        }
    }
}
