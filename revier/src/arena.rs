//! Arena strategy: bump allocation out of fixed-size slabs, bulk release.
//!
//! The arena never collects. Objects are placed back to back inside slabs
//! and only reclaimed when the region is physically released, at which
//! point finalizers run and the slabs go back to the heap in one sweep.

use std::alloc::Layout;
use std::ptr::{self, NonNull};

use crate::descriptor::Descriptor;
use crate::heap;
use crate::object::{self, Obj, Object};

#[repr(C)]
struct SlabHeader {
    next: *mut SlabHeader,
    used: usize,
}

const SLAB_HEADER_SIZE: usize = size_of::<SlabHeader>();
const SLAB_ALIGN: usize = 16;

pub(crate) struct ArenaRegion {
    /// Newest slab first; allocation always bumps into the head slab.
    slabs: *mut SlabHeader,
    slab_size: usize,
    object_count: usize,
    /// Total slab bytes held from the heap.
    bytes_used: usize,
}

impl ArenaRegion {
    pub(crate) fn new(slab_size: usize) -> Self {
        Self {
            slabs: ptr::null_mut(),
            slab_size,
            object_count: 0,
            bytes_used: 0,
        }
    }

    fn slab_layout(&self) -> Layout {
        Layout::from_size_align(self.slab_size, SLAB_ALIGN).expect("slab layout")
    }

    fn push_slab(&mut self) {
        let raw = heap::alloc(self.slab_layout()).as_ptr() as *mut SlabHeader;
        // SAFETY: fresh slab allocation.
        unsafe {
            ptr::write(
                raw,
                SlabHeader {
                    next: self.slabs,
                    used: SLAB_HEADER_SIZE,
                },
            );
        }
        self.slabs = raw;
        self.bytes_used += self.slab_size;
    }

    pub(crate) fn alloc(&mut self, desc: &'static Descriptor) -> Obj {
        let need = object::allocation_size(desc);
        assert!(
            SLAB_HEADER_SIZE + need <= self.slab_size,
            "object does not fit in an arena slab"
        );
        // SAFETY: head slab is live when non-null.
        if self.slabs.is_null()
            || unsafe { (*self.slabs).used } + need > self.slab_size
        {
            self.push_slab();
        }
        // SAFETY: head slab is live and has room for `need` bytes.
        let obj = unsafe {
            let slab = &mut *self.slabs;
            let raw = (self.slabs as *mut u8).add(slab.used);
            slab.used += need;
            object::init_object_at(raw, desc, ptr::null_mut())
        };
        self.object_count += 1;
        obj
    }

    /// Walks the slab chain, decoding object strides from descriptors.
    pub(crate) fn iter(&self) -> ArenaIter {
        ArenaIter {
            slab: self.slabs,
            cursor: SLAB_HEADER_SIZE,
        }
    }

    pub(crate) fn debug_size(&self) -> usize {
        let count = self.iter().count();
        debug_assert_eq!(count, self.object_count);
        count
    }

    pub(crate) fn memory_used(&self) -> usize {
        self.bytes_used
    }

    /// Splices `other`'s slab chain in front of ours; new allocations bump
    /// into `other`'s most recent slab.
    pub(crate) fn absorb(&mut self, other: &mut ArenaRegion) {
        debug_assert_eq!(self.slab_size, other.slab_size);
        if !other.slabs.is_null() {
            let mut tail = other.slabs;
            // SAFETY: walking a live slab chain.
            unsafe {
                while !(*tail).next.is_null() {
                    tail = (*tail).next;
                }
                (*tail).next = self.slabs;
            }
            self.slabs = other.slabs;
        }
        self.object_count += other.object_count;
        self.bytes_used += other.bytes_used;
        other.slabs = ptr::null_mut();
        other.object_count = 0;
        other.bytes_used = 0;
    }

    /// Finalizes every object, then returns all slabs to the heap.
    pub(crate) fn release_objects(&mut self) {
        for o in self.iter() {
            if let Some(finalize) = o.descriptor().finalize {
                // SAFETY: the object is still live; memory goes away below.
                unsafe { finalize(o) };
            }
        }
        let layout = self.slab_layout();
        let mut slab = self.slabs;
        while !slab.is_null() {
            // SAFETY: slab chain members were allocated with `layout`.
            unsafe {
                let next = (*slab).next;
                heap::free(NonNull::new_unchecked(slab as *mut u8), layout);
                slab = next;
            }
        }
        self.slabs = ptr::null_mut();
        self.object_count = 0;
        self.bytes_used = 0;
    }
}

pub(crate) struct ArenaIter {
    slab: *mut SlabHeader,
    cursor: usize,
}

impl Iterator for ArenaIter {
    type Item = Obj;

    fn next(&mut self) -> Option<Obj> {
        loop {
            if self.slab.is_null() {
                return None;
            }
            // SAFETY: slab is a live chain member.
            let used = unsafe { (*self.slab).used };
            if self.cursor >= used {
                // SAFETY: as above.
                self.slab = unsafe { (*self.slab).next };
                self.cursor = SLAB_HEADER_SIZE;
                continue;
            }
            // SAFETY: cursor points at a live object inside the slab.
            let obj = unsafe {
                Obj::from_raw(
                    (self.slab as *mut u8).add(self.cursor) as *mut Object
                )
            };
            self.cursor += object::allocation_size(obj.descriptor());
            return Some(obj);
        }
    }
}
