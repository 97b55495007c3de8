//! Helpers shared by the in-crate tests: a two-field node type and payload
//! accessors for building object graphs.

use std::ptr;

use crate::descriptor::{Descriptor, DescriptorFlags};
use crate::object::{Obj, Object, ObjectStack};

#[repr(C)]
pub(crate) struct Node2 {
    pub f1: *mut Object,
    pub f2: *mut Object,
}

pub(crate) unsafe fn trace_node2(o: Obj, stack: &mut ObjectStack) {
    // SAFETY: the payload is a Node2 by descriptor contract.
    unsafe {
        let node = o.payload_as::<Node2>();
        for field in [(*node).f1, (*node).f2] {
            if !field.is_null() {
                stack.push(Obj::from_raw(field));
            }
        }
    }
}

pub(crate) static NODE2: Descriptor = Descriptor {
    size: size_of::<Node2>(),
    align: align_of::<Node2>(),
    trace: trace_node2,
    finalize: None,
    flags: DescriptorFlags::empty(),
};

pub(crate) fn set_f1(o: Obj, v: Option<Obj>) {
    // SAFETY: the payload is a Node2 by descriptor contract.
    unsafe {
        (*o.payload_as::<Node2>()).f1 =
            v.map_or(ptr::null_mut(), |x| x.as_ptr());
    }
}

pub(crate) fn set_f2(o: Obj, v: Option<Obj>) {
    // SAFETY: as above.
    unsafe {
        (*o.payload_as::<Node2>()).f2 =
            v.map_or(ptr::null_mut(), |x| x.as_ptr());
    }
}

pub(crate) fn f1(o: Obj) -> Option<Obj> {
    // SAFETY: as above.
    unsafe {
        let p = (*o.payload_as::<Node2>()).f1;
        if p.is_null() {
            None
        } else {
            Some(Obj::from_raw(p))
        }
    }
}

#[allow(dead_code)]
pub(crate) fn f2(o: Obj) -> Option<Obj> {
    // SAFETY: as above.
    unsafe {
        let p = (*o.payload_as::<Node2>()).f2;
        if p.is_null() {
            None
        } else {
            Some(Obj::from_raw(p))
        }
    }
}
