//! Per-type metadata consumed by the region strategies.
//!
//! All object polymorphism (tracing, finalization) goes through the
//! descriptor table rather than per-object vtables, so object headers stay
//! small. Descriptors are expected to live for the whole program
//! (`&'static`), which is how every consumer in this workspace declares
//! them.

use bitflags::bitflags;

use crate::object::{Obj, ObjectStack};

/// Pushes every outgoing reference of `obj` onto `stack`.
///
/// # Safety
///
/// `obj` must point to a live object whose payload matches this
/// descriptor's layout.
pub type TraceFn = unsafe fn(obj: Obj, stack: &mut ObjectStack);

/// Runs before the object's memory is returned to the heap.
///
/// # Safety
///
/// `obj` is still valid during the call but may reference objects that have
/// already been finalized in the same collection; finalizers must not
/// follow outgoing references.
pub type FinalizeFn = unsafe fn(obj: Obj);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DescriptorFlags: u8 {
        /// Objects of this type can never participate in a reference cycle.
        /// They are skipped by candidate marking and never visited by the
        /// cycle detector.
        const ACYCLIC = 1 << 0;
    }
}

/// Type record for objects managed by the runtime.
#[derive(Debug)]
pub struct Descriptor {
    /// Payload size in bytes (the object header is not included).
    pub size: usize,
    /// Payload alignment. Must not exceed the header alignment (8).
    pub align: usize,
    pub trace: TraceFn,
    pub finalize: Option<FinalizeFn>,
    pub flags: DescriptorFlags,
}

impl Descriptor {
    #[inline]
    pub fn is_acyclic(&self) -> bool {
        self.flags.contains(DescriptorFlags::ACYCLIC)
    }
}

/// Trace function for leaf types with no outgoing references.
pub unsafe fn trace_nothing(_obj: Obj, _stack: &mut ObjectStack) {}
