//! Thin wrapper over the global allocator.
//!
//! Everything the runtime hands out (objects, arena slabs) comes through
//! here so the allocation policy stays in one place. Exhaustion is not a
//! recoverable condition for the runtime; we abort through
//! [`std::alloc::handle_alloc_error`].

use std::alloc::{self, Layout};
use std::ptr::NonNull;

pub fn alloc(layout: Layout) -> NonNull<u8> {
    debug_assert!(layout.size() > 0);
    // SAFETY: layout has a non-zero size.
    let ptr = unsafe { alloc::alloc(layout) };
    match NonNull::new(ptr) {
        Some(p) => p,
        None => alloc::handle_alloc_error(layout),
    }
}

/// # Safety
///
/// `ptr` must have been returned by [`alloc`] with the same `layout`, and
/// must not be used afterwards.
pub unsafe fn free(ptr: NonNull<u8>, layout: Layout) {
    // SAFETY: by contract.
    unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_respects_alignment() {
        let layout = Layout::from_size_align(40, 16).unwrap();
        let ptr = alloc(layout);
        assert_eq!(ptr.as_ptr() as usize % 16, 0);
        unsafe { free(ptr, layout) };
    }

    #[test]
    fn alloc_free_round_trip() {
        let layout = Layout::from_size_align(64, 8).unwrap();
        let ptr = alloc(layout);
        unsafe {
            ptr.as_ptr().write_bytes(0xAB, 64);
            assert_eq!(*ptr.as_ptr(), 0xAB);
            free(ptr, layout);
        }
    }
}
