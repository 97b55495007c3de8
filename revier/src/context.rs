//! Per-worker region context.
//!
//! Each worker thread owns a stack of `(entry, region)` frames for the
//! regions it currently holds open, the optional GC-measurement sink the
//! harness installs around timed sections, and the optional task scheduler
//! GC tasks are enqueued onto. Nothing here is shared between threads.

use std::cell::RefCell;
use std::sync::Arc;

use crate::object::Obj;
use crate::region::{Region, RegionKind};
use crate::scheduler::TaskScheduler;

/// Measurement sink receiving
/// `(duration_ns, region_kind, bytes_before, object_count_before)`.
pub type GcSink = Box<dyn FnMut(u64, RegionKind, usize, usize)>;

#[derive(Clone, Copy)]
pub(crate) struct Frame {
    pub entry: Obj,
    pub region: *mut Region,
}

struct RegionContext {
    frames: Vec<Frame>,
    sink: Option<GcSink>,
    scheduler: Option<Arc<dyn TaskScheduler>>,
}

thread_local! {
    static CONTEXT: RefCell<RegionContext> = RefCell::new(RegionContext {
        frames: Vec::new(),
        sink: None,
        scheduler: None,
    });
}

pub(crate) fn push(entry: Obj, region: *mut Region) {
    CONTEXT.with(|c| {
        let mut c = c.borrow_mut();
        debug_assert!(
            c.frames.iter().all(|f| f.region != region),
            "nested open of the same region"
        );
        c.frames.push(Frame { entry, region });
    });
}

pub(crate) fn pop() -> Frame {
    CONTEXT.with(|c| {
        c.borrow_mut()
            .frames
            .pop()
            .expect("close without an open region")
    })
}

pub(crate) fn top() -> Frame {
    CONTEXT.with(|c| {
        *c.borrow()
            .frames
            .last()
            .expect("no region is currently open")
    })
}

pub(crate) fn set_top_entry(entry: Obj) {
    CONTEXT.with(|c| {
        c.borrow_mut()
            .frames
            .last_mut()
            .expect("no region is currently open")
            .entry = entry;
    });
}

#[cfg(test)]
pub(crate) fn depth() -> usize {
    CONTEXT.with(|c| c.borrow().frames.len())
}

/// Installs (or removes) this worker's measurement sink, returning the
/// previous one so callers can restore it.
pub fn set_gc_callback(sink: Option<GcSink>) -> Option<GcSink> {
    CONTEXT.with(|c| std::mem::replace(&mut c.borrow_mut().sink, sink))
}

/// Removes and returns this worker's measurement sink.
pub fn take_gc_callback() -> Option<GcSink> {
    set_gc_callback(None)
}

/// Installs the scheduler GC tasks are enqueued onto after a work-close,
/// returning the previous one. With no scheduler installed, closing a
/// region schedules nothing and collection stays synchronous.
pub fn set_task_scheduler(
    scheduler: Option<Arc<dyn TaskScheduler>>,
) -> Option<Arc<dyn TaskScheduler>> {
    CONTEXT.with(|c| std::mem::replace(&mut c.borrow_mut().scheduler, scheduler))
}

pub(crate) fn scheduler() -> Option<Arc<dyn TaskScheduler>> {
    CONTEXT.with(|c| c.borrow().scheduler.clone())
}

/// Routes one measurement to the installed sink, or logs it.
///
/// The sink is taken out for the duration of the call so it may itself use
/// the region API without re-entering the context cell.
pub(crate) fn deliver_measurement(
    duration_ns: u64,
    kind: RegionKind,
    bytes_before: usize,
    objects_before: usize,
) {
    let sink = CONTEXT.with(|c| c.borrow_mut().sink.take());
    match sink {
        Some(mut sink) => {
            sink(duration_ns, kind, bytes_before, objects_before);
            CONTEXT.with(|c| {
                let slot = &mut c.borrow_mut().sink;
                if slot.is_none() {
                    *slot = Some(sink);
                }
            });
        }
        None => {
            tracing::debug!(
                target: "gc",
                duration_ns,
                ?kind,
                bytes_before,
                objects_before,
                "gc measurement"
            );
        }
    }
}
