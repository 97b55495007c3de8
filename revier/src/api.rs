//! Strategy-polymorphic frontend.
//!
//! Every mutator-facing operation dispatches on the kind of the top-of-
//! stack region. The frontend is also where all per-call measurement
//! happens: collection, Rc decref and physical release capture the
//! region's byte and object counts up front, time the strategy call, and
//! hand the four-tuple to the installed sink (or the log).
//!
//! Closing a region after mutator work schedules exactly one asynchronous
//! GC task, provided this worker has a scheduler installed. The task holds
//! an owner count from the moment it is scheduled, so a racing `release`
//! can never free the region underneath it; whoever drops the count to
//! zero reclaims.

use std::time::Instant;

use crate::context;
use crate::descriptor::Descriptor;
use crate::external::ExternalRef;
use crate::object::{Obj, Object};
use crate::region::{self, Region, RegionKind, RegionState, Strategy};
use crate::settings::RegionSettings;

pub use crate::context::{set_gc_callback, set_task_scheduler, take_gc_callback};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Work,
    Gc,
}

/// Creates a region of `kind` and returns its entry object.
pub fn create_region(kind: RegionKind, desc: &'static Descriptor) -> Obj {
    create_region_with(kind, desc, &RegionSettings::default())
}

pub fn create_region_with(
    kind: RegionKind,
    desc: &'static Descriptor,
    settings: &RegionSettings,
) -> Obj {
    settings.validate().expect("invalid region settings");
    region::create(kind, desc, settings)
}

/// Scoped hold on an open region. Dropping the guard closes the region;
/// closing after work schedules one GC task.
pub struct RegionGuard {
    mode: OpenMode,
    closed: bool,
}

impl RegionGuard {
    pub fn close(mut self) {
        self.close_inner();
    }

    fn close_inner(&mut self) {
        if !self.closed {
            self.closed = true;
            close_region(self.mode);
        }
    }
}

impl Drop for RegionGuard {
    fn drop(&mut self) {
        self.close_inner();
    }
}

/// Opens the region named by `entry`.
///
/// Work mode waits out any in-flight collection or other mutator and never
/// fails. Gc mode makes a single attempt and returns `None` if a mutator
/// is active or another collector already holds the region.
pub fn open_region(entry: Obj, mode: OpenMode) -> Option<RegionGuard> {
    assert!(entry.is_iso(), "open_region needs a region entry object");
    let region = entry.region();
    // SAFETY: entry keeps its region metadata alive.
    let base = unsafe { &(*region).base };
    match mode {
        OpenMode::Work => base.open_for_work(),
        OpenMode::Gc => {
            if !base.try_open_for_gc() {
                tracing::debug!(target: "region", region = ?region, "gc open skipped");
                return None;
            }
        }
    }
    context::push(entry, region);
    Some(RegionGuard {
        mode,
        closed: false,
    })
}

fn close_region(mode: OpenMode) {
    let frame = context::pop();
    // SAFETY: an open frame keeps its region alive.
    let base = unsafe { &(*frame.region).base };
    match mode {
        OpenMode::Work => {
            base.close(RegionState::Open);
            schedule_gc(frame.entry);
        }
        OpenMode::Gc => base.close(RegionState::Collecting),
    }
}

struct GcTask {
    entry: *mut Object,
    region: *mut Region,
}

// SAFETY: the task only touches the region through the state machine, and
// holds an owner count keeping the metadata alive.
unsafe impl Send for GcTask {}

fn schedule_gc(entry: Obj) {
    let region = entry.region();
    // SAFETY: the caller just closed this region; it is still alive or the
    // metadata is at least owned.
    let base = unsafe { &(*region).base };
    if !base.is_alive() {
        return;
    }
    let Some(scheduler) = context::scheduler() else {
        return;
    };
    let task = GcTask {
        entry: entry.as_ptr(),
        region,
    };
    base.task_inc();
    tracing::debug!(target: "region", region = ?region, "scheduling gc task");
    scheduler.schedule(Box::new(move || run_gc_task(task)));
}

fn run_gc_task(task: GcTask) {
    // SAFETY: the task's owner count keeps the metadata alive.
    let base = unsafe { &(*task.region).base };
    if base.is_alive() {
        // SAFETY: entry objects outlive their region's last owner count.
        let entry = unsafe { Obj::from_raw(task.entry) };
        match open_region(entry, OpenMode::Gc) {
            Some(guard) => {
                region_collect();
                guard.close();
            }
            None => {
                tracing::debug!(target: "region", region = ?task.region, "gc task skipped");
            }
        }
    }
    if base.task_dec() {
        // SAFETY: last owner of a dead region.
        unsafe { region_physical_release(task.region) };
    }
}

/// Allocates an object in the current region.
pub fn alloc(desc: &'static Descriptor) -> Obj {
    let frame = context::top();
    // SAFETY: an open frame keeps its region alive.
    debug_assert_eq!(
        unsafe { (*frame.region).base.state() },
        RegionState::Open,
        "alloc requires a region opened for work"
    );
    // SAFETY: this worker holds the region open.
    unsafe { region::alloc_in(frame.region, desc) }
}

fn expect_rc(frame: &context::Frame) -> &mut crate::rc::RcRegion {
    // SAFETY: this worker holds the region open.
    match unsafe { (*frame.region).strategy_mut() } {
        Strategy::Rc(rc) => rc,
        _ => panic!("operation requires an rc region"),
    }
}

/// Adds one reference to `o`. Rc regions only.
pub fn incref(o: Obj) {
    let frame = context::top();
    debug_assert_eq!(o.region(), frame.region);
    expect_rc(&frame).incref(o);
}

/// Drops one reference from `o`, deallocating eagerly at zero. Rc regions
/// only.
pub fn decref(o: Obj) {
    let frame = context::top();
    debug_assert_eq!(o.region(), frame.region);
    // SAFETY: this worker holds the region open.
    let r = unsafe { &*frame.region };
    let bytes = unsafe { region::memory_used_in(frame.region) };
    let objects = unsafe { region::debug_size_in(frame.region) };
    let start = Instant::now();
    expect_rc(&frame).decref(&r.base, o);
    context::deliver_measurement(
        start.elapsed().as_nanos() as u64,
        RegionKind::Rc,
        bytes,
        objects,
    );
}

/// Merges the region named by `other_entry` into the current region. The
/// kinds must match, Rc regions cannot merge, and the other region must
/// never have been opened.
pub fn merge(other_entry: Obj) {
    let frame = context::top();
    assert!(other_entry.is_iso(), "merge needs a region entry object");
    let other = other_entry.region();
    assert_ne!(other, frame.region, "cannot merge a region into itself");
    // SAFETY: both regions are alive; the current one is held open.
    let (kind, other_kind) =
        unsafe { ((*frame.region).kind(), (*other).kind()) };
    assert_eq!(kind, other_kind, "merge requires matching region kinds");
    assert_ne!(kind, RegionKind::Rc, "merge is not supported for rc regions");
    // SAFETY: contract checked above.
    unsafe { region::merge_regions(frame.region, other, other_entry) };
}

/// Freezes the trace region named by `entry` into an immutable
/// reference-counted graph. The region must be closed.
pub fn freeze(entry: Obj) {
    assert!(entry.is_iso(), "freeze needs a region entry object");
    // SAFETY: the caller owns the only way into this closed region.
    unsafe { crate::freeze::freeze_region(entry.region(), entry) };
}

/// Registers an object of another region in the current region's
/// remembered set.
pub fn remember_external(o: Obj) {
    let frame = context::top();
    debug_assert_ne!(o.region(), frame.region);
    // SAFETY: this worker holds the region open.
    unsafe { (*frame.region).base.remembered_mut().insert(o) };
}

/// Creates a weak handle to `o` in the current region.
pub fn create_external_reference(o: Obj) -> ExternalRef {
    let frame = context::top();
    debug_assert_eq!(o.region(), frame.region);
    // SAFETY: this worker holds the region open.
    let (index, epoch) =
        unsafe { (*frame.region).base.external_mut().create(o) };
    o.set_has_external();
    ExternalRef {
        region: frame.region,
        index,
        epoch,
    }
}

/// Dereferences a weak handle. Returns `None` if the handle belongs to a
/// different region, the region has been released, or a collection freed
/// the target.
pub fn use_external_reference(handle: ExternalRef) -> Option<Obj> {
    let frame = context::top();
    if handle.region != frame.region {
        return None;
    }
    // SAFETY: this worker holds the region open.
    let base = unsafe { &(*handle.region).base };
    if !base.is_alive() {
        return None;
    }
    // SAFETY: as above.
    unsafe { base.external_ref() }.resolve(handle.index, handle.epoch)
}

/// Live object count of the current region, entry included.
pub fn debug_size() -> usize {
    let frame = context::top();
    // SAFETY: this worker holds the region open.
    unsafe { region::debug_size_in(frame.region) }
}

/// Bytes currently held by the current region.
pub fn debug_memory_used() -> usize {
    let frame = context::top();
    // SAFETY: this worker holds the region open.
    unsafe { region::memory_used_in(frame.region) }
}

/// `(allocations, deallocations)` over the lifetime of the current Rc
/// region. Debugging aid.
pub fn debug_allocation_totals() -> (u64, u64) {
    let frame = context::top();
    expect_rc(&frame).allocation_totals()
}

/// True iff `o` is the entry of some region other than the current one.
pub fn is_region_ref(o: Obj) -> bool {
    o.is_iso() && context::top().entry != o
}

/// Makes `o` the entry object of the current region. Trace and Arena only.
pub fn set_entry_point(o: Obj) {
    let frame = context::top();
    // SAFETY: this worker holds the region open.
    let kind = unsafe { (*frame.region).kind() };
    assert_ne!(
        kind,
        RegionKind::Rc,
        "set_entry_point is not supported for rc regions"
    );
    debug_assert_eq!(o.region(), frame.region);
    frame.entry.set_iso(false);
    o.set_iso(true);
    context::set_top_entry(o);
}

/// Synchronously collects the current region.
pub fn region_collect() {
    let frame = context::top();
    // SAFETY: this worker holds the region open (work or gc mode).
    let kind = unsafe { (*frame.region).kind() };
    let bytes = unsafe { region::memory_used_in(frame.region) };
    let objects = unsafe { region::debug_size_in(frame.region) };
    let start = Instant::now();
    // SAFETY: as above.
    unsafe { region::collect_in(frame.region, frame.entry) };
    context::deliver_measurement(
        start.elapsed().as_nanos() as u64,
        kind,
        bytes,
        objects,
    );
}

/// Logically releases the region named by `entry`. Idempotent; physical
/// reclamation happens once the last owner count retires.
pub fn release(entry: Obj) {
    assert!(entry.is_iso(), "release needs a region entry object");
    let region = entry.region();
    // SAFETY: entry keeps its region metadata alive until the last owner.
    let base = unsafe { &(*region).base };
    if !base.set_dead() {
        return;
    }
    if base.task_dec() {
        // SAFETY: last owner of a dead region.
        unsafe { region_physical_release(region) };
    }
}

/// Frees everything the region holds, measuring the teardown.
///
/// # Safety
///
/// Caller must hold the last owner count of a dead region.
unsafe fn region_physical_release(region: *mut Region) {
    // SAFETY: per contract; no other thread can touch the region now.
    let kind = unsafe { (*region).kind() };
    let bytes = unsafe { region::memory_used_in(region) };
    let objects = unsafe { region::debug_size_in(region) };
    let start = Instant::now();
    // SAFETY: as above.
    unsafe { region::physical_release(region) };
    context::deliver_measurement(
        start.elapsed().as_nanos() as u64,
        kind,
        bytes,
        objects,
    );
}
