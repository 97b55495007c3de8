//! Region metadata: the concurrent state machine, the owner count and the
//! strategy dispatch point.
//!
//! A region is touched by at most one thread at a time. Mutators take the
//! region through `Closed -> Open -> Closed`; a GC task takes it through
//! `Closed -> Collecting -> Closed`. The strategy state behind
//! [`Region::strategy_mut`] is only reached while holding one of those
//! exclusive states (or during creation/merge/reclamation, where the caller
//! is the only thread that knows the region).
//!
//! The owner count decouples logical release from physical reclamation:
//! the creator holds one count, every scheduled GC task holds one, and
//! whoever drops the count to zero reclaims.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use crate::arena::ArenaRegion;
use crate::descriptor::Descriptor;
use crate::external::ExternalRefTable;
use crate::object::Obj;
use crate::rc::RcRegion;
use crate::remembered::RememberedSet;
use crate::settings::RegionSettings;
use crate::trace::TraceRegion;

/// Collection strategy of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Trace,
    Arena,
    Rc,
}

impl RegionKind {
    pub fn as_u32(self) -> u32 {
        match self {
            RegionKind::Trace => 0,
            RegionKind::Arena => 1,
            RegionKind::Rc => 2,
        }
    }

    pub fn from_u32(v: u32) -> Option<RegionKind> {
        match v {
            0 => Some(RegionKind::Trace),
            1 => Some(RegionKind::Arena),
            2 => Some(RegionKind::Rc),
            _ => None,
        }
    }
}

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const COLLECTING: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RegionState {
    Closed = CLOSED,
    Open = OPEN,
    Collecting = COLLECTING,
}

/// Shared concurrent state carried by every region.
pub struct RegionBase {
    state: AtomicU8,
    owners: AtomicUsize,
    alive: AtomicBool,
    remembered: UnsafeCell<RememberedSet>,
    external: UnsafeCell<ExternalRefTable>,
}

// SAFETY: every non-atomic field is only reached through the exclusive
// region states (see module docs); transitions use acquire/release.
unsafe impl Send for RegionBase {}
// SAFETY: as above.
unsafe impl Sync for RegionBase {}

impl RegionBase {
    fn new(settings: &RegionSettings) -> Self {
        Self {
            state: AtomicU8::new(CLOSED),
            owners: AtomicUsize::new(1),
            alive: AtomicBool::new(true),
            remembered: UnsafeCell::new(RememberedSet::new()),
            external: UnsafeCell::new(ExternalRefTable::new(
                settings.external_table_capacity,
            )),
        }
    }

    #[cfg(test)]
    pub(crate) fn new_for_tests() -> Self {
        Self::new(&RegionSettings::default())
    }

    #[inline]
    pub fn state(&self) -> RegionState {
        match self.state.load(Ordering::Acquire) {
            CLOSED => RegionState::Closed,
            OPEN => RegionState::Open,
            _ => RegionState::Collecting,
        }
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// One-way transition to dead. Returns true if the region was alive.
    pub(crate) fn set_dead(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    pub fn owners(&self) -> usize {
        self.owners.load(Ordering::Acquire)
    }

    /// Takes one owner count for a GC task about to be scheduled.
    pub fn task_inc(&self) {
        let old = self.owners.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(target: "region", owners = old + 1, "task_inc");
    }

    /// Drops one owner count. Returns true iff this was the last count, in
    /// which case the caller must perform physical release.
    pub fn task_dec(&self) -> bool {
        let old = self.owners.fetch_sub(1, Ordering::AcqRel);
        tracing::trace!(target: "region", owners = old - 1, "task_dec");
        debug_assert!(old > 0, "owner count underflow");
        old == 1
    }

    /// Takes the region for mutator work, waiting out any in-flight
    /// collection or other mutator. Never fails.
    pub(crate) fn open_for_work(&self) {
        loop {
            if self
                .state
                .compare_exchange_weak(
                    CLOSED,
                    OPEN,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return;
            }
            // Collecting, or another worker got in before us. Wait them out.
            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }

    /// Single attempt to take the region for collection. Returns false if a
    /// mutator is active or another collector is already running.
    pub(crate) fn try_open_for_gc(&self) -> bool {
        self.state
            .compare_exchange(
                CLOSED,
                COLLECTING,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Closes the region from `from`. Only the holder can close, so the
    /// transition must succeed.
    pub(crate) fn close(&self, from: RegionState) {
        let expected = from as u8;
        debug_assert_ne!(expected, CLOSED);
        let ok = self
            .state
            .compare_exchange(
                expected,
                CLOSED,
                Ordering::Release,
                Ordering::Relaxed,
            )
            .is_ok();
        assert!(ok, "region closed from unexpected state");
    }

    /// # Safety
    ///
    /// Caller must have exclusive access to the region (Open/Collecting
    /// holder, creator, or last owner).
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn remembered_mut(&self) -> &mut RememberedSet {
        // SAFETY: by contract.
        unsafe { &mut *self.remembered.get() }
    }

    /// # Safety
    ///
    /// Same contract as [`RegionBase::remembered_mut`].
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn external_mut(&self) -> &mut ExternalRefTable {
        // SAFETY: by contract.
        unsafe { &mut *self.external.get() }
    }

    /// # Safety
    ///
    /// Same contract as [`RegionBase::remembered_mut`].
    pub(crate) unsafe fn external_ref(&self) -> &ExternalRefTable {
        // SAFETY: by contract.
        unsafe { &*self.external.get() }
    }
}

/// Strategy-specific metadata, dispatched in one place (the API frontend).
pub(crate) enum Strategy {
    Arena(ArenaRegion),
    Trace(TraceRegion),
    Rc(RcRegion),
}

/// Region metadata. Objects point here through their headers; the region is
/// identified by this allocation's address.
pub struct Region {
    kind: RegionKind,
    pub(crate) base: RegionBase,
    strategy: UnsafeCell<Strategy>,
}

// SAFETY: the strategy cell is only reached under an exclusive region state.
unsafe impl Send for Region {}
// SAFETY: as above.
unsafe impl Sync for Region {}

impl Region {
    pub(crate) fn new(kind: RegionKind, settings: &RegionSettings) -> Region {
        let strategy = match kind {
            RegionKind::Arena => {
                Strategy::Arena(ArenaRegion::new(settings.arena_slab_size))
            }
            RegionKind::Trace => Strategy::Trace(TraceRegion::new()),
            RegionKind::Rc => Strategy::Rc(RcRegion::new()),
        };
        Region {
            kind,
            base: RegionBase::new(settings),
            strategy: UnsafeCell::new(strategy),
        }
    }

    #[inline]
    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    /// # Safety
    ///
    /// Caller must have exclusive access to the region (see module docs).
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn strategy_mut(&self) -> &mut Strategy {
        // SAFETY: by contract.
        unsafe { &mut *self.strategy.get() }
    }
}

// ── Region lifecycle & dispatch ───────────────────────────────────────

/// Creates a region of `kind` with its entry object.
pub(crate) fn create(
    kind: RegionKind,
    desc: &'static Descriptor,
    settings: &RegionSettings,
) -> Obj {
    let region = Box::into_raw(Box::new(Region::new(kind, settings)));
    // SAFETY: the region was just created; no other thread knows it.
    let entry = unsafe { alloc_in(region, desc) };
    entry.set_iso(true);
    tracing::debug!(target: "region", region = ?region, ?kind, "created region");
    entry
}

/// Allocates an object in `region`.
///
/// # Safety
///
/// Caller must have exclusive access to the region.
pub(crate) unsafe fn alloc_in(
    region: *mut Region,
    desc: &'static Descriptor,
) -> Obj {
    // SAFETY: region is live; exclusivity per contract.
    let r = unsafe { &*region };
    let obj = match unsafe { r.strategy_mut() } {
        Strategy::Arena(a) => a.alloc(desc),
        Strategy::Trace(t) => t.alloc(desc),
        Strategy::Rc(rc) => rc.alloc(desc),
    };
    obj.set_region(region);
    obj
}

/// Runs the strategy's collection. A no-op for arenas.
///
/// # Safety
///
/// Caller must hold the region Open or Collecting.
pub(crate) unsafe fn collect_in(region: *mut Region, entry: Obj) {
    // SAFETY: per contract.
    let r = unsafe { &*region };
    match unsafe { r.strategy_mut() } {
        Strategy::Arena(_) => {}
        Strategy::Trace(t) => t.collect(&r.base, entry),
        Strategy::Rc(rc) => rc.collect_cycles(&r.base),
    }
}

/// Live object count of the region, entry included.
///
/// # Safety
///
/// Caller must have exclusive access to the region.
pub(crate) unsafe fn debug_size_in(region: *mut Region) -> usize {
    // SAFETY: per contract.
    let r = unsafe { &*region };
    match unsafe { r.strategy_mut() } {
        Strategy::Arena(a) => a.debug_size(),
        Strategy::Trace(t) => t.debug_size(),
        Strategy::Rc(rc) => rc.debug_size(),
    }
}

/// Bytes currently held by the region.
///
/// # Safety
///
/// Caller must have exclusive access to the region.
pub(crate) unsafe fn memory_used_in(region: *mut Region) -> usize {
    // SAFETY: per contract.
    let r = unsafe { &*region };
    match unsafe { r.strategy_mut() } {
        Strategy::Arena(a) => a.memory_used(),
        Strategy::Trace(t) => t.memory_used(),
        Strategy::Rc(rc) => rc.memory_used(),
    }
}

/// Merges `other` into `current`: all of `other`'s objects join `current`,
/// and `other` ceases to exist as a region.
///
/// # Safety
///
/// Caller must hold `current` open; `other` must be closed, alive, of the
/// same (non-Rc) kind, and never opened by any worker.
pub(crate) unsafe fn merge_regions(
    current: *mut Region,
    other: *mut Region,
    other_entry: Obj,
) {
    // SAFETY: per contract.
    let (cur, oth) = unsafe { (&*current, &*other) };
    debug_assert_eq!(oth.base.state(), RegionState::Closed);
    debug_assert!(oth.base.is_alive());
    debug_assert_eq!(
        unsafe { oth.base.external_ref() }.live_count(),
        0,
        "cannot merge a region with live external references"
    );

    match unsafe { (cur.strategy_mut(), oth.strategy_mut()) } {
        (Strategy::Trace(a), Strategy::Trace(b)) => {
            for o in b.objects().iter() {
                o.set_region(current);
            }
            a.absorb(b);
        }
        (Strategy::Arena(a), Strategy::Arena(b)) => {
            for o in b.iter() {
                o.set_region(current);
            }
            a.absorb(b);
        }
        _ => unreachable!("merge requires matching non-rc region kinds"),
    }
    other_entry.set_iso(false);
    unsafe {
        cur.base
            .remembered_mut()
            .merge(oth.base.remembered_mut());
    }
    // The merged metadata is gone; its single owner count dies with it.
    // SAFETY: `other` was never opened, so no GC task can hold a count.
    drop(unsafe { Box::from_raw(other) });
}

/// Frees every live object (running finalizers), the strategy structures,
/// the remembered set, the external-reference table, and the metadata.
///
/// # Safety
///
/// Caller must hold the last owner count of a dead region.
pub(crate) unsafe fn physical_release(region: *mut Region) {
    // SAFETY: per contract; we are the only thread left.
    let r = unsafe { &*region };
    debug_assert!(!r.base.is_alive());
    debug_assert_eq!(r.base.owners(), 0);
    tracing::debug!(target: "region", region = ?region, "physical release");
    match unsafe { r.strategy_mut() } {
        Strategy::Arena(a) => a.release_objects(),
        Strategy::Trace(t) => t.release_objects(),
        Strategy::Rc(rc) => rc.release_objects(),
    }
    // Remembered set and external table drop with the metadata.
    // SAFETY: created by Box::into_raw in `create`.
    drop(unsafe { Box::from_raw(region) });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn new_base() -> RegionBase {
        RegionBase::new(&RegionSettings::default())
    }

    #[test]
    fn initial_state() {
        let base = new_base();
        assert_eq!(base.state(), RegionState::Closed);
        assert_eq!(base.owners(), 1);
        assert!(base.is_alive());
    }

    #[test]
    fn gc_open_fails_while_open_for_work() {
        let base = new_base();
        base.open_for_work();
        assert!(!base.try_open_for_gc());
        base.close(RegionState::Open);
        assert!(base.try_open_for_gc());
        assert!(!base.try_open_for_gc());
        base.close(RegionState::Collecting);
    }

    #[test]
    #[should_panic(expected = "unexpected state")]
    fn close_without_open_panics() {
        let base = new_base();
        base.close(RegionState::Open);
    }

    #[test]
    fn owner_count_round_trip() {
        let base = new_base();
        base.task_inc();
        base.task_inc();
        assert_eq!(base.owners(), 3);
        assert!(!base.task_dec());
        assert!(!base.task_dec());
        assert!(base.task_dec());
    }

    #[test]
    fn set_dead_is_one_way() {
        let base = new_base();
        assert!(base.set_dead());
        assert!(!base.set_dead());
        assert!(!base.is_alive());
    }

    #[test]
    fn open_for_work_waits_out_collector() {
        let base = Arc::new(new_base());
        let opened = Arc::new(AtomicUsize::new(0));

        assert!(base.try_open_for_gc());

        let worker = {
            let base = Arc::clone(&base);
            let opened = Arc::clone(&opened);
            std::thread::spawn(move || {
                base.open_for_work();
                opened.store(1, Ordering::SeqCst);
                base.close(RegionState::Open);
            })
        };

        // The worker cannot get in while we are collecting.
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(opened.load(Ordering::SeqCst), 0);

        base.close(RegionState::Collecting);
        worker.join().unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(base.state(), RegionState::Closed);
    }

    #[test]
    fn kind_u32_round_trip() {
        for kind in [RegionKind::Trace, RegionKind::Arena, RegionKind::Rc] {
            assert_eq!(RegionKind::from_u32(kind.as_u32()), Some(kind));
        }
        assert_eq!(RegionKind::from_u32(7), None);
    }
}
