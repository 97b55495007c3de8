//! Freezing a trace region into an immutable reference-counted graph.
//!
//! The walk assigns every reachable object a count equal to its in-degree
//! (plus one for the entry, which the outside world owns), sweeps whatever
//! the entry cannot reach, and drops the remembered set and the
//! external-reference table. A frozen region rejects further allocation
//! and collection.

use crate::object::{Color, Obj, ObjectStack};
use crate::region::{Region, RegionState, Strategy};

/// # Safety
///
/// Caller must have exclusive access to the region; it must be Closed and
/// must not be opened concurrently.
pub(crate) unsafe fn freeze_region(region: *mut Region, entry: Obj) {
    // SAFETY: per contract.
    let r = unsafe { &*region };
    assert_eq!(
        r.base.state(),
        RegionState::Closed,
        "freeze requires a closed region"
    );
    let t = match unsafe { r.strategy_mut() } {
        Strategy::Trace(t) => t,
        _ => panic!("freeze requires a trace region"),
    };
    assert!(!t.frozen, "region is already frozen");

    // Count in-degrees of the reachable graph. The entry's extra count
    // models the reference held by whoever froze the region.
    entry.set_rc(1);
    entry.set_color(Color::Black);
    let mut work = vec![entry];
    let mut scratch = ObjectStack::new();
    while let Some(o) = work.pop() {
        // SAFETY: o is a live object of its descriptor's type.
        unsafe { (o.descriptor().trace)(o, &mut scratch) };
        while let Some(c) = scratch.pop() {
            c.set_rc(c.rc() + 1);
            if c.color() != Color::Black {
                c.set_color(Color::Black);
                work.push(c);
            }
        }
    }

    // Unreachable objects never join the frozen graph.
    t.sweep_unreachable(&r.base);

    for o in t.objects().iter() {
        o.set_color(Color::White);
    }
    t.frozen = true;
    unsafe {
        r.base.remembered_mut().clear();
        r.base.external_mut().clear();
    }
    tracing::debug!(target: "region", region = ?region, "froze region");
}

#[cfg(test)]
mod tests {
    use crate::api::{self, OpenMode};
    use crate::region::RegionKind;
    use crate::testutil::{set_f1, set_f2, NODE2};

    #[test]
    fn freeze_assigns_in_degrees_and_sweeps_unreachable() {
        let entry = api::create_region(RegionKind::Trace, &NODE2);
        let (shared, dead) = {
            let guard = api::open_region(entry, OpenMode::Work).unwrap();
            let a = api::alloc(&NODE2);
            let shared = api::alloc(&NODE2);
            let dead = api::alloc(&NODE2);
            set_f1(entry, Some(a));
            set_f2(entry, Some(shared));
            set_f1(a, Some(shared));
            guard.close();
            (shared, dead)
        };
        let _ = dead;

        api::freeze(entry);

        assert_eq!(entry.rc(), 1);
        // `shared` is referenced by both the entry and `a`.
        assert_eq!(shared.rc(), 2);

        api::release(entry);
    }

    #[test]
    #[should_panic(expected = "frozen")]
    fn frozen_region_rejects_allocation() {
        let entry = api::create_region(RegionKind::Trace, &NODE2);
        api::freeze(entry);
        let guard = api::open_region(entry, OpenMode::Work).unwrap();
        let _ = api::alloc(&NODE2);
        guard.close();
    }

    #[test]
    #[should_panic(expected = "trace region")]
    fn freeze_rejects_other_kinds() {
        let entry = api::create_region(RegionKind::Arena, &NODE2);
        api::freeze(entry);
    }
}
